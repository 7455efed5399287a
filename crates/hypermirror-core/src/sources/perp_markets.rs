//! Perpetual markets: asset metadata joined with live asset contexts.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{
    decimal, parse_body, percent_change, transform_error, CacheWrite, Decimal, Source, Transformed,
};

pub const NAME: &str = "perp_markets";
pub const RAW_KEY: &str = "perp:raw_data";
pub const MARKETS_KEY: &str = "perp:markets";
pub const TOPIC: &str = "perp:markets:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

/// One tradable perpetual, as served to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpMarket {
    pub name: String,
    pub index: usize,
    pub max_leverage: u32,
    pub sz_decimals: u32,
    pub mark_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub oracle_price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub volume_24h: Option<f64>,
    pub open_interest: Option<f64>,
    pub open_interest_usd: Option<f64>,
    pub funding: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PerpMeta {
    universe: Vec<PerpAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerpAsset {
    name: String,
    #[serde(default)]
    sz_decimals: u32,
    #[serde(default)]
    max_leverage: u32,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerpAssetCtx {
    mark_px: Option<Decimal>,
    mid_px: Option<Decimal>,
    oracle_px: Option<Decimal>,
    prev_day_px: Option<Decimal>,
    day_ntl_vlm: Option<Decimal>,
    open_interest: Option<Decimal>,
    funding: Option<Decimal>,
}

/// Mirrors `metaAndAssetCtxs` from the info endpoint.
#[derive(Debug, Clone)]
pub struct PerpMarketsSource {
    info_url: String,
    ttl: CacheTtl,
}

impl PerpMarketsSource {
    pub fn new(info_url: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            info_url: info_url.into(),
            ttl,
        }
    }
}

impl Source for PerpMarketsSource {
    fn name(&self) -> &str {
        NAME
    }

    fn topic(&self) -> &str {
        TOPIC
    }

    fn primary_key(&self) -> &str {
        MARKETS_KEY
    }

    fn owned_keys(&self) -> Vec<&str> {
        vec![RAW_KEY, MARKETS_KEY]
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post_json(&self.info_url, &json!({ "type": "metaAndAssetCtxs" }))
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let (meta, contexts): (PerpMeta, Vec<PerpAssetCtx>) = parse_body(NAME, body)?;
        if meta.universe.len() != contexts.len() {
            return Err(transform_error(
                NAME,
                format!(
                    "universe has {} assets but {} contexts were returned",
                    meta.universe.len(),
                    contexts.len()
                ),
                body,
            ));
        }

        let mut markets: Vec<PerpMarket> = meta
            .universe
            .into_iter()
            .zip(contexts)
            .enumerate()
            .filter(|(_, (asset, _))| !asset.is_delisted)
            .map(|(index, (asset, ctx))| {
                let mark_price = decimal(&ctx.mark_px);
                let open_interest = decimal(&ctx.open_interest);
                PerpMarket {
                    name: asset.name,
                    index,
                    max_leverage: asset.max_leverage,
                    sz_decimals: asset.sz_decimals,
                    mark_price,
                    mid_price: decimal(&ctx.mid_px),
                    oracle_price: decimal(&ctx.oracle_px),
                    change_24h_pct: percent_change(mark_price, decimal(&ctx.prev_day_px)),
                    volume_24h: decimal(&ctx.day_ntl_vlm),
                    open_interest,
                    open_interest_usd: open_interest.zip(mark_price).map(|(oi, px)| oi * px),
                    funding: decimal(&ctx.funding),
                }
            })
            .collect();
        markets.sort_by(|a, b| {
            b.volume_24h
                .unwrap_or(0.0)
                .total_cmp(&a.volume_24h.unwrap_or(0.0))
        });

        Ok(Transformed::new()
            .write(CacheWrite::raw(RAW_KEY, body, CacheTtl::Persistent))
            .write(CacheWrite::json(MARKETS_KEY, &markets, self.ttl)?)
            .with_summary("count", markets.len()))
    }
}
