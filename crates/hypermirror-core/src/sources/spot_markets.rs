//! Spot markets: token table and pair universe joined with pair contexts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{
    decimal, parse_body, percent_change, CacheWrite, Decimal, Source, Transformed,
};

pub const NAME: &str = "spot_markets";
pub const RAW_KEY: &str = "spot:raw_data";
pub const MARKETS_KEY: &str = "spot:markets";
pub const TOPIC: &str = "spot:markets:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotMarket {
    /// Upstream pair identifier, e.g. `@107` or `PURR/USDC`.
    pub coin: String,
    pub base: String,
    pub quote: String,
    pub index: usize,
    pub is_canonical: bool,
    pub mark_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub volume_24h: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpotMeta {
    tokens: Vec<SpotToken>,
    universe: Vec<SpotPair>,
}

#[derive(Debug, Deserialize)]
struct SpotToken {
    name: String,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotPair {
    name: String,
    tokens: [usize; 2],
    index: usize,
    #[serde(default)]
    is_canonical: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotPairCtx {
    coin: String,
    mark_px: Option<Decimal>,
    mid_px: Option<Decimal>,
    prev_day_px: Option<Decimal>,
    day_ntl_vlm: Option<Decimal>,
    circulating_supply: Option<Decimal>,
}

/// Mirrors `spotMetaAndAssetCtxs` from the info endpoint.
#[derive(Debug, Clone)]
pub struct SpotMarketsSource {
    info_url: String,
    ttl: CacheTtl,
}

impl SpotMarketsSource {
    pub fn new(info_url: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            info_url: info_url.into(),
            ttl,
        }
    }
}

impl Source for SpotMarketsSource {
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
        HttpRequest::post_json(&self.info_url, &json!({ "type": "spotMetaAndAssetCtxs" }))
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let (meta, contexts): (SpotMeta, Vec<SpotPairCtx>) = parse_body(NAME, body)?;

        let token_names: HashMap<usize, &str> = meta
            .tokens
            .iter()
            .map(|token| (token.index, token.name.as_str()))
            .collect();
        let contexts: HashMap<&str, &SpotPairCtx> =
            contexts.iter().map(|ctx| (ctx.coin.as_str(), ctx)).collect();

        let mut markets: Vec<SpotMarket> = meta
            .universe
            .iter()
            .filter_map(|pair| {
                // Pairs without a context are not trading yet.
                let ctx = contexts.get(pair.name.as_str())?;
                let [base, quote] = pair.tokens;
                let mark_price = decimal(&ctx.mark_px);
                let circulating_supply = decimal(&ctx.circulating_supply);
                Some(SpotMarket {
                    coin: pair.name.clone(),
                    base: token_label(&token_names, base),
                    quote: token_label(&token_names, quote),
                    index: pair.index,
                    is_canonical: pair.is_canonical,
                    mark_price,
                    mid_price: decimal(&ctx.mid_px),
                    change_24h_pct: percent_change(mark_price, decimal(&ctx.prev_day_px)),
                    volume_24h: decimal(&ctx.day_ntl_vlm),
                    circulating_supply,
                    market_cap: circulating_supply.zip(mark_price).map(|(s, px)| s * px),
                })
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

fn token_label(names: &HashMap<usize, &str>, index: usize) -> String {
    names
        .get(&index)
        .map(|name| (*name).to_owned())
        .unwrap_or_else(|| format!("#{index}"))
}
