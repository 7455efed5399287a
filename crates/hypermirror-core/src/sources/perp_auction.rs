//! Perp deploy gas auction status.

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{decimal, parse_body, CacheWrite, Decimal, Source, Transformed};

pub const NAME: &str = "perp_auction";
pub const STATUS_KEY: &str = "auctions:perp_deploy";
pub const TOPIC: &str = "auctions:perp_deploy:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionStatus {
    pub start_time_seconds: i64,
    pub duration_seconds: i64,
    pub end_time_seconds: i64,
    pub start_gas: Option<f64>,
    pub end_gas: Option<f64>,
    pub current_gas: Option<f64>,
    /// Elapsed fraction of the auction in `0.0..=1.0`.
    pub progress: f64,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuction {
    start_time_seconds: i64,
    duration_seconds: i64,
    start_gas: Option<Decimal>,
    current_gas: Option<Decimal>,
    end_gas: Option<Decimal>,
}

/// Derives progress, end time and current gas as of `now_seconds`.
///
/// Gas decays linearly from start to end; an upstream `currentGas` wins over
/// the interpolated value.
fn summarize(raw: &RawAuction, now_seconds: i64) -> AuctionStatus {
    let end_time_seconds = raw.start_time_seconds.saturating_add(raw.duration_seconds);
    let progress = if raw.duration_seconds <= 0 {
        1.0
    } else {
        let elapsed = now_seconds.saturating_sub(raw.start_time_seconds) as f64;
        (elapsed / raw.duration_seconds as f64).clamp(0.0, 1.0)
    };

    let start_gas = decimal(&raw.start_gas);
    let end_gas = decimal(&raw.end_gas);
    let interpolated = start_gas
        .zip(end_gas)
        .map(|(start, end)| start + (end - start) * progress);

    AuctionStatus {
        start_time_seconds: raw.start_time_seconds,
        duration_seconds: raw.duration_seconds,
        end_time_seconds,
        start_gas,
        end_gas,
        current_gas: decimal(&raw.current_gas).or(interpolated),
        progress,
        is_active: now_seconds >= raw.start_time_seconds && now_seconds < end_time_seconds,
    }
}

/// Mirrors `perpDeployAuctionStatus` from the info endpoint.
#[derive(Debug, Clone)]
pub struct PerpAuctionSource {
    info_url: String,
    ttl: CacheTtl,
}

impl PerpAuctionSource {
    pub fn new(info_url: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            info_url: info_url.into(),
            ttl,
        }
    }
}

impl Source for PerpAuctionSource {
    fn name(&self) -> &str {
        NAME
    }

    fn topic(&self) -> &str {
        TOPIC
    }

    fn primary_key(&self) -> &str {
        STATUS_KEY
    }

    fn owned_keys(&self) -> Vec<&str> {
        vec![STATUS_KEY]
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post_json(
            &self.info_url,
            &json!({ "type": "perpDeployAuctionStatus" }),
        )
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let raw: RawAuction = parse_body(NAME, body)?;
        let status = summarize(&raw, OffsetDateTime::now_utc().unix_timestamp());

        let mut transformed = Transformed::new()
            .write(CacheWrite::json(STATUS_KEY, &status, self.ttl)?)
            .with_summary("isActive", status.is_active)
            .with_summary("progress", status.progress);
        if let Some(gas) = status.current_gas {
            transformed = transformed.with_summary("currentGas", gas);
        }
        Ok(transformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(current_gas: Option<&str>) -> RawAuction {
        RawAuction {
            start_time_seconds: 1_000,
            duration_seconds: 100,
            start_gas: Some(Decimal::Text(String::from("500"))),
            current_gas: current_gas.map(|gas| Decimal::Text(gas.to_owned())),
            end_gas: Some(Decimal::Number(100.0)),
        }
    }

    #[test]
    fn interpolates_gas_halfway_through() {
        let status = summarize(&raw(None), 1_050);

        assert_eq!(status.end_time_seconds, 1_100);
        assert_eq!(status.progress, 0.5);
        assert_eq!(status.current_gas, Some(300.0));
        assert!(status.is_active);
    }

    #[test]
    fn upstream_current_gas_wins_and_progress_is_clamped() {
        let before = summarize(&raw(Some("450")), 900);
        assert_eq!(before.progress, 0.0);
        assert!(!before.is_active);
        assert_eq!(before.current_gas, Some(450.0));

        let after = summarize(&raw(None), 5_000);
        assert_eq!(after.progress, 1.0);
        assert!(!after.is_active);
        assert_eq!(after.current_gas, Some(100.0));
    }

    #[test]
    fn transform_writes_a_single_status_record() {
        let source = PerpAuctionSource::new("https://api.example.test/info", CacheTtl::Default);
        let body = r#"{"startTimeSeconds": 0, "durationSeconds": 111600,
                       "startGas": "500.0", "currentGas": null, "endGas": null}"#;

        let transformed = source.transform(body).expect("valid payload");
        assert_eq!(transformed.writes.len(), 1);
        assert_eq!(transformed.writes[0].key, STATUS_KEY);
        assert_eq!(transformed.summary["isActive"], false);
        assert!(transformed.summary.get("currentGas").is_none());
    }

    #[test]
    fn extreme_upstream_timestamps_saturate() {
        let hostile = RawAuction {
            start_time_seconds: i64::MIN,
            duration_seconds: i64::MAX,
            ..raw(None)
        };

        let status = summarize(&hostile, 1_700_000_000);

        assert_eq!(status.end_time_seconds, -1);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.current_gas, Some(100.0));
    }
}
