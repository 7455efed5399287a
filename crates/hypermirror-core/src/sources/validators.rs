//! Validator set with stake shares.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{decimal, parse_body, CacheWrite, Decimal, Source, Transformed};

pub const NAME: &str = "validators";
pub const LIST_KEY: &str = "validators:list";
pub const TOPIC: &str = "validators:list:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub validator: String,
    pub name: String,
    pub stake: f64,
    /// Fraction of total stake in `0.0..=1.0`.
    pub stake_share: f64,
    pub commission: Option<f64>,
    pub is_active: bool,
    pub is_jailed: bool,
    pub n_recent_blocks: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValidator {
    validator: String,
    #[serde(default)]
    name: String,
    stake: Decimal,
    commission: Option<Decimal>,
    #[serde(default)]
    is_active: bool,
    #[serde(default)]
    is_jailed: bool,
    #[serde(default)]
    n_recent_blocks: u64,
}

/// Mirrors `validatorSummaries` from the info endpoint.
#[derive(Debug, Clone)]
pub struct ValidatorsSource {
    info_url: String,
    ttl: CacheTtl,
}

impl ValidatorsSource {
    pub fn new(info_url: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            info_url: info_url.into(),
            ttl,
        }
    }
}

impl Source for ValidatorsSource {
    fn name(&self) -> &str {
        NAME
    }

    fn topic(&self) -> &str {
        TOPIC
    }

    fn primary_key(&self) -> &str {
        LIST_KEY
    }

    fn owned_keys(&self) -> Vec<&str> {
        vec![LIST_KEY]
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::post_json(&self.info_url, &json!({ "type": "validatorSummaries" }))
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let raw: Vec<RawValidator> = parse_body(NAME, body)?;
        let stakes: Vec<f64> = raw
            .iter()
            .map(|validator| validator.stake.value().unwrap_or(0.0))
            .collect();
        let total_stake: f64 = stakes.iter().sum();

        let mut validators: Vec<Validator> = raw
            .into_iter()
            .zip(stakes)
            .map(|(validator, stake)| Validator {
                stake_share: if total_stake > 0.0 {
                    stake / total_stake
                } else {
                    0.0
                },
                commission: decimal(&validator.commission),
                validator: validator.validator,
                name: validator.name,
                stake,
                is_active: validator.is_active,
                is_jailed: validator.is_jailed,
                n_recent_blocks: validator.n_recent_blocks,
            })
            .collect();
        validators.sort_by(|a, b| b.stake.total_cmp(&a.stake));

        let active = validators.iter().filter(|v| v.is_active).count();
        let jailed = validators.iter().filter(|v| v.is_jailed).count();
        Ok(Transformed::new()
            .write(CacheWrite::json(LIST_KEY, &validators, self.ttl)?)
            .with_summary("count", validators.len())
            .with_summary("active", active)
            .with_summary("jailed", jailed)
            .with_summary("totalStake", total_stake))
    }
}
