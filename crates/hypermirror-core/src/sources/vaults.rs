//! Vault listing from the stats snapshot endpoint.
//!
//! Closed vaults and child vaults are dropped; duplicates (same name, leader
//! and address) keep their first occurrence.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{decimal, parse_body, CacheWrite, Decimal, Source, Transformed};

pub const NAME: &str = "vaults";
pub const RAW_KEY: &str = "vaults:raw_list";
pub const FILTERED_KEY: &str = "vaults:filtered_list";
pub const TOPIC: &str = "vaults:list:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSummary {
    pub name: String,
    pub vault_address: String,
    pub leader: String,
    pub tvl: f64,
    pub apr: Option<f64>,
    pub relationship: String,
    pub create_time_millis: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawVault {
    apr: Option<Decimal>,
    summary: RawVaultSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVaultSummary {
    name: String,
    vault_address: String,
    leader: String,
    tvl: Option<Decimal>,
    #[serde(default)]
    is_closed: bool,
    relationship: Option<Relationship>,
    create_time_millis: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    kind: String,
}

/// Mirrors `GET <stats>/vaults`.
#[derive(Debug, Clone)]
pub struct VaultsSource {
    stats_url: String,
    ttl: CacheTtl,
}

impl VaultsSource {
    pub fn new(stats_url: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            stats_url: stats_url.into(),
            ttl,
        }
    }
}

impl Source for VaultsSource {
    fn name(&self) -> &str {
        NAME
    }

    fn topic(&self) -> &str {
        TOPIC
    }

    fn primary_key(&self) -> &str {
        FILTERED_KEY
    }

    fn owned_keys(&self) -> Vec<&str> {
        vec![RAW_KEY, FILTERED_KEY]
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(format!("{}/vaults", self.stats_url.trim_end_matches('/')))
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let raw: Vec<RawVault> = parse_body(NAME, body)?;
        let total = raw.len();

        let mut seen = HashSet::new();
        let mut vaults: Vec<VaultSummary> = raw
            .into_iter()
            .filter(|vault| !vault.summary.is_closed)
            .filter(|vault| {
                vault
                    .summary
                    .relationship
                    .as_ref()
                    .map_or(true, |relationship| relationship.kind != "child")
            })
            .filter(|vault| {
                seen.insert((
                    vault.summary.name.clone(),
                    vault.summary.leader.clone(),
                    vault.summary.vault_address.clone(),
                ))
            })
            .map(|vault| VaultSummary {
                tvl: decimal(&vault.summary.tvl).unwrap_or(0.0),
                apr: decimal(&vault.apr),
                relationship: vault
                    .summary
                    .relationship
                    .map_or_else(|| String::from("normal"), |r| r.kind),
                name: vault.summary.name,
                vault_address: vault.summary.vault_address,
                leader: vault.summary.leader,
                create_time_millis: vault.summary.create_time_millis,
            })
            .collect();
        vaults.sort_by(|a, b| b.tvl.total_cmp(&a.tvl));

        let total_tvl: f64 = vaults.iter().map(|vault| vault.tvl).sum();
        Ok(Transformed::new()
            .write(CacheWrite::raw(RAW_KEY, body, CacheTtl::Persistent))
            .write(CacheWrite::json(FILTERED_KEY, &vaults, self.ttl)?)
            .with_summary("count", vaults.len())
            .with_summary("rawCount", total)
            .with_summary("totalTvl", total_tvl))
    }
}
