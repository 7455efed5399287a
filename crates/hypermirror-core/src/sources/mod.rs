//! Mirrored upstream datasets.
//!
//! | Source | Upstream | Default interval |
//! |--------|----------|------------------|
//! | [`perp_markets`] | info `metaAndAssetCtxs` | 5 s |
//! | [`spot_markets`] | info `spotMetaAndAssetCtxs` | 5 s |
//! | [`vaults`] | stats `/vaults` | 30 s |
//! | [`validators`] | info `validatorSummaries` | 60 s |
//! | [`leaderboard`] | stats `/leaderboard` | 60 s |
//! | [`perp_auction`] | info `perpDeployAuctionStatus` | 10 s |

pub mod leaderboard;
pub mod perp_auction;
pub mod perp_markets;
pub mod spot_markets;
pub mod validators;
pub mod vaults;

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::source::Source;

pub use leaderboard::LeaderboardSource;
pub use perp_auction::PerpAuctionSource;
pub use perp_markets::PerpMarketsSource;
pub use spot_markets::SpotMarketsSource;
pub use validators::ValidatorsSource;
pub use vaults::VaultsSource;

pub const DEFAULT_INFO_URL: &str = "https://api.hyperliquid.xyz/info";
pub const DEFAULT_STATS_URL: &str = "https://stats-data.hyperliquid.xyz/Mainnet";

/// Canonical source identifiers used in config sections and registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    PerpMarkets,
    SpotMarkets,
    Vaults,
    Validators,
    Leaderboard,
    PerpAuction,
}

impl SourceId {
    pub const ALL: [Self; 6] = [
        Self::PerpMarkets,
        Self::SpotMarkets,
        Self::Vaults,
        Self::Validators,
        Self::Leaderboard,
        Self::PerpAuction,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerpMarkets => perp_markets::NAME,
            Self::SpotMarkets => spot_markets::NAME,
            Self::Vaults => vaults::NAME,
            Self::Validators => validators::NAME,
            Self::Leaderboard => leaderboard::NAME,
            Self::PerpAuction => perp_auction::NAME,
        }
    }

    pub const fn default_interval(self) -> Duration {
        Duration::from_millis(match self {
            Self::PerpMarkets => perp_markets::DEFAULT_INTERVAL_MS,
            Self::SpotMarkets => spot_markets::DEFAULT_INTERVAL_MS,
            Self::Vaults => vaults::DEFAULT_INTERVAL_MS,
            Self::Validators => validators::DEFAULT_INTERVAL_MS,
            Self::Leaderboard => leaderboard::DEFAULT_INTERVAL_MS,
            Self::PerpAuction => perp_auction::DEFAULT_INTERVAL_MS,
        })
    }

    /// Instantiates the source against the given base URLs.
    pub fn build(self, endpoints: &Endpoints, ttl: CacheTtl, top_n: usize) -> Arc<dyn Source> {
        match self {
            Self::PerpMarkets => Arc::new(PerpMarketsSource::new(&endpoints.info_url, ttl)),
            Self::SpotMarkets => Arc::new(SpotMarketsSource::new(&endpoints.info_url, ttl)),
            Self::Vaults => Arc::new(VaultsSource::new(&endpoints.stats_url, ttl)),
            Self::Validators => Arc::new(ValidatorsSource::new(&endpoints.info_url, ttl)),
            Self::Leaderboard => {
                Arc::new(LeaderboardSource::new(&endpoints.stats_url, ttl, top_n))
            }
            Self::PerpAuction => Arc::new(PerpAuctionSource::new(&endpoints.info_url, ttl)),
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| MirrorError::UnknownSource {
                name: value.to_owned(),
            })
    }
}

/// Upstream base URLs shared by every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub info_url: String,
    pub stats_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            info_url: DEFAULT_INFO_URL.to_owned(),
            stats_url: DEFAULT_STATS_URL.to_owned(),
        }
    }
}
