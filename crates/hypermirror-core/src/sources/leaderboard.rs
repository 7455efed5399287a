//! Trader leaderboard, ranked by all-time PnL and truncated to the top N.

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::HttpRequest;
use crate::source::{decimal, parse_body, CacheWrite, Decimal, Source, Transformed};

pub const NAME: &str = "leaderboard";
pub const TOP_KEY: &str = "leaderboard:top";
pub const TOPIC: &str = "leaderboard:top:updated";
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_TOP_N: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowPerformance {
    pub pnl: f64,
    pub roi: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub address: String,
    pub display_name: Option<String>,
    pub account_value: Option<f64>,
    pub day: WindowPerformance,
    pub week: WindowPerformance,
    pub month: WindowPerformance,
    pub all_time: WindowPerformance,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLeaderboard {
    leaderboard_rows: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRow {
    eth_address: String,
    display_name: Option<String>,
    account_value: Option<Decimal>,
    #[serde(default)]
    window_performances: Vec<(String, RawPerformance)>,
}

#[derive(Debug, Deserialize)]
struct RawPerformance {
    pnl: Option<Decimal>,
    roi: Option<Decimal>,
    vlm: Option<Decimal>,
}

impl RawRow {
    fn window(&self, name: &str) -> WindowPerformance {
        self.window_performances
            .iter()
            .find(|(window, _)| window == name)
            .map(|(_, perf)| WindowPerformance {
                pnl: decimal(&perf.pnl).unwrap_or(0.0),
                roi: decimal(&perf.roi).unwrap_or(0.0),
                volume: decimal(&perf.vlm).unwrap_or(0.0),
            })
            .unwrap_or_default()
    }
}

/// Mirrors `GET <stats>/leaderboard`.
#[derive(Debug, Clone)]
pub struct LeaderboardSource {
    stats_url: String,
    ttl: CacheTtl,
    top_n: usize,
}

impl LeaderboardSource {
    pub fn new(stats_url: impl Into<String>, ttl: CacheTtl, top_n: usize) -> Self {
        Self {
            stats_url: stats_url.into(),
            ttl,
            top_n,
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }
}

impl Source for LeaderboardSource {
    fn name(&self) -> &str {
        NAME
    }

    fn topic(&self) -> &str {
        TOPIC
    }

    fn primary_key(&self) -> &str {
        TOP_KEY
    }

    fn owned_keys(&self) -> Vec<&str> {
        vec![TOP_KEY]
    }

    fn request(&self) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/leaderboard",
            self.stats_url.trim_end_matches('/')
        ))
    }

    fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
        let raw: RawLeaderboard = parse_body(NAME, body)?;
        let total = raw.leaderboard_rows.len();

        let mut entries: Vec<LeaderboardEntry> = raw
            .leaderboard_rows
            .iter()
            .map(|row| LeaderboardEntry {
                rank: 0,
                address: row.eth_address.clone(),
                display_name: row.display_name.clone(),
                account_value: decimal(&row.account_value),
                day: row.window("day"),
                week: row.window("week"),
                month: row.window("month"),
                all_time: row.window("allTime"),
            })
            .collect();
        entries.sort_by(|a, b| b.all_time.pnl.total_cmp(&a.all_time.pnl));
        entries.truncate(self.top_n);
        for (position, entry) in entries.iter_mut().enumerate() {
            entry.rank = position + 1;
        }

        Ok(Transformed::new()
            .write(CacheWrite::json(TOP_KEY, &entries, self.ttl)?)
            .with_summary("count", entries.len())
            .with_summary("totalTraders", total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: &str, all_time_pnl: &str) -> String {
        format!(
            r#"{{"ethAddress": "{address}", "accountValue": "1000", "displayName": null,
                "windowPerformances": [
                    ["day", {{"pnl": "1", "roi": "0.01", "vlm": "10"}}],
                    ["allTime", {{"pnl": "{all_time_pnl}", "roi": "0.5", "vlm": "99"}}]
                ]}}"#
        )
    }

    #[test]
    fn ranks_by_all_time_pnl_and_keeps_top_n() {
        let body = format!(
            r#"{{"leaderboardRows": [{}, {}, {}]}}"#,
            row("0xa", "10"),
            row("0xb", "300"),
            row("0xc", "-5")
        );
        let source = LeaderboardSource::new("https://stats.example.test", CacheTtl::Default, 2);

        let transformed = source.transform(&body).expect("valid payload");
        let entries: Vec<LeaderboardEntry> =
            serde_json::from_str(&transformed.writes[0].value).expect("entries json");

        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].rank, entries[0].address.as_str()), (1, "0xb"));
        assert_eq!((entries[1].rank, entries[1].address.as_str()), (2, "0xa"));
        assert_eq!(entries[0].all_time.volume, 99.0);
        assert_eq!(entries[0].day.pnl, 1.0);
        assert_eq!(entries[0].week, WindowPerformance::default(), "missing window");
        assert_eq!(transformed.summary["totalTraders"], 3);
    }

    #[test]
    fn missing_rows_field_is_a_transform_error() {
        let source = LeaderboardSource::new("https://stats.example.test", CacheTtl::Default, 10);
        let error = source.transform("[]").expect_err("expected an object");
        assert!(matches!(error, MirrorError::Transform { .. }));
    }
}
