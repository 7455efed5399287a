//! File-based configuration.
//!
//! Every field has a default, so an empty TOML document yields a working
//! mirror against the public endpoints:
//!
//! ```toml
//! [http]
//! timeout_ms = 5000
//! retry_attempts = 3
//! retry_base_delay_ms = 1000
//!
//! [breaker]
//! max_failures = 5
//! reset_timeout_ms = 30000
//!
//! [sources.leaderboard]
//! interval_ms = 120000
//! top_n = 50
//!
//! [rate_limits.vaults]
//! max_weight_per_minute = 600
//! request_weight = 20
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::fabric::{CacheTtl, DEFAULT_TTL};
use crate::guarded_client::{GuardedClientConfig, DEFAULT_TIMEOUT};
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;
use crate::sources::leaderboard::DEFAULT_TOP_N;
use crate::sources::{Endpoints, SourceId};

pub const DEFAULT_LOG_FILTER: &str = "hypermirror=info";

/// Upper bound for any configured TTL: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub endpoints: Endpoints,
    pub http: HttpSettings,
    pub breaker: BreakerSettings,
    pub cache: CacheSettings,
    pub outbound: OutboundSettings,
    pub logging: LoggingSettings,
    pub sources: BTreeMap<SourceId, SourceSettings>,
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            retry_attempts: retry.attempts,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            user_agent: format!("hypermirror/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpSettings {
    pub fn client_config(&self) -> GuardedClientConfig {
        GuardedClientConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryConfig::linear(
                self.retry_attempts,
                Duration::from_millis(self.retry_base_delay_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub max_failures: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            max_failures: config.max_failures,
            reset_timeout_ms: config.reset_timeout.as_millis() as u64,
        }
    }
}

impl BreakerSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.max_failures,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    /// Period of the maintenance pass that drops expired records and idle
    /// limiter windows.
    pub maintenance_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL.as_secs(),
            maintenance_interval_ms: 60_000,
        }
    }
}

/// Shared budget for calls to the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundSettings {
    pub enabled: bool,
    pub max_weight_per_minute: u32,
    pub request_weight: u32,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        let limits = RateLimitConfig::default();
        Self {
            enabled: true,
            max_weight_per_minute: limits.max_weight_per_minute,
            request_weight: limits.request_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

/// Per-source overrides. Unset fields fall back to the source's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// `0` stores the dataset without expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: None,
            ttl_secs: None,
            top_n: None,
        }
    }
}

/// Resolved settings for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSource {
    pub id: SourceId,
    pub enabled: bool,
    pub interval: Duration,
    pub ttl: CacheTtl,
    pub top_n: usize,
}

impl MirrorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    pub fn rate_limit_defaults(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_weight_per_minute: self.outbound.max_weight_per_minute,
            request_weight: self.outbound.request_weight,
        }
    }

    pub fn source(&self, id: SourceId) -> ResolvedSource {
        let settings = self.sources.get(&id).cloned().unwrap_or_default();
        ResolvedSource {
            id,
            enabled: settings.enabled,
            interval: settings
                .interval_ms
                .map_or_else(|| id.default_interval(), Duration::from_millis),
            ttl: match settings.ttl_secs {
                None => CacheTtl::Default,
                Some(0) => CacheTtl::Persistent,
                Some(secs) => CacheTtl::Custom(Duration::from_secs(secs)),
            },
            top_n: settings.top_n.unwrap_or(DEFAULT_TOP_N),
        }
    }

    /// Resolved settings for every known source, in declaration order.
    pub fn resolved_sources(&self) -> Vec<ResolvedSource> {
        SourceId::ALL.into_iter().map(|id| self.source(id)).collect()
    }

    /// Collects every semantic problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for (field, url) in [
            ("endpoints.info_url", &self.endpoints.info_url),
            ("endpoints.stats_url", &self.endpoints.stats_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("{field} must be an http(s) URL, got '{url}'"));
            }
        }
        if self.http.timeout_ms == 0 {
            problems.push(String::from("http.timeout_ms must be greater than 0"));
        }
        if self.http.retry_attempts == 0 {
            problems.push(String::from("http.retry_attempts must be at least 1"));
        }
        if self.breaker.max_failures == 0 {
            problems.push(String::from("breaker.max_failures must be at least 1"));
        }
        if self.cache.default_ttl_secs == 0 {
            problems.push(String::from("cache.default_ttl_secs must be greater than 0"));
        }
        if self.cache.default_ttl_secs > MAX_TTL_SECS {
            problems.push(format!(
                "cache.default_ttl_secs must be at most {MAX_TTL_SECS}"
            ));
        }
        if self.cache.maintenance_interval_ms == 0 {
            problems.push(String::from("cache.maintenance_interval_ms must be greater than 0"));
        }
        if self.outbound.enabled {
            check_limits(
                "outbound",
                &self.rate_limit_defaults(),
                &mut problems,
            );
        }
        for (id, settings) in &self.sources {
            if settings.interval_ms == Some(0) {
                problems.push(format!("sources.{id}.interval_ms must be greater than 0"));
            }
            if settings.ttl_secs.is_some_and(|secs| secs > MAX_TTL_SECS) {
                problems.push(format!(
                    "sources.{id}.ttl_secs must be at most {MAX_TTL_SECS} (0 keeps records forever)"
                ));
            }
            if settings.top_n == Some(0) {
                problems.push(format!("sources.{id}.top_n must be at least 1"));
            }
        }
        for (name, limits) in &self.rate_limits {
            check_limits(&format!("rate_limits.{name}"), limits, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

fn check_limits(section: &str, limits: &RateLimitConfig, problems: &mut Vec<String>) {
    if limits.request_weight == 0 {
        problems.push(format!("{section}.request_weight must be at least 1"));
    }
    if limits.request_weight > limits.max_weight_per_minute {
        problems.push(format!(
            "{section}.request_weight ({}) exceeds max_weight_per_minute ({})",
            limits.request_weight, limits.max_weight_per_minute
        ));
    }
}

/// Loads `path`, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<MirrorConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(MirrorConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    MirrorConfig::from_toml_str(&raw)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MirrorConfig::from_toml_str("").expect("empty config is valid");

        assert_eq!(config, MirrorConfig::default());
        assert_eq!(config.http.client_config().timeout, Duration::from_secs(5));
        assert_eq!(config.breaker.breaker_config().max_failures, 5);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);

        let vaults = config.source(SourceId::Vaults);
        assert!(vaults.enabled);
        assert_eq!(vaults.interval, Duration::from_secs(30));
        assert_eq!(vaults.ttl, CacheTtl::Default);
    }

    #[test]
    fn source_sections_override_defaults() {
        let config = MirrorConfig::from_toml_str(
            r#"
            [sources.leaderboard]
            interval_ms = 120000
            top_n = 25
            ttl_secs = 600

            [sources.perp_auction]
            enabled = false
            ttl_secs = 0
            "#,
        )
        .expect("valid config");

        let leaderboard = config.source(SourceId::Leaderboard);
        assert_eq!(leaderboard.interval, Duration::from_secs(120));
        assert_eq!(leaderboard.top_n, 25);
        assert_eq!(leaderboard.ttl, CacheTtl::Custom(Duration::from_secs(600)));

        let auction = config.source(SourceId::PerpAuction);
        assert!(!auction.enabled);
        assert_eq!(auction.ttl, CacheTtl::Persistent);
    }

    #[test]
    fn validation_reports_every_problem() {
        let error = MirrorConfig::from_toml_str(
            r#"
            [http]
            timeout_ms = 0

            [breaker]
            max_failures = 0

            [rate_limits.vaults]
            max_weight_per_minute = 10
            request_weight = 20
            "#,
        )
        .expect_err("config is invalid");

        match error {
            ConfigError::Validation(problems) => {
                assert_eq!(problems.len(), 3, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("rate_limits.vaults")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        let error = MirrorConfig::from_toml_str(
            "[cache]\ndefault_ttl_secs = 9223372036854775807\n\n[sources.vaults]\nttl_secs = 9223372036854775807\n",
        )
        .expect_err("ttl beyond a year is invalid");

        match error {
            ConfigError::Validation(problems) => {
                assert_eq!(problems.len(), 2, "{problems:?}");
                assert!(problems.iter().any(|p| p.starts_with("cache.default_ttl_secs")));
                assert!(problems.iter().any(|p| p.starts_with("sources.vaults.ttl_secs")));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let year = MirrorConfig::from_toml_str(&format!(
            "[sources.vaults]\nttl_secs = {MAX_TTL_SECS}\n"
        ))
        .expect("one year is allowed");
        assert_eq!(
            year.source(SourceId::Vaults).ttl,
            CacheTtl::Custom(Duration::from_secs(MAX_TTL_SECS))
        );
    }

    #[test]
    fn unknown_source_section_is_a_parse_error() {
        let error = MirrorConfig::from_toml_str("[sources.orderbook]\nenabled = true\n")
            .expect_err("unknown source");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file_and_renders_back() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[outbound]\nmax_weight_per_minute = 600").expect("write config");

        let config = load_config(Some(file.path())).expect("config loads");
        assert_eq!(config.outbound.max_weight_per_minute, 600);

        let rendered = config.to_toml_string().expect("renders");
        let reparsed = MirrorConfig::from_toml_str(&rendered).expect("round trips");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_file_reports_path() {
        let error = load_config(Some(Path::new("/nonexistent/hypermirror.toml")))
            .expect_err("missing file");
        assert!(error.to_string().contains("/nonexistent/hypermirror.toml"));
    }
}
