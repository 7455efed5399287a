//! Source contract implemented by every mirrored upstream dataset.
//!
//! A source describes *what* to fetch and how to reshape it; the
//! [`SourcePoller`](crate::poller::SourcePoller) owns *when* and handles
//! breakers, retries, cache writes and notifications.
//!
//! # Required Methods
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`name`](Source::name) | Registry key for breaker, limiter and config |
//! | [`topic`](Source::topic) | Pub/sub topic announcing refreshes |
//! | [`primary_key`](Source::primary_key) | Dataset served by read-through getters |
//! | [`owned_keys`](Source::owned_keys) | Every key this source may write |
//! | [`request`](Source::request) | Outbound request for one cycle |
//! | [`transform`](Source::transform) | Raw body to cache writes |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MirrorError;
use crate::fabric::CacheTtl;
use crate::http_client::{snippet, HttpRequest};

const SAMPLE_LIMIT: usize = 512;

/// One record a cycle will store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWrite {
    pub key: String,
    pub value: String,
    pub ttl: CacheTtl,
}

impl CacheWrite {
    pub fn json<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
        ttl: CacheTtl,
    ) -> Result<Self, MirrorError> {
        Ok(Self {
            key: key.into(),
            value: serde_json::to_string(value)?,
            ttl,
        })
    }

    /// Stores the upstream body as-is.
    pub fn raw(key: impl Into<String>, body: &str, ttl: CacheTtl) -> Self {
        Self {
            key: key.into(),
            value: body.to_owned(),
            ttl,
        }
    }
}

/// Output of a successful transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub writes: Vec<CacheWrite>,
    pub summary: Map<String, Value>,
}

impl Transformed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, write: CacheWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn with_summary(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.summary.insert(field.to_owned(), value.into());
        self
    }
}

/// Upstream dataset contract.
///
/// Implementations must be `Send + Sync`; pollers run on the multi-threaded
/// runtime.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn topic(&self) -> &str;

    fn primary_key(&self) -> &str;

    fn owned_keys(&self) -> Vec<&str>;

    fn request(&self) -> HttpRequest;

    /// Reshapes a successful response body into cache writes.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Transform`] when the body does not have the
    /// expected shape. Nothing is written in that case.
    fn transform(&self, body: &str) -> Result<Transformed, MirrorError>;
}

/// Builds a [`MirrorError::Transform`] carrying a bounded sample of `body`.
pub fn transform_error(source: &str, message: impl Into<String>, body: &str) -> MirrorError {
    MirrorError::Transform {
        source_name: source.to_owned(),
        message: message.into(),
        sample: snippet(body, SAMPLE_LIMIT),
    }
}

/// Deserializes `body`, mapping failures to a transform error.
pub fn parse_body<T: DeserializeOwned>(source: &str, body: &str) -> Result<T, MirrorError> {
    serde_json::from_str(body).map_err(|e| transform_error(source, e.to_string(), body))
}

/// Upstream number that may arrive either as a JSON number or as a decimal
/// string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Decimal {
    Number(f64),
    Text(String),
}

impl Decimal {
    /// Finite value, or `None` for unparsable text and NaN/infinity.
    pub fn value(&self) -> Option<f64> {
        let parsed = match self {
            Self::Number(value) => Some(*value),
            Self::Text(raw) => raw.trim().parse::<f64>().ok(),
        };
        parsed.filter(|value| value.is_finite())
    }
}

/// Value of an optional upstream decimal.
pub fn decimal(value: &Option<Decimal>) -> Option<f64> {
    value.as_ref().and_then(Decimal::value)
}

/// Percent change from `previous` to `current`; `None` when undefined.
pub fn percent_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(current), Some(previous)) if previous != 0.0 => {
            Some((current - previous) / previous * 100.0)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_accept_numbers_and_strings() {
        let parsed: Vec<Option<Decimal>> =
            serde_json::from_str(r#"["12.5", 3, " 7 ", "NaN", "abc", null]"#).unwrap();
        let values: Vec<Option<f64>> = parsed.iter().map(decimal).collect();

        assert_eq!(values, vec![Some(12.5), Some(3.0), Some(7.0), None, None, None]);
    }

    #[test]
    fn percent_change_handles_zero_baseline() {
        assert_eq!(percent_change(Some(110.0), Some(100.0)), Some(10.0));
        assert_eq!(percent_change(Some(1.0), Some(0.0)), None);
        assert_eq!(percent_change(None, Some(1.0)), None);
    }

    #[test]
    fn transform_error_keeps_a_bounded_sample() {
        let body = "x".repeat(4_096);
        let error = transform_error("vaults", "expected array", &body);

        match error {
            MirrorError::Transform { sample, message, .. } => {
                assert_eq!(message, "expected array");
                assert!(sample.len() <= SAMPLE_LIMIT + '…'.len_utf8());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
