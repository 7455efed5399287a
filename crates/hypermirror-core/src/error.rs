use thiserror::Error;

use crate::fabric::CacheError;
use crate::http_client::HttpError;

/// Top-level error type for ingestion and read-through operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("circuit for '{source_name}' is open, next probe in {retry_in_ms}ms")]
    CircuitOpen {
        source_name: String,
        retry_in_ms: u64,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("unexpected '{source_name}' payload: {message} (sample: {sample})")]
    Transform {
        source_name: String,
        message: String,
        sample: String,
    },

    #[error("'{key}' is unavailable: '{source_name}' has not produced it")]
    DataUnavailable { source_name: String, key: String },

    #[error("'{source_name}' attempted to write '{key}', which it does not own")]
    KeyNotOwned { source_name: String, key: String },

    #[error("key '{key}' is claimed by both '{first}' and '{second}'")]
    DuplicateKeyOwner {
        key: String,
        first: String,
        second: String,
    },

    #[error("source '{name}' is not registered")]
    UnknownSource { name: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MirrorError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Http(error) if error.is_timeout() => "upstream.timeout",
            Self::Http(_) => "upstream.transport",
            Self::CircuitOpen { .. } => "upstream.circuit_open",
            Self::Cache(_) => "cache",
            Self::Transform { .. } => "source.transform",
            Self::DataUnavailable { .. } => "source.data_unavailable",
            Self::KeyNotOwned { .. } | Self::DuplicateKeyOwner { .. } => "source.key_ownership",
            Self::UnknownSource { .. } => "source.unknown",
            Self::Serialization(_) => "serialization",
        }
    }
}
