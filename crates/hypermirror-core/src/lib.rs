//! Core of hypermirror.
//!
//! This crate contains:
//! - A guarded HTTP client with hard timeouts and linear retry
//! - Per-source circuit breakers and weighted sliding-window rate limiters
//! - The cache/pub-sub fabric and update events
//! - The generic source poller and the built-in upstream sources
//! - Configuration and runtime wiring
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`http_client`] | Transport contract and reqwest implementation |
//! | [`guarded_client`] | Timeout, retry and outbound budget around a transport |
//! | [`circuit_breaker`] | Per-source failure gating |
//! | [`rate_limit`] | Inbound weighted admission per identity |
//! | [`fabric`] | Cache with TTLs and topic fan-out |
//! | [`poller`] | Fetch, transform, cache and publish cycle |
//! | [`sources`] | Built-in upstream datasets |
//! | [`runtime`] | Process-wide wiring |

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod fabric;
pub mod guarded_client;
pub mod http_client;
pub mod poller;
pub mod rate_limit;
pub mod retry;
pub mod runtime;
pub mod source;
pub mod sources;
pub mod throttling;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
pub use config::{load_config, ConfigError, MirrorConfig, ResolvedSource, SourceSettings};
pub use error::MirrorError;
pub use events::{updated_topic, UpdateEvent, UpdateKind};
pub use fabric::{
    get_json, set_json, CacheError, CacheFabric, CacheTtl, MemoryFabric, MessageHandler,
    Subscription,
};
pub use guarded_client::{GuardedClient, GuardedClientConfig};
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use poller::{CycleOutcome, CycleReport, PollerPhase, PollerSchedule, PollerStatus, SourcePoller};
pub use rate_limit::{RateLimitConfig, RateLimiterRegistry, WeightedRateLimiter};
pub use retry::RetryConfig;
pub use runtime::{MirrorRuntime, MirrorRuntimeBuilder, SourceReport};
pub use source::{CacheWrite, Source, Transformed};
pub use sources::{Endpoints, SourceId};
pub use throttling::OutboundBudget;
