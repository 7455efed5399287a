//! Process-wide wiring: one fabric, shared registries and one poller per
//! enabled source.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot};
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::fabric::{CacheFabric, MemoryFabric};
use crate::guarded_client::GuardedClient;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::poller::{CycleReport, PollerSchedule, PollerStatus, SourcePoller};
use crate::rate_limit::{RateLimiterRegistry, WeightedRateLimiter};
use crate::source::Source;
use crate::sources::leaderboard::LeaderboardEntry;
use crate::sources::perp_auction::AuctionStatus;
use crate::sources::perp_markets::PerpMarket;
use crate::sources::spot_markets::SpotMarket;
use crate::sources::validators::Validator;
use crate::sources::vaults::VaultSummary;
use crate::sources::SourceId;
use crate::throttling::OutboundBudget;

/// Diagnostics for one poller.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub topic: String,
    pub keys: Vec<String>,
    pub schedule: PollerSchedule,
    pub status: PollerStatus,
    pub circuit: CircuitSnapshot,
}

/// Builder for [`MirrorRuntime`].
pub struct MirrorRuntimeBuilder {
    config: MirrorConfig,
    transport: Option<Arc<dyn HttpClient>>,
    fabric: Option<MemoryFabric>,
    extra_sources: Vec<(Arc<dyn Source>, Duration)>,
}

impl MirrorRuntimeBuilder {
    /// Replaces the reqwest transport, e.g. with a scripted one in tests.
    pub fn transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn fabric(mut self, fabric: MemoryFabric) -> Self {
        self.fabric = Some(fabric);
        self
    }

    /// Registers a source that is not part of the built-in set.
    pub fn source(mut self, source: Arc<dyn Source>, interval: Duration) -> Self {
        self.extra_sources.push((source, interval));
        self
    }

    /// # Errors
    ///
    /// - [`MirrorError::DuplicateKeyOwner`] if two sources claim the same key
    pub fn build(self) -> Result<MirrorRuntime, MirrorError> {
        let config = self.config;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(ReqwestHttpClient::with_user_agent(&config.http.user_agent))
        });
        let fabric = Arc::new(
            self.fabric
                .unwrap_or_else(|| MemoryFabric::new(config.default_ttl())),
        );
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.breaker_config()));
        let limiters = Arc::new(RateLimiterRegistry::new(
            config.rate_limit_defaults(),
            config.rate_limits.clone(),
        ));
        let budget = config
            .outbound
            .enabled
            .then(|| OutboundBudget::per_minute(config.outbound.max_weight_per_minute));

        let mut sources: Vec<(Arc<dyn Source>, Duration)> = config
            .resolved_sources()
            .into_iter()
            .filter(|resolved| resolved.enabled)
            .map(|resolved| {
                let source = resolved
                    .id
                    .build(&config.endpoints, resolved.ttl, resolved.top_n);
                (source, resolved.interval)
            })
            .collect();
        sources.extend(self.extra_sources);

        let mut owners: HashMap<String, String> = HashMap::new();
        for (source, _) in &sources {
            for key in source.owned_keys() {
                if let Some(first) = owners.insert(key.to_owned(), source.name().to_owned()) {
                    return Err(MirrorError::DuplicateKeyOwner {
                        key: key.to_owned(),
                        first,
                        second: source.name().to_owned(),
                    });
                }
            }
        }

        let shared_fabric: Arc<dyn CacheFabric> = fabric.clone();
        let pollers = sources
            .into_iter()
            .map(|(source, interval)| {
                let name = source.name().to_owned();
                let mut client = GuardedClient::new(transport.clone(), config.http.client_config());
                if let Some(budget) = &budget {
                    client = client.with_budget(budget.clone(), limiters.get(&name).request_weight());
                }
                let poller = SourcePoller::new(
                    source,
                    client,
                    breakers.get(&name),
                    shared_fabric.clone(),
                    interval,
                );
                (name, Arc::new(poller))
            })
            .collect();

        Ok(MirrorRuntime {
            config,
            fabric,
            breakers,
            limiters,
            pollers,
            maintenance: Mutex::new(None),
        })
    }
}

/// Owns every poller and the shared state they write to.
pub struct MirrorRuntime {
    config: MirrorConfig,
    fabric: Arc<MemoryFabric>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    pollers: BTreeMap<String, Arc<SourcePoller>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorRuntime {
    pub fn builder(config: MirrorConfig) -> MirrorRuntimeBuilder {
        MirrorRuntimeBuilder {
            config,
            transport: None,
            fabric: None,
            extra_sources: Vec::new(),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn fabric(&self) -> Arc<dyn CacheFabric> {
        self.fabric.clone()
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.pollers.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns [`MirrorError::UnknownSource`] for names without a poller,
    /// including built-in sources disabled in the config.
    pub fn poller(&self, name: &str) -> Result<&Arc<SourcePoller>, MirrorError> {
        self.pollers
            .get(name)
            .ok_or_else(|| MirrorError::UnknownSource {
                name: name.to_owned(),
            })
    }

    /// Arms every poller and the maintenance task.
    pub fn start(&self) {
        for poller in self.pollers.values() {
            poller.start_polling();
        }

        let mut maintenance = self
            .maintenance
            .lock()
            .expect("maintenance lock is not poisoned");
        if maintenance.is_none() {
            let fabric = self.fabric.clone();
            let limiters = self.limiters.clone();
            let every = Duration::from_millis(self.config.cache.maintenance_interval_ms);
            *maintenance = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately; there is nothing to clean yet.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let purged = fabric.purge_expired().await;
                    let evicted = limiters.evict_idle();
                    debug!(purged, evicted, "maintenance pass completed");
                }
            }));
        }
        info!(sources = self.pollers.len(), "mirror runtime started");
    }

    /// Cancels future cycles. In-flight cycles finish on their own.
    pub fn stop(&self) {
        for poller in self.pollers.values() {
            poller.stop_polling();
        }
        if let Some(task) = self
            .maintenance
            .lock()
            .expect("maintenance lock is not poisoned")
            .take()
        {
            task.abort();
        }
        info!("mirror runtime stopped");
    }

    /// Whether `identity` may make another weighted call against `source`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::UnknownSource`] unless `source` has a poller, so
    /// caller-supplied names never create limiters.
    pub fn check_rate_limit(&self, source: &str, identity: &str) -> Result<bool, MirrorError> {
        Ok(self.limiter(source)?.check_rate_limit(identity))
    }

    pub fn request_weight(&self, source: &str) -> Result<u32, MirrorError> {
        Ok(self.limiter(source)?.request_weight())
    }

    /// Remaining weight for `identity` in the current window.
    pub fn remaining_weight(&self, source: &str, identity: &str) -> Result<u32, MirrorError> {
        Ok(self.limiter(source)?.remaining(identity))
    }

    /// Forces one cycle for `name`.
    pub async fn refresh(&self, name: &str) -> Result<CycleReport, MirrorError> {
        self.poller(name)?.refresh().await
    }

    /// Read-through access to a source's primary dataset as untyped JSON.
    pub async fn read(&self, name: &str) -> Result<Value, MirrorError> {
        self.read_primary(name).await
    }

    pub async fn perp_markets(&self) -> Result<Vec<PerpMarket>, MirrorError> {
        self.read_primary(SourceId::PerpMarkets.as_str()).await
    }

    pub async fn spot_markets(&self) -> Result<Vec<SpotMarket>, MirrorError> {
        self.read_primary(SourceId::SpotMarkets.as_str()).await
    }

    pub async fn vaults(&self) -> Result<Vec<VaultSummary>, MirrorError> {
        self.read_primary(SourceId::Vaults.as_str()).await
    }

    pub async fn validators(&self) -> Result<Vec<Validator>, MirrorError> {
        self.read_primary(SourceId::Validators.as_str()).await
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, MirrorError> {
        self.read_primary(SourceId::Leaderboard.as_str()).await
    }

    pub async fn perp_auction(&self) -> Result<AuctionStatus, MirrorError> {
        self.read_primary(SourceId::PerpAuction.as_str()).await
    }

    pub fn reports(&self) -> Vec<SourceReport> {
        self.pollers
            .values()
            .map(|poller| SourceReport {
                name: poller.name().to_owned(),
                topic: poller.source().topic().to_owned(),
                keys: poller
                    .source()
                    .owned_keys()
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
                schedule: poller.schedule(),
                status: poller.status(),
                circuit: poller.breaker().snapshot(),
            })
            .collect()
    }

    fn limiter(&self, source: &str) -> Result<Arc<WeightedRateLimiter>, MirrorError> {
        self.poller(source)?;
        Ok(self.limiters.get(source))
    }

    async fn read_primary<T: DeserializeOwned>(&self, name: &str) -> Result<T, MirrorError> {
        self.poller(name)?.read_primary().await
    }
}

impl Drop for MirrorRuntime {
    fn drop(&mut self) {
        if let Ok(mut maintenance) = self.maintenance.lock() {
            if let Some(task) = maintenance.take() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for MirrorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorRuntime")
            .field("sources", &self.pollers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fabric::CacheTtl;
    use crate::http_client::{HttpError, HttpRequest, HttpResponse};
    use crate::source::{CacheWrite, Transformed};

    #[derive(Default)]
    struct CountingHttpClient {
        calls: AtomicUsize,
    }

    impl HttpClient for CountingHttpClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Ok(HttpResponse::ok_json(
                    r#"{"startTimeSeconds": 0, "durationSeconds": 10, "startGas": "500"}"#,
                ))
            })
        }
    }

    struct ShadowSource;

    impl Source for ShadowSource {
        fn name(&self) -> &str {
            "shadow"
        }
        fn topic(&self) -> &str {
            "shadow:updated"
        }
        fn primary_key(&self) -> &str {
            "vaults:filtered_list"
        }
        fn owned_keys(&self) -> Vec<&str> {
            vec!["vaults:filtered_list"]
        }
        fn request(&self) -> HttpRequest {
            HttpRequest::get("https://api.example.test/shadow")
        }
        fn transform(&self, body: &str) -> Result<Transformed, MirrorError> {
            Ok(Transformed::new().write(CacheWrite::raw(self.primary_key(), body, CacheTtl::Default)))
        }
    }

    fn only(id: SourceId) -> MirrorConfig {
        let mut config = MirrorConfig::default();
        for other in SourceId::ALL {
            config.sources.entry(other).or_default().enabled = other == id;
        }
        config
    }

    #[test]
    fn builds_one_poller_per_enabled_source() {
        let runtime = MirrorRuntime::builder(only(SourceId::Vaults))
            .transport(Arc::new(CountingHttpClient::default()))
            .build()
            .expect("runtime builds");

        assert_eq!(runtime.source_names().collect::<Vec<_>>(), vec!["vaults"]);
        let error = runtime.poller("validators").expect_err("disabled source");
        assert_eq!(error.code(), "source.unknown");
    }

    #[test]
    fn rejects_two_owners_for_one_key() {
        let error = MirrorRuntime::builder(only(SourceId::Vaults))
            .transport(Arc::new(CountingHttpClient::default()))
            .source(Arc::new(ShadowSource), Duration::from_secs(1))
            .build()
            .expect_err("duplicate owner");

        match error {
            MirrorError::DuplicateKeyOwner { key, first, second } => {
                assert_eq!(key, "vaults:filtered_list");
                assert_eq!((first.as_str(), second.as_str()), ("vaults", "shadow"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_queries_use_per_source_overrides() {
        let mut config = MirrorConfig::default();
        config.rate_limits.insert(
            String::from("vaults"),
            crate::rate_limit::RateLimitConfig {
                max_weight_per_minute: 40,
                request_weight: 20,
            },
        );
        let runtime = MirrorRuntime::builder(config)
            .transport(Arc::new(CountingHttpClient::default()))
            .build()
            .expect("runtime builds");

        assert_eq!(runtime.request_weight("vaults").unwrap(), 20);
        assert!(runtime.check_rate_limit("vaults", "10.0.0.1").unwrap());
        assert!(runtime.check_rate_limit("vaults", "10.0.0.1").unwrap());
        assert!(!runtime.check_rate_limit("vaults", "10.0.0.1").unwrap());
        assert_eq!(runtime.remaining_weight("vaults", "10.0.0.1").unwrap(), 0);
        assert!(runtime.check_rate_limit("validators", "10.0.0.1").unwrap());
    }

    #[test]
    fn rate_limit_queries_refuse_unregistered_sources() {
        let runtime = MirrorRuntime::builder(only(SourceId::Vaults))
            .transport(Arc::new(CountingHttpClient::default()))
            .build()
            .expect("runtime builds");
        let limiters_before = runtime.limiters.len();

        for name in ["orderbook", "validators", "x-forwarded-junk"] {
            assert!(matches!(
                runtime.check_rate_limit(name, "10.0.0.1"),
                Err(MirrorError::UnknownSource { .. })
            ));
            assert!(runtime.request_weight(name).is_err());
            assert!(runtime.remaining_weight(name, "10.0.0.1").is_err());
        }

        assert_eq!(runtime.limiters.len(), limiters_before);
        assert!(runtime.check_rate_limit("vaults", "10.0.0.1").unwrap());
    }

    #[tokio::test]
    async fn typed_getter_reads_through_once() {
        let transport = Arc::new(CountingHttpClient::default());
        let runtime = MirrorRuntime::builder(only(SourceId::PerpAuction))
            .transport(transport.clone())
            .build()
            .expect("runtime builds");

        let first = runtime.perp_auction().await.expect("cold read refreshes");
        let second = runtime.perp_auction().await.expect("warm read");

        assert_eq!(first, second);
        assert_eq!(first.end_time_seconds, 10);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_every_poller() {
        let runtime = MirrorRuntime::builder(only(SourceId::PerpAuction))
            .transport(Arc::new(CountingHttpClient::default()))
            .build()
            .expect("runtime builds");

        runtime.start();
        assert!(runtime.reports().iter().all(|report| report.schedule.running));

        runtime.stop();
        assert!(runtime.reports().iter().all(|report| !report.schedule.running));
    }
}
