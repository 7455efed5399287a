//! Periodic fetch → transform → cache → publish cycle for one source.
//!
//! # Phases
//!
//! ```text
//! Idle ─▶ Fetching ─▶ Transforming ─▶ Publishing ─▶ Idle
//!   ▲          │             │              │
//!   └──────────┴─────────────┴──────────────┘  failure (previous data kept)
//! ```
//!
//! At most one cycle runs per poller. Scheduled ticks are spawned off the
//! timer, so a slow upstream never shifts the schedule; a tick that finds a
//! cycle in flight is skipped, not queued. Stopping cancels future ticks
//! only; an in-flight cycle always finishes.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex as CycleLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::MirrorError;
use crate::events::{epoch_millis, UpdateEvent};
use crate::fabric::{CacheFabric, CacheTtl};
use crate::guarded_client::GuardedClient;
use crate::source::{Source, Transformed};

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    #[default]
    Idle,
    Fetching,
    Transforming,
    Publishing,
}

/// Timer view of a poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerSchedule {
    pub interval_ms: u64,
    /// Epoch milliseconds of the last cycle start.
    pub last_run_at: Option<i64>,
    pub running: bool,
}

/// Cycle bookkeeping exposed for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    pub phase: PollerPhase,
    pub last_run_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub last_error: Option<String>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub records_written: usize,
    pub subscribers_notified: usize,
    pub event: UpdateEvent,
}

/// What a scheduled tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Updated(CycleReport),
    /// Another cycle was in flight.
    Skipped,
    /// The cycle failed; the error has been logged.
    Failed,
}

/// Owns the polling loop for one [`Source`].
pub struct SourcePoller {
    source: Arc<dyn Source>,
    client: GuardedClient,
    breaker: Arc<CircuitBreaker>,
    fabric: Arc<dyn CacheFabric>,
    interval: Duration,
    cycle: CycleLock<()>,
    status: Mutex<PollerStatus>,
    schedule: Mutex<Option<JoinHandle<()>>>,
}

impl SourcePoller {
    pub fn new(
        source: Arc<dyn Source>,
        client: GuardedClient,
        breaker: Arc<CircuitBreaker>,
        fabric: Arc<dyn CacheFabric>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            client,
            breaker,
            fabric,
            interval: interval.max(Duration::from_millis(1)),
            cycle: CycleLock::new(()),
            status: Mutex::new(PollerStatus::default()),
            schedule: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one cycle now and then every `interval`. Returns `false` and
    /// changes nothing if the poller is already running.
    pub fn start_polling(self: &Arc<Self>) -> bool {
        let mut schedule = self
            .schedule
            .lock()
            .expect("poller schedule lock is not poisoned");
        if schedule.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!(source = %self.name(), "poller already running, start ignored");
            return false;
        }

        let poller: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        *schedule = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(poller) = poller.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    poller.tick().await;
                });
            }
        }));

        info!(
            source = %self.name(),
            interval_ms = interval.as_millis() as u64,
            "poller started"
        );
        true
    }

    /// Cancels future ticks. Safe to call when not running.
    pub fn stop_polling(&self) -> bool {
        let task = self
            .schedule
            .lock()
            .expect("poller schedule lock is not poisoned")
            .take();
        match task {
            Some(task) => {
                task.abort();
                info!(source = %self.name(), "poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .expect("poller schedule lock is not poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn schedule(&self) -> PollerSchedule {
        PollerSchedule {
            interval_ms: self.interval.as_millis() as u64,
            last_run_at: self.status().last_run_at,
            running: self.is_running(),
        }
    }

    pub fn status(&self) -> PollerStatus {
        self.status
            .lock()
            .expect("poller status lock is not poisoned")
            .clone()
    }

    /// Scheduled entry point. Never returns an error: failures are logged and
    /// the previous cache contents stay in place.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!(source = %self.name(), "previous cycle still running, tick skipped");
            self.update_status(|status| status.cycles_skipped += 1);
            return CycleOutcome::Skipped;
        };

        match self.run_tracked().await {
            Ok(report) => CycleOutcome::Updated(report),
            Err(error) => {
                error!(
                    source = %self.name(),
                    code = error.code(),
                    consecutive_failures = self.breaker.consecutive_failures(),
                    error = %error,
                    "poll cycle failed, keeping previous data"
                );
                CycleOutcome::Failed
            }
        }
    }

    /// Forces a cycle, waiting for any in-flight one first.
    ///
    /// # Errors
    ///
    /// Propagates the cycle's failure.
    pub async fn refresh(&self) -> Result<CycleReport, MirrorError> {
        let _guard = self.cycle.lock().await;
        self.run_tracked().await
    }

    /// Read-through access to `key`.
    ///
    /// Served from the cache when present. On a miss one cycle is forced
    /// synchronously and the cache is read once more.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Cache`] if the fabric cannot be reached
    /// - the forced cycle's error if it failed
    /// - [`MirrorError::DataUnavailable`] if the key is still absent
    pub async fn read_through(&self, key: &str) -> Result<String, MirrorError> {
        if let Some(value) = self.fabric.get(key).await? {
            return Ok(value);
        }

        {
            let _guard = self.cycle.lock().await;
            // A cycle that was in flight while we waited may have filled it.
            if self.fabric.get(key).await?.is_none() {
                info!(source = %self.name(), key, "cache miss, refreshing synchronously");
                self.run_tracked().await?;
            }
        }

        self.fabric
            .get(key)
            .await?
            .ok_or_else(|| MirrorError::DataUnavailable {
                source_name: self.name().to_owned(),
                key: key.to_owned(),
            })
    }

    /// [`read_through`](Self::read_through) on the source's primary dataset,
    /// decoded as `T`.
    pub async fn read_primary<T: DeserializeOwned>(&self) -> Result<T, MirrorError> {
        let raw = self.read_through(self.source.primary_key()).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn run_tracked(&self) -> Result<CycleReport, MirrorError> {
        self.update_status(|status| {
            status.last_run_at = Some(epoch_millis(OffsetDateTime::now_utc()));
        });

        let result = self.run_cycle().await;

        self.update_status(|status| {
            status.phase = PollerPhase::Idle;
            match &result {
                Ok(report) => {
                    status.cycles_completed += 1;
                    status.last_success_at = Some(report.event.timestamp);
                    status.last_error = None;
                }
                Err(error) => {
                    status.cycles_failed += 1;
                    status.last_error = Some(error.to_string());
                }
            }
        });
        result
    }

    async fn run_cycle(&self) -> Result<CycleReport, MirrorError> {
        self.set_phase(PollerPhase::Fetching);
        let request = self.source.request();
        let client = &self.client;
        let response = self
            .breaker
            .execute(move || async move { client.request(request).await.map_err(MirrorError::from) })
            .await?;

        self.set_phase(PollerPhase::Transforming);
        let Transformed { mut writes, summary } = self.source.transform(&response.body)?;
        self.check_ownership(writes.iter().map(|write| write.key.as_str()))?;

        self.set_phase(PollerPhase::Publishing);
        let records_written = writes.len();
        // Writes are not atomic. Derived datasets go first so a fabric failure
        // midway leaves at worst a stale raw snapshot behind fresh data.
        writes.sort_by_key(|write| write.ttl == CacheTtl::Persistent);
        for write in writes {
            self.fabric.set(&write.key, write.value, write.ttl).await?;
        }

        let event = UpdateEvent::data_updated(summary);
        let subscribers_notified = self
            .fabric
            .publish(self.source.topic(), event.to_message()?)
            .await?;

        debug!(
            source = %self.name(),
            records_written,
            subscribers_notified,
            "poll cycle completed"
        );
        Ok(CycleReport {
            records_written,
            subscribers_notified,
            event,
        })
    }

    fn check_ownership<'a>(&self, keys: impl Iterator<Item = &'a str>) -> Result<(), MirrorError> {
        let owned = self.source.owned_keys();
        for key in keys {
            if !owned.contains(&key) {
                return Err(MirrorError::KeyNotOwned {
                    source_name: self.name().to_owned(),
                    key: key.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn set_phase(&self, phase: PollerPhase) {
        self.update_status(|status| status.phase = phase);
    }

    fn update_status(&self, apply: impl FnOnce(&mut PollerStatus)) {
        let mut status = self
            .status
            .lock()
            .expect("poller status lock is not poisoned");
        apply(&mut status);
    }
}

impl Drop for SourcePoller {
    fn drop(&mut self) {
        if let Ok(mut schedule) = self.schedule.lock() {
            if let Some(task) = schedule.take() {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for SourcePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePoller")
            .field("source", &self.name())
            .field("interval", &self.interval)
            .field("status", &self.status())
            .finish()
    }
}
