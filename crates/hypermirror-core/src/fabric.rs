//! Shared key/value cache with expiry plus topic publish/subscribe.
//!
//! The fabric is the single source of truth downstream readers consult.
//! Pub/sub is at-most-once: a handler sees each message published while it is
//! subscribed at most once, and a subscriber that falls behind skips what it
//! missed instead of receiving a backlog. Consumers treat events as hints and
//! re-read the cache.
//!
//! An unreachable fabric raises [`CacheError::Unavailable`] from every
//! operation, `get` included, so read-through callers can tell "absent" apart
//! from "cannot know".

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
const TOPIC_CAPACITY: usize = 64;

/// Fabric-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache fabric is unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Expiry policy for a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTtl {
    /// The fabric's default TTL.
    #[default]
    Default,
    Custom(Duration),
    /// Lives until overwritten or deleted.
    Persistent,
}

/// Callback invoked once per message delivered on a topic.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

type FabricFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Cache and notification contract consumed by pollers and readers.
pub trait CacheFabric: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> FabricFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: CacheTtl) -> FabricFuture<'a, ()>;

    /// Returns whether a record was removed.
    fn delete<'a>(&'a self, key: &'a str) -> FabricFuture<'a, bool>;

    /// Live keys matching a glob pattern (`*`, `?`, `[..]`), sorted.
    fn keys<'a>(&'a self, pattern: &'a str) -> FabricFuture<'a, Vec<String>>;

    /// Fire-and-forget publish. Returns the number of subscribers reached.
    fn publish<'a>(&'a self, topic: &'a str, message: String) -> FabricFuture<'a, usize>;

    /// Registers `handler` for messages published on `topic` from now on.
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription, CacheError>;
}

/// Typed JSON helpers over any [`CacheFabric`].
pub async fn get_json<T: DeserializeOwned>(
    fabric: &dyn CacheFabric,
    key: &str,
) -> Result<Option<T>, crate::MirrorError> {
    match fabric.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    fabric: &dyn CacheFabric,
    key: &str,
    value: &T,
    ttl: CacheTtl,
) -> Result<(), crate::MirrorError> {
    fabric.set(key, serde_json::to_string(value)?, ttl).await?;
    Ok(())
}

/// Live subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process fabric: a reader/writer-locked map plus one broadcast channel
/// per topic.
#[derive(Debug, Clone)]
pub struct MemoryFabric {
    records: Arc<RwLock<HashMap<String, CacheEntry>>>,
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    default_ttl: Duration,
    closed: Arc<AtomicBool>,
}

impl Default for MemoryFabric {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MemoryFabric {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(DashMap::new()),
            default_ttl,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Takes the fabric offline; every later operation fails with
    /// [`CacheError::Unavailable`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Removes expired records. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, entry| entry.is_live(now));
        before - records.len()
    }

    /// Number of stored records, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::Unavailable(String::from("fabric is closed")));
        }
        Ok(())
    }

    /// A TTL too large to represent as an instant never expires.
    fn expiry(&self, ttl: CacheTtl) -> Option<Instant> {
        match ttl {
            CacheTtl::Default => Instant::now().checked_add(self.default_ttl),
            CacheTtl::Custom(ttl) => Instant::now().checked_add(ttl),
            CacheTtl::Persistent => None,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        if let Some(sender) = self.topics.get(topic) {
            return sender.value().clone();
        }
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .value()
            .clone()
    }
}

impl CacheFabric for MemoryFabric {
    fn get<'a>(&'a self, key: &'a str) -> FabricFuture<'a, Option<String>> {
        Box::pin(async move {
            self.ensure_open()?;
            let records = self.records.read().await;
            Ok(records
                .get(key)
                .filter(|entry| entry.is_live(Instant::now()))
                .map(|entry| entry.value.clone()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: CacheTtl) -> FabricFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let expires_at = self.expiry(ttl);
            self.records
                .write()
                .await
                .insert(key.to_owned(), CacheEntry { value, expires_at });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> FabricFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            let removed = self.records.write().await.remove(key);
            Ok(removed.is_some_and(|entry| entry.is_live(Instant::now())))
        })
    }

    fn keys<'a>(&'a self, pattern: &'a str) -> FabricFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.ensure_open()?;
            let matcher =
                glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
                    pattern: pattern.to_owned(),
                    message: e.to_string(),
                })?;
            let now = Instant::now();
            let records = self.records.read().await;
            let mut keys: Vec<String> = records
                .iter()
                .filter(|(key, entry)| entry.is_live(now) && matcher.matches(key))
                .map(|(key, _)| key.clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, message: String) -> FabricFuture<'a, usize> {
        Box::pin(async move {
            self.ensure_open()?;
            // No receivers is not an error: nobody was listening.
            Ok(self.sender(topic).send(message).unwrap_or(0))
        })
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<Subscription, CacheError> {
        self.ensure_open()?;
        let mut receiver = self.sender(topic).subscribe();
        let topic_name = topic.to_owned();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => handler(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic_name, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(topic = %topic_name, "topic closed, subscriber exiting");
                        break;
                    }
                }
            }
        });

        Ok(Subscription {
            topic: topic.to_owned(),
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn default_ttl_expires_records() {
        let fabric = MemoryFabric::new(Duration::from_secs(300));

        fabric
            .set("spot:markets", String::from("[]"), CacheTtl::Default)
            .await
            .expect("set succeeds");
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(fabric.get("spot:markets").await.unwrap().as_deref(), Some("[]"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(fabric.get("spot:markets").await.unwrap(), None);
        assert_eq!(fabric.purge_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_records_never_expire() {
        let fabric = MemoryFabric::new(Duration::from_secs(1));

        fabric
            .set("perp:raw_data", String::from("{}"), CacheTtl::Persistent)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;

        assert!(fabric.get("perp:raw_data").await.unwrap().is_some());
        assert_eq!(fabric.purge_expired().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_is_stored_without_expiry() {
        let fabric = MemoryFabric::new(Duration::MAX);

        fabric
            .set(
                "vaults:filtered_list",
                String::from("[]"),
                CacheTtl::Custom(Duration::from_secs(i64::MAX as u64)),
            )
            .await
            .expect("huge custom ttl is accepted");
        fabric
            .set("validators:list", String::from("[]"), CacheTtl::Default)
            .await
            .expect("huge default ttl is accepted");
        tokio::time::advance(Duration::from_secs(86_400)).await;

        assert!(fabric.get("vaults:filtered_list").await.unwrap().is_some());
        assert!(fabric.get("validators:list").await.unwrap().is_some());
        assert_eq!(fabric.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn keys_match_glob_patterns() {
        let fabric = MemoryFabric::default();
        for key in ["perp:markets", "perp:raw_data", "spot:markets"] {
            fabric.set(key, String::from("1"), CacheTtl::Default).await.unwrap();
        }

        assert_eq!(
            fabric.keys("perp:*").await.unwrap(),
            vec![String::from("perp:markets"), String::from("perp:raw_data")]
        );
        assert_eq!(fabric.keys("*:markets").await.unwrap().len(), 2);
        assert!(matches!(
            fabric.keys("[").await,
            Err(CacheError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_record_existed() {
        let fabric = MemoryFabric::default();
        fabric.set("k", String::from("v"), CacheTtl::Default).await.unwrap();

        assert!(fabric.delete("k").await.unwrap());
        assert!(!fabric.delete("k").await.unwrap());
        assert!(fabric.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_fabric_raises_instead_of_returning_absent() {
        let fabric = MemoryFabric::default();
        fabric.close();

        assert!(matches!(fabric.get("any").await, Err(CacheError::Unavailable(_))));
        assert!(fabric
            .set("any", String::new(), CacheTtl::Default)
            .await
            .is_err());
        assert!(fabric.subscribe("t", Arc::new(|_| {})).is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_acknowledged() {
        let fabric = MemoryFabric::default();

        assert_eq!(fabric.publish("nobody:updated", String::from("{}")).await, Ok(0));
    }

    #[tokio::test]
    async fn json_helpers_round_trip_through_the_fabric() {
        let fabric = MemoryFabric::default();
        set_json(&fabric, "validators:list", &vec![1, 2, 3], CacheTtl::Default)
            .await
            .unwrap();

        let stored: Option<Vec<u32>> = get_json(&fabric, "validators:list").await.unwrap();
        assert_eq!(stored, Some(vec![1, 2, 3]));
    }
}
