//! In-memory state store.
//!
//! Clones share one backing map, so a test (or the health endpoint of a
//! dry run) can inspect what a running session exported.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::application::ports::{StateStore, StoreError};

/// A stored value and the expiry it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Raw bytes as written.
    pub value: Vec<u8>,
    /// Expiry requested by the writer. Not enforced.
    pub ttl: Duration,
}

impl StoredValue {
    /// Value parsed as JSON, `None` if it is not JSON.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.value).ok()
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: BTreeMap<String, StoredValue>,
    set_count: usize,
    published: Vec<(String, Vec<u8>)>,
    failing_sets: usize,
    failing_publishes: usize,
}

/// Process-local [`StateStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value written under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Latest value under `key`, parsed as JSON.
    #[must_use]
    pub fn get_json(&self, key: &str) -> Option<Value> {
        self.get(key).as_ref().and_then(StoredValue::json)
    }

    /// Keys written so far, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().values.keys().cloned().collect()
    }

    /// Number of successful `set` calls.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.inner.lock().set_count
    }

    /// Every successful publish, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().published.clone()
    }

    /// Messages published on `topic`, parsed as JSON.
    #[must_use]
    pub fn published_json(&self, topic: &str) -> Vec<Value> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|(published_topic, _)| published_topic == topic)
            .filter_map(|(_, message)| serde_json::from_slice(message).ok())
            .collect()
    }

    /// Make the next `count` `set` calls fail.
    pub fn fail_next_sets(&self, count: usize) {
        self.inner.lock().failing_sets = count;
    }

    /// Make the next `count` `publish` calls fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.lock().failing_publishes = count;
    }
}

fn injected(command: &'static str) -> StoreError {
    StoreError::Command {
        command,
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_sets > 0 {
            inner.failing_sets -= 1;
            return Err(injected("SET"));
        }
        inner
            .values
            .insert(key.to_string(), StoredValue { value, ttl });
        inner.set_count += 1;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, message: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_publishes > 0 {
            inner.failing_publishes -= 1;
            return Err(injected("PUBLISH"));
        }
        inner.published.push((topic.to_string(), message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let observer = InMemoryStore::new();
        let mut writer = observer.clone();

        writer
            .set("k:ticker", br#"{"btcusdt":{}}"#.to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        writer.publish("p:ticker", b"{}".to_vec()).await.unwrap();

        assert_eq!(observer.keys(), vec!["k:ticker".to_string()]);
        assert_eq!(observer.get_json("k:ticker"), Some(json!({"btcusdt": {}})));
        assert_eq!(observer.get("k:ticker").unwrap().ttl, Duration::from_secs(60));
        assert_eq!(observer.published_json("p:ticker"), vec![json!({})]);
        assert_eq!(observer.set_count(), 1);
    }

    #[tokio::test]
    async fn overwrites_keep_latest_value() {
        let mut store = InMemoryStore::new();
        store.set("k", b"1".to_vec(), Duration::from_secs(1)).await.unwrap();
        store.set("k", b"2".to_vec(), Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.get("k").unwrap().value, b"2".to_vec());
        assert_eq!(store.set_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let mut store = InMemoryStore::new();
        store.fail_next_sets(1);
        store.fail_next_publishes(1);

        assert!(matches!(
            store.set("k", Vec::new(), Duration::from_secs(1)).await,
            Err(StoreError::Command { command: "SET", .. })
        ));
        assert!(store.publish("t", Vec::new()).await.is_err());

        store.set("k", Vec::new(), Duration::from_secs(1)).await.unwrap();
        store.publish("t", Vec::new()).await.unwrap();
        assert_eq!(store.published().len(), 1);
    }
}
