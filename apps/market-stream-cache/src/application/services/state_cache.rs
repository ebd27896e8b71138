//! State Cache Service
//!
//! Owns the [`StateTable`] and the [`StateStore`] it is exported to.
//! Every accepted record updates the table immediately; optionally it is
//! published right away, and at most once per `caching_freq` the whole
//! table is written out, one snapshot key per channel.
//!
//! # Keys
//!
//! ```text
//! SET     {caching_key}:{channel}      {"<market>": <record>, ...}   EX ttl
//! PUBLISH {publish_channel}:{channel}  {"<market>": <record>}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::application::ports::{StateStore, StoreError};
use crate::domain::cadence::Cadence;
use crate::domain::record::CanonicalRecord;
use crate::domain::state::StateTable;

/// Default snapshot interval.
pub const DEFAULT_CACHING_FREQ: Duration = Duration::from_millis(250);

/// Default snapshot expiry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Export settings for a [`StateCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Write periodic snapshots.
    pub do_cache: bool,
    /// Minimum interval between snapshots.
    pub caching_freq: Duration,
    /// Snapshot key prefix.
    pub caching_key: String,
    /// Snapshot expiry.
    pub ttl: Duration,
    /// Publish every accepted record.
    pub do_publish: bool,
    /// Publish topic prefix.
    pub publish_channel: String,
}

impl CacheSettings {
    /// Defaults for an exchange: caching on, publishing off.
    #[must_use]
    pub fn for_exchange(exchange: &str) -> Self {
        Self {
            do_cache: true,
            caching_freq: DEFAULT_CACHING_FREQ,
            caching_key: format!("default_redis_caching_key:{exchange}"),
            ttl: DEFAULT_CACHE_TTL,
            do_publish: false,
            publish_channel: format!("default_redis_publish_key:{exchange}"),
        }
    }
}

/// What [`StateCache::accept`] exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acceptance {
    /// The record was published.
    pub published: bool,
    /// A snapshot flush ran.
    pub flushed: bool,
}

/// Latest-value table with rate-limited export.
#[derive(Debug)]
pub struct StateCache<S> {
    table: StateTable,
    store: S,
    settings: CacheSettings,
    flush: Cadence,
}

impl<S: StateStore> StateCache<S> {
    /// Create a cache whose table is pre-seeded with `channels`.
    ///
    /// The first flush is due one `caching_freq` after construction.
    pub fn new<I, C>(settings: CacheSettings, store: S, channels: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let flush = Cadence::new(settings.caching_freq, Instant::now());
        Self {
            table: StateTable::with_channels(channels),
            store,
            settings,
            flush,
        }
    }

    /// Replace the latest record for `(channel, market)`.
    pub fn update(&mut self, channel: &str, market: &str, record: CanonicalRecord) {
        self.table.update(channel, market, record);
    }

    /// Update, publish if enabled, then flush if due.
    ///
    /// The table is updated before any store call, so a store failure never
    /// loses the record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if publishing or flushing fails.
    pub async fn accept(
        &mut self,
        channel: &str,
        market: &str,
        record: CanonicalRecord,
    ) -> Result<Acceptance, StoreError> {
        self.table.update(channel, market, record);

        let published = match self.table.get(channel, market) {
            Some(latest) if self.settings.do_publish => {
                publish_record(
                    &mut self.store,
                    &self.settings.publish_channel,
                    channel,
                    market,
                    latest,
                )
                .await?;
                true
            }
            _ => false,
        };

        let flushed = self.maybe_flush().await?;
        Ok(Acceptance { published, flushed })
    }

    /// Publish `record` for `(channel, market)` if publishing is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the publish fails.
    pub async fn maybe_publish(
        &mut self,
        channel: &str,
        market: &str,
        record: &CanonicalRecord,
    ) -> Result<bool, StoreError> {
        if !self.settings.do_publish {
            return Ok(false);
        }
        publish_record(
            &mut self.store,
            &self.settings.publish_channel,
            channel,
            market,
            record,
        )
        .await?;
        Ok(true)
    }

    /// Flush every channel snapshot if caching is enabled and the interval
    /// has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a snapshot write fails.
    pub async fn maybe_flush(&mut self) -> Result<bool, StoreError> {
        self.maybe_flush_at(Instant::now()).await
    }

    /// [`Self::maybe_flush`] against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a snapshot write fails.
    pub async fn maybe_flush_at(&mut self, now: Instant) -> Result<bool, StoreError> {
        if !self.settings.do_cache || !self.flush.fire(now) {
            return Ok(false);
        }

        for (channel, state) in self.table.channels() {
            let key = format!("{}:{channel}", self.settings.caching_key);
            let payload = serde_json::to_vec(state)?;
            tracing::trace!(
                key = %key,
                snapshot = %String::from_utf8_lossy(&payload),
                "Flushing channel snapshot"
            );
            self.store.set(&key, payload, self.settings.ttl).await?;
        }

        Ok(true)
    }

    /// Current table.
    #[must_use]
    pub const fn table(&self) -> &StateTable {
        &self.table
    }

    /// Export settings.
    #[must_use]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }
}

async fn publish_record<S: StateStore>(
    store: &mut S,
    topic_prefix: &str,
    channel: &str,
    market: &str,
    record: &CanonicalRecord,
) -> Result<(), StoreError> {
    let topic = format!("{topic_prefix}:{channel}");
    let payload = serde_json::to_vec(&BTreeMap::from([(market, record)]))?;
    store.publish(&topic, payload).await
}
