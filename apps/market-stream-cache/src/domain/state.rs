//! Latest-value table.
//!
//! The [`StateTable`] holds, per channel, the most recent canonical record
//! for each market. Updates overwrite; nothing is ever deleted while the
//! process runs, so a reconnect never loses what was last seen.

use std::collections::BTreeMap;

use serde::Serialize;

use super::record::CanonicalRecord;

/// Latest record per market for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChannelState {
    markets: BTreeMap<String, CanonicalRecord>,
}

impl ChannelState {
    /// Latest record for a market.
    #[must_use]
    pub fn get(&self, market: &str) -> Option<&CanonicalRecord> {
        self.markets.get(market)
    }

    /// Iterate over `(market, record)` in market order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalRecord)> {
        self.markets
            .iter()
            .map(|(market, record)| (market.as_str(), record))
    }

    /// Number of markets with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markets.len()
    }

    /// Whether no market has reported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    fn replace(&mut self, market: &str, record: CanonicalRecord) -> Option<CanonicalRecord> {
        self.markets.insert(market.to_string(), record)
    }
}

/// Channel name to [`ChannelState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateTable {
    channels: BTreeMap<String, ChannelState>,
}

impl StateTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Create a table with an empty entry per configured channel, so the
    /// first snapshot lists every channel even before data arrives.
    #[must_use]
    pub fn with_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels
                .into_iter()
                .map(|channel| (channel.into(), ChannelState::default()))
                .collect(),
        }
    }

    /// Store `record` as the latest for `(channel, market)`, returning the
    /// record it replaced.
    pub fn update(
        &mut self,
        channel: &str,
        market: &str,
        record: CanonicalRecord,
    ) -> Option<CanonicalRecord> {
        if let Some(state) = self.channels.get_mut(channel) {
            return state.replace(market, record);
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .replace(market, record)
    }

    /// State for one channel.
    #[must_use]
    pub fn channel(&self, channel: &str) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    /// Latest record for `(channel, market)`.
    #[must_use]
    pub fn get(&self, channel: &str, market: &str) -> Option<&CanonicalRecord> {
        self.channels.get(channel).and_then(|state| state.get(market))
    }

    /// Iterate over `(channel, state)` in channel order.
    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelState)> {
        self.channels
            .iter()
            .map(|(channel, state)| (channel.as_str(), state))
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the table has no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total number of (channel, market) entries.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.channels.values().map(ChannelState::len).sum()
    }
}
