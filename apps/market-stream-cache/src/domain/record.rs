//! Canonical Records
//!
//! A canonical record is a flat, ordered map from canonical field name to a
//! typed value. Nested collections (book levels, trade batches) are stored as
//! lists of records. Records serialize to plain JSON objects, so the cache can
//! hand them to the store without any extra schema.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::mapping::timestamp;

/// Field stamped on every accepted record with the exchange (or receive) time.
pub const RESPOND_TIME_FIELD: &str = "respond_time_utc";

/// A single typed value inside a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// UTF-8 text, including formatted timestamps.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
    /// Nested list of records (book levels, trade batches).
    Records(Vec<CanonicalRecord>),
    /// Wire value kept as-is.
    Raw(serde_json::Value),
}

impl FieldValue {
    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric content as `f64`, if this is a number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Nested records, if this is a record list.
    #[must_use]
    pub fn as_records(&self) -> Option<&[CanonicalRecord]> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<CanonicalRecord>> for FieldValue {
    fn from(value: Vec<CanonicalRecord>) -> Self {
        Self::Records(value)
    }
}

/// An exchange-independent record: canonical field name to typed value.
///
/// Field names are unique by construction. Once a record is handed to the
/// state cache it is owned there and never mutated again.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CanonicalRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl CanonicalRecord {
    /// Create an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a field, returning the value it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Look up a field by canonical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Whether the record carries the named field.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate over `(name, value)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stamp [`RESPOND_TIME_FIELD`] with a formatted UTC instant.
    pub fn set_respond_time(&mut self, at: DateTime<Utc>) {
        self.insert(RESPOND_TIME_FIELD, timestamp::format_utc(at));
    }

    /// Render as a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for CanonicalRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn insert_replaces_existing_field() {
        let mut record = CanonicalRecord::new().with("price", 1.0);
        let previous = record.insert("price", 2.0);

        assert_eq!(previous, Some(FieldValue::Float(1.0)));
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("price").and_then(FieldValue::as_f64), Some(2.0));
    }

    #[test]
    fn serializes_as_plain_object() {
        let level = CanonicalRecord::new().with("price", 100.5).with("volume", 2.0);
        let record = CanonicalRecord::new()
            .with("event_type", "trade")
            .with("trade_id", 42_i64)
            .with("completed", true)
            .with("bids", vec![level]);

        assert_eq!(
            record.to_json(),
            json!({
                "bids": [{"price": 100.5, "volume": 2.0}],
                "completed": true,
                "event_type": "trade",
                "trade_id": 42
            })
        );
    }

    #[test]
    fn respond_time_uses_canonical_format() {
        let mut record = CanonicalRecord::new();
        let at = Utc.timestamp_millis_opt(1_690_000_000_123).unwrap();
        record.set_respond_time(at);

        assert_eq!(
            record.get(RESPOND_TIME_FIELD).and_then(FieldValue::as_str),
            Some("2023-07-22 04:26:40.123")
        );
    }

    #[test]
    fn collects_from_pairs() {
        let record: CanonicalRecord = [("a", 1_i64), ("b", 2_i64)].into_iter().collect();
        assert_eq!(record.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(record.contains("a"));
        assert!(!record.contains("c"));
    }
}
