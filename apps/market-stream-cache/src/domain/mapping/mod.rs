//! Declarative Field Mapping
//!
//! Each exchange message fragment is described by a [`MappingProfile`]: the
//! fragment's shape, one [`MappingRule`] per known source key, and the set of
//! canonical fields emitted by default. [`SchemaMapper`] applies a profile to
//! a JSON fragment and produces a [`CanonicalRecord`].
//!
//! Profiles are `'static` data so exchange tables can be validated and
//! tested independently of the code that uses them.
//!
//! # Shapes
//!
//! | Shape | Wire form | Rule keys |
//! |-------|-----------|-----------|
//! | `Object` | `{"p": "1.0"}` | names |
//! | `Indexed` | `["1.0", "2.0"]` | positions |
//! | `Nested(k)` | `{"e": .., "k": {"o": ..}}` | names, `k` merged into parent |
//! | `Suffixed` | `{"a": ["1", "2"]}` | `a0`, `a1`, ... |

pub mod timestamp;

use serde_json::{Map, Value};

use super::record::{CanonicalRecord, FieldValue};

// =============================================================================
// Errors
// =============================================================================

/// Mapping failures. These never end a session: callers count and skip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The fragment does not have the shape the profile expects.
    #[error("profile {profile}: expected {expected}")]
    UnexpectedShape {
        /// Profile name.
        profile: &'static str,
        /// Description of the expected shape.
        expected: &'static str,
    },

    /// A field the profile structurally depends on is absent.
    #[error("profile {profile}: missing field {field}")]
    MissingField {
        /// Profile name.
        profile: &'static str,
        /// Missing source key.
        field: &'static str,
    },

    /// A value could not be converted to the declared type.
    #[error("cannot coerce {field} to {coercion}: {value}")]
    Coercion {
        /// Canonical field name.
        field: String,
        /// Target coercion name.
        coercion: &'static str,
        /// Offending wire value.
        value: String,
    },

    /// The mapping table itself is inconsistent.
    #[error("invalid mapping profile {profile}: {reason}")]
    InvalidProfile {
        /// Profile name.
        profile: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// =============================================================================
// Mapping tables
// =============================================================================

/// Where a rule reads its wire value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKey {
    /// Object key (or flattened `key{index}` for suffixed fragments).
    Name(&'static str),
    /// Array position.
    Index(usize),
}

/// Conversion applied to a wire value.
#[derive(Debug, Clone, Copy)]
pub enum Coercion {
    /// String as-is; other values as their JSON text.
    Text,
    /// Integer from numbers, numeric strings or booleans.
    Integer,
    /// Float from numbers or numeric strings.
    Float,
    /// Boolean from booleans, `0`/`1` or `"true"`/`"false"`.
    Boolean,
    /// Epoch milliseconds to a canonical UTC timestamp.
    EpochMillis,
    /// Fractional epoch seconds to a canonical UTC timestamp.
    EpochSeconds,
    /// Array kept unchanged.
    RawList,
    /// Array of rows, each parsed with the nested profile.
    Rows(&'static MappingProfile),
}

impl Coercion {
    /// Name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::EpochMillis => "epoch milliseconds",
            Self::EpochSeconds => "epoch seconds",
            Self::RawList => "list",
            Self::Rows(_) => "rows",
        }
    }
}

/// One wire key (or position) mapped to a canonical field.
#[derive(Debug, Clone, Copy)]
pub struct MappingRule {
    /// Wire key or array position.
    pub source: SourceKey,
    /// Canonical field name.
    pub canonical: &'static str,
    /// Conversion applied to the wire value.
    pub coercion: Coercion,
}

impl MappingRule {
    /// Rule for an object key.
    #[must_use]
    pub const fn named(key: &'static str, canonical: &'static str, coercion: Coercion) -> Self {
        Self {
            source: SourceKey::Name(key),
            canonical,
            coercion,
        }
    }

    /// Rule for an array position.
    #[must_use]
    pub const fn indexed(index: usize, canonical: &'static str, coercion: Coercion) -> Self {
        Self {
            source: SourceKey::Index(index),
            canonical,
            coercion,
        }
    }
}

/// How a fragment is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentShape {
    /// Plain JSON object.
    Object,
    /// Positional JSON array.
    Indexed,
    /// Object whose named child object is merged into it.
    Nested(&'static str),
    /// Object of arrays, flattened to `key{index}` names.
    Suffixed,
}

/// A named mapping table for one kind of fragment.
#[derive(Debug)]
pub struct MappingProfile {
    /// Table name, used in errors and logs.
    pub name: &'static str,
    /// Wire layout of the fragment.
    pub shape: FragmentShape,
    /// Known source keys.
    pub rules: &'static [MappingRule],
    /// Canonical fields emitted when the caller gives no subset.
    /// `None` means every canonical name that has a rule.
    pub default_subset: Option<&'static [&'static str]>,
}

impl MappingProfile {
    /// Profile emitting every mapped field by default.
    #[must_use]
    pub const fn new(
        name: &'static str,
        shape: FragmentShape,
        rules: &'static [MappingRule],
    ) -> Self {
        Self {
            name,
            shape,
            rules,
            default_subset: None,
        }
    }

    /// Restrict the default output to the given canonical fields.
    #[must_use]
    pub const fn with_default_subset(mut self, subset: &'static [&'static str]) -> Self {
        self.default_subset = Some(subset);
        self
    }

    /// Rule reading the given object key.
    #[must_use]
    pub fn rule_for_name(&self, key: &str) -> Option<&MappingRule> {
        self.rules
            .iter()
            .find(|rule| matches!(rule.source, SourceKey::Name(name) if name == key))
    }

    /// Rule reading the given array position.
    #[must_use]
    pub fn rule_for_index(&self, index: usize) -> Option<&MappingRule> {
        self.rules
            .iter()
            .find(|rule| rule.source == SourceKey::Index(index))
    }

    /// Whether a canonical field is emitted for the given caller subset.
    #[must_use]
    pub fn selects(&self, subset: Option<&[&str]>, field: &str) -> bool {
        match subset.or(self.default_subset) {
            Some(fields) => fields.iter().any(|selected| *selected == field),
            None => self.rules.iter().any(|rule| rule.canonical == field),
        }
    }

    /// Check the table for internal consistency, recursing into row profiles.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::InvalidProfile`] when a rule key does not fit
    /// the shape, a source key appears twice, or a default field has no rule.
    pub fn validate(&self) -> Result<(), MappingError> {
        let invalid = |reason: String| MappingError::InvalidProfile {
            profile: self.name,
            reason,
        };

        for (position, rule) in self.rules.iter().enumerate() {
            let fits = matches!(
                (self.shape, rule.source),
                (FragmentShape::Indexed, SourceKey::Index(_))
                    | (
                        FragmentShape::Object | FragmentShape::Nested(_) | FragmentShape::Suffixed,
                        SourceKey::Name(_)
                    )
            );
            if !fits {
                return Err(invalid(format!(
                    "rule {} does not fit the fragment shape",
                    rule.canonical
                )));
            }
            if self.rules[..position]
                .iter()
                .any(|earlier| earlier.source == rule.source)
            {
                return Err(invalid(format!("duplicate source for {}", rule.canonical)));
            }
            if let Coercion::Rows(nested) = rule.coercion {
                nested.validate()?;
            }
        }

        if let Some(subset) = self.default_subset {
            if let Some(orphan) = subset
                .iter()
                .find(|field| !self.rules.iter().any(|rule| rule.canonical == **field))
            {
                return Err(invalid(format!("default field {orphan} has no rule")));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Schema mapper
// =============================================================================

/// Applies mapping profiles to JSON fragments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaMapper;

impl SchemaMapper {
    /// Map one fragment to a canonical record.
    ///
    /// Keys with a rule are renamed and coerced; keys without one pass
    /// through unchanged as [`FieldValue::Raw`] under their wire name (the
    /// position as a string for arrays). Either way a field is emitted only
    /// when `subset` (or the profile default) selects it.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] when the fragment has the wrong shape or a
    /// selected value cannot be coerced.
    pub fn parse(
        fragment: &Value,
        profile: &MappingProfile,
        subset: Option<&[&str]>,
    ) -> Result<CanonicalRecord, MappingError> {
        let mut record = CanonicalRecord::new();
        let mut sink = FieldSink {
            record: &mut record,
            profile,
            subset,
        };

        match profile.shape {
            FragmentShape::Object => {
                for (key, value) in expect_object(fragment, profile)? {
                    sink.named(key, value)?;
                }
            }
            FragmentShape::Nested(child_key) => {
                let parent = expect_object(fragment, profile)?;
                let child = parent
                    .get(child_key)
                    .ok_or(MappingError::MissingField {
                        profile: profile.name,
                        field: child_key,
                    })?
                    .as_object()
                    .ok_or(MappingError::UnexpectedShape {
                        profile: profile.name,
                        expected: "nested object",
                    })?;
                for (key, value) in parent.iter().filter(|(key, _)| key.as_str() != child_key) {
                    sink.named(key, value)?;
                }
                for (key, value) in child {
                    sink.named(key, value)?;
                }
            }
            FragmentShape::Suffixed => {
                for (key, value) in expect_object(fragment, profile)? {
                    match value {
                        Value::Array(items) => {
                            for (index, item) in items.iter().enumerate() {
                                sink.named(&format!("{key}{index}"), item)?;
                            }
                        }
                        other => sink.named(key, other)?,
                    }
                }
            }
            FragmentShape::Indexed => {
                let items = fragment.as_array().ok_or(MappingError::UnexpectedShape {
                    profile: profile.name,
                    expected: "array",
                })?;
                for (index, value) in items.iter().enumerate() {
                    match profile.rule_for_index(index) {
                        Some(rule) => sink.rule(rule, value)?,
                        None => sink.pass_through(&index.to_string(), value),
                    }
                }
            }
        }

        Ok(record)
    }

    /// Map an array of fragments, one record per element, order preserved.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] when the fragment is not an array or any
    /// row fails to map.
    pub fn parse_rows(
        fragment: &Value,
        profile: &MappingProfile,
        subset: Option<&[&str]>,
    ) -> Result<Vec<CanonicalRecord>, MappingError> {
        fragment
            .as_array()
            .ok_or(MappingError::UnexpectedShape {
                profile: profile.name,
                expected: "array of rows",
            })?
            .iter()
            .map(|row| Self::parse(row, profile, subset))
            .collect()
    }

    /// Convert a single wire value.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Coercion`] when the value does not convert.
    pub fn coerce(
        value: &Value,
        coercion: Coercion,
        field: &str,
    ) -> Result<FieldValue, MappingError> {
        let converted = match coercion {
            Coercion::Text => Some(match value {
                Value::String(text) => FieldValue::Text(text.clone()),
                other => FieldValue::Text(other.to_string()),
            }),
            Coercion::Integer => to_i64(value).map(FieldValue::Integer),
            Coercion::Float => to_f64(value).map(FieldValue::Float),
            Coercion::Boolean => to_bool(value).map(FieldValue::Boolean),
            Coercion::EpochMillis => to_i64(value)
                .and_then(timestamp::from_epoch_millis)
                .or_else(|| to_f64(value).and_then(|millis| timestamp::from_epoch_seconds(millis / 1000.0)))
                .map(FieldValue::Text),
            Coercion::EpochSeconds => to_f64(value)
                .and_then(timestamp::from_epoch_seconds)
                .map(FieldValue::Text),
            Coercion::RawList => value.is_array().then(|| FieldValue::Raw(value.clone())),
            Coercion::Rows(profile) => {
                return Self::parse_rows(value, profile, None).map(FieldValue::Records);
            }
        };

        converted.ok_or_else(|| MappingError::Coercion {
            field: field.to_string(),
            coercion: coercion.name(),
            value: value.to_string(),
        })
    }
}

/// Destination for mapped fields, applying subset selection.
struct FieldSink<'a> {
    record: &'a mut CanonicalRecord,
    profile: &'a MappingProfile,
    subset: Option<&'a [&'a str]>,
}

impl FieldSink<'_> {
    fn named(&mut self, key: &str, value: &Value) -> Result<(), MappingError> {
        match self.profile.rule_for_name(key) {
            Some(rule) => self.rule(rule, value),
            None => {
                self.pass_through(key, value);
                Ok(())
            }
        }
    }

    // Unselected fields are never coerced, so bad values there cannot fail a record.
    fn rule(&mut self, rule: &MappingRule, value: &Value) -> Result<(), MappingError> {
        if self.profile.selects(self.subset, rule.canonical) {
            let converted = SchemaMapper::coerce(value, rule.coercion, rule.canonical)?;
            self.record.insert(rule.canonical, converted);
        }
        Ok(())
    }

    fn pass_through(&mut self, key: &str, value: &Value) {
        if self.profile.selects(self.subset, key) {
            self.record.insert(key, FieldValue::Raw(value.clone()));
        }
    }
}

fn expect_object<'v>(
    fragment: &'v Value,
    profile: &MappingProfile,
) -> Result<&'v Map<String, Value>, MappingError> {
    fragment.as_object().ok_or(MappingError::UnexpectedShape {
        profile: profile.name,
        expected: "object",
    })
}

#[allow(clippy::cast_possible_truncation)]
fn whole_f64_to_i64(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < 9.2e18).then(|| value as i64)
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(whole_f64_to_i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(whole_f64_to_i64))
        }
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|v| v != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
