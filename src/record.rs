//! Dynamic, schema-less tabular records.
//!
//! A [`Record`] is an ordered string-keyed mapping from field name to a
//! [`FieldValue`], which is either numeric or textual. Schema is not fixed
//! across records: whether a field is numeric is determined empirically from
//! the values that actually arrive, never declared up front.
//!
//! Insertion order is preserved and constitutes the record's natural field
//! order, which downstream grouping relies on.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Field name the batcher writes its processing timestamp under.
pub const STAMP_FIELD: &str = "processed_at";

/// A single field value: numeric or textual, nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  /// A numeric value. All numeric statistics use standard `f64` arithmetic.
  Number(f64),
  /// A textual value.
  Text(String),
}

impl FieldValue {
  /// Returns the numeric value, if this field holds one.
  pub fn as_number(&self) -> Option<f64> {
    match self {
      FieldValue::Number(n) => Some(*n),
      FieldValue::Text(_) => None,
    }
  }

  /// Returns true if this field holds a numeric value.
  pub fn is_number(&self) -> bool {
    matches!(self, FieldValue::Number(_))
  }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Number(n) => write!(f, "{}", n),
      FieldValue::Text(s) => write!(f, "{}", s),
    }
  }
}

impl Serialize for FieldValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      FieldValue::Number(n) => serializer.serialize_f64(*n),
      FieldValue::Text(s) => serializer.serialize_str(s),
    }
  }
}

/// Error raised by record-level operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
  /// The record already carries a processing timestamp.
  #[error("record already stamped with `{STAMP_FIELD}`")]
  AlreadyStamped,
  /// A decoded value was not a flat field mapping of scalars.
  #[error("not a field-mapping record: {0}")]
  NotARecord(String),
}

/// An ordered string-keyed mapping from field name to [`FieldValue`].
///
/// Backed by a vector of pairs so that iteration yields fields in insertion
/// order. Lookups are linear; records in this system are small (a handful of
/// fields), so a hash map would buy nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  fields: Vec<(String, FieldValue)>,
}

impl Record {
  /// Creates an empty record.
  pub fn new() -> Self {
    Self { fields: Vec::new() }
  }

  /// Inserts a field, replacing the value in place if the name exists.
  pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
    let name = name.into();
    if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
      slot.1 = value;
    } else {
      self.fields.push((name, value));
    }
  }

  /// Returns the value of the named field, if present.
  pub fn get(&self, name: &str) -> Option<&FieldValue> {
    self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
  }

  /// Returns true if the named field is present.
  pub fn contains_field(&self, name: &str) -> bool {
    self.fields.iter().any(|(n, _)| n == name)
  }

  /// Iterates fields in natural (insertion) order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.fields.iter().map(|(n, v)| (n.as_str(), v))
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  /// Returns true if the record has no fields.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Structural validity: a record must map at least one field.
  pub fn is_structurally_valid(&self) -> bool {
    !self.fields.is_empty()
  }

  /// Appends the processing timestamp (epoch milliseconds).
  ///
  /// Stamping is a one-shot operation; a record that already carries
  /// `processed_at` is rejected rather than silently overwritten.
  pub fn stamp(&mut self, at: chrono::DateTime<chrono::Utc>) -> Result<(), RecordError> {
    if self.contains_field(STAMP_FIELD) {
      return Err(RecordError::AlreadyStamped);
    }
    self
      .fields
      .push((STAMP_FIELD.to_string(), FieldValue::Number(at.timestamp_millis() as f64)));
    Ok(())
  }

  /// Decodes a JSON object into a record, preserving field order.
  ///
  /// Only flat objects of numbers and strings qualify; anything else is the
  /// decoder's problem and surfaces as [`RecordError::NotARecord`].
  pub fn from_json(value: &serde_json::Value) -> Result<Self, RecordError> {
    let map = value
      .as_object()
      .ok_or_else(|| RecordError::NotARecord(format!("expected object, got {}", value)))?;
    let mut record = Record::new();
    for (name, v) in map {
      let field = match v {
        serde_json::Value::Number(n) => FieldValue::Number(
          n.as_f64()
            .ok_or_else(|| RecordError::NotARecord(format!("field `{}` is not finite", name)))?,
        ),
        serde_json::Value::String(s) => FieldValue::Text(s.clone()),
        other => {
          return Err(RecordError::NotARecord(format!(
            "field `{}` has unsupported value {}",
            name, other
          )));
        }
      };
      record.insert(name.clone(), field);
    }
    Ok(record)
  }
}

impl FromIterator<(String, FieldValue)> for Record {
  fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
    let mut record = Record::new();
    for (name, value) in iter {
      record.insert(name, value);
    }
    record
  }
}

impl Serialize for Record {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (name, value) in &self.fields {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
  type Value = Record;

  fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("a map of field names to numbers or strings")
  }

  fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
      Number(f64),
      Text(String),
    }

    let mut record = Record::new();
    while let Some((name, scalar)) = access.next_entry::<String, Scalar>()? {
      let value = match scalar {
        Scalar::Number(n) => FieldValue::Number(n),
        Scalar::Text(s) => FieldValue::Text(s),
      };
      record.insert(name, value);
    }
    Ok(record)
  }
}

impl<'de> Deserialize<'de> for Record {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserializer.deserialize_map(RecordVisitor)
  }
}
