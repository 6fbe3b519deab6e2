//! Grouping and per-group numeric statistics for window aggregation.
//!
//! Records are bucketed by a composite group key built from their textual
//! fields, then each group's numeric fields are reduced to sum/avg/min/max.
//! Which fields count as numeric is decided by the group's first record;
//! later records where the same field is missing or non-numeric are skipped,
//! not coerced to zero.

use crate::record::{Record, STAMP_FIELD};
use serde::Serialize;
use std::collections::HashMap;

/// Separator between `field:value` segments of a group key.
const KEY_SEPARATOR: char = '|';

/// Statistics over the numeric occurrences of one field within a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
  /// Sum of all numeric occurrences.
  pub sum: f64,
  /// Sum divided by the number of occurrences that were actually numeric.
  pub avg: f64,
  /// Smallest numeric occurrence.
  pub min: f64,
  /// Largest numeric occurrence.
  pub max: f64,
}

/// Aggregated statistics for one group of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
  /// Number of records in the group.
  pub count: usize,
  /// Per-field numeric statistics, keyed by field name.
  pub fields: HashMap<String, NumericStats>,
}

/// Builds the composite group key for a record.
///
/// The key concatenates `field:value` for the record's textual fields in
/// natural field order. Numeric fields are measures, not identity, and the
/// processing-timestamp stamp never participates.
pub fn group_key(record: &Record) -> String {
  let mut key = String::new();
  for (name, value) in record.iter() {
    if name == STAMP_FIELD || value.is_number() {
      continue;
    }
    if !key.is_empty() {
      key.push(KEY_SEPARATOR);
    }
    key.push_str(name);
    key.push(':');
    key.push_str(&value.to_string());
  }
  key
}

/// Groups `records` by [`group_key`] and computes per-group statistics.
///
/// Group membership follows record order, so the "first record" that fixes a
/// group's numeric fields is the earliest arrival in that group.
pub fn aggregate(records: &[Record]) -> HashMap<String, GroupStats> {
  let mut groups: Vec<(String, Vec<&Record>)> = Vec::new();
  for record in records {
    let key = group_key(record);
    match groups.iter_mut().find(|(k, _)| *k == key) {
      Some((_, members)) => members.push(record),
      None => groups.push((key, vec![record])),
    }
  }

  groups
    .into_iter()
    .map(|(key, members)| (key, stats_for(&members)))
    .collect()
}

fn stats_for(members: &[&Record]) -> GroupStats {
  let first = members[0];
  let mut fields = HashMap::new();

  for (name, value) in first.iter() {
    if name == STAMP_FIELD || !value.is_number() {
      continue;
    }
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut numeric_count = 0usize;
    for member in members {
      // Missing or non-numeric occurrences are skipped, not coerced.
      let Some(n) = member.get(name).and_then(|v| v.as_number()) else {
        continue;
      };
      sum += n;
      min = min.min(n);
      max = max.max(n);
      numeric_count += 1;
    }
    if numeric_count > 0 {
      fields.insert(
        name.to_string(),
        NumericStats {
          sum,
          avg: sum / numeric_count as f64,
          min,
          max,
        },
      );
    }
  }

  GroupStats {
    count: members.len(),
    fields,
  }
}
