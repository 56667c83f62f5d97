//! Last-write-wins merge of fetched deltas into the cached snapshot.
//!
//! Applied per collection. Records are reindexed to the union of field
//! names, fields that are null everywhere are dropped, and duplicates are
//! resolved by `id` (the delta record wins) or, when no `id` column exists,
//! by whole-record equality.

use std::collections::{BTreeSet, HashMap, HashSet};

use color_eyre::Result;
use serde_json::Value;

use crate::erp::record::{Record, RecordCollection, Snapshot};

/// Merge a fetched delta into the cached snapshot, collection by collection.
pub fn merge_snapshots(old: &Snapshot, delta: &Snapshot) -> Result<Snapshot> {
  Ok(Snapshot {
    projects: merge_collections(&old.projects, &delta.projects)?,
    employees: merge_collections(&old.employees, &delta.employees)?,
    sales: merge_collections(&old.sales, &delta.sales)?,
    financials: merge_collections(&old.financials, &delta.financials)?,
    timesheet: merge_collections(&old.timesheet, &delta.timesheet)?,
    tasks: merge_collections(&old.tasks, &delta.tasks)?,
  })
}

/// Merge one collection. The result contains each identity exactly once,
/// with the delta's version winning on conflict.
pub fn merge_collections(
  old: &RecordCollection,
  delta: &RecordCollection,
) -> Result<RecordCollection> {
  // Composite values become stable strings so they can participate in
  // equality comparison and grouping.
  let old_records: Vec<Record> = old.iter().map(stringify_composites).collect::<Result<_>>()?;
  let delta_records: Vec<Record> = delta
    .iter()
    .map(stringify_composites)
    .collect::<Result<_>>()?;

  // Union of field names, minus fields that carry no value anywhere.
  let live: BTreeSet<String> = live_fields(old_records.iter().chain(delta_records.iter()));

  let reindexed: Vec<Record> = old_records
    .iter()
    .chain(delta_records.iter())
    .map(|r| reindex(r, &live))
    .collect();

  let id_in_both = (old.is_empty() || live_in(&old_records, "id"))
    && (delta.is_empty() || live_in(&delta_records, "id"))
    && live.contains("id");

  let merged = if id_in_both {
    dedup_by_id(reindexed)
  } else {
    dedup_by_equality(reindexed)
  };

  Ok(RecordCollection::from_records(merged))
}

/// Replace nested list/object values with their canonical JSON text.
fn stringify_composites(record: &Record) -> Result<Record> {
  let mut out = Record::new();
  for (name, value) in &record.0 {
    let value = match value {
      Value::Array(_) | Value::Object(_) => Value::String(serde_json::to_string(value)?),
      other => other.clone(),
    };
    out.set(name.clone(), value);
  }
  Ok(out)
}

/// Field names that are non-null in at least one record.
fn live_fields<'a>(records: impl Iterator<Item = &'a Record>) -> BTreeSet<String> {
  let mut live = BTreeSet::new();
  for record in records {
    for (name, value) in &record.0 {
      if !value.is_null() {
        live.insert(name.clone());
      }
    }
  }
  live
}

fn live_in(records: &[Record], field: &str) -> bool {
  records
    .iter()
    .any(|r| r.get(field).is_some_and(|v| !v.is_null()))
}

/// Project a record onto exactly the live field set, null where absent.
fn reindex(record: &Record, live: &BTreeSet<String>) -> Record {
  let mut out = Record::new();
  for name in live {
    out.set(
      name.clone(),
      record.get(name).cloned().unwrap_or(Value::Null),
    );
  }
  out
}

/// Keep one record per id, the later (delta) occurrence winning, in the
/// order of each id's last occurrence.
fn dedup_by_id(records: Vec<Record>) -> Vec<Record> {
  let mut last_index: HashMap<String, usize> = HashMap::new();
  for (index, record) in records.iter().enumerate() {
    // A record with a null id keeps its position rather than colliding
    // with every other id-less record.
    let key = match record.get("id") {
      Some(v) if !v.is_null() => v.to_string(),
      _ => format!("\u{0}pos:{}", index),
    };
    last_index.insert(key, index);
  }

  let keep: HashSet<usize> = last_index.into_values().collect();
  records
    .into_iter()
    .enumerate()
    .filter_map(|(index, record)| keep.contains(&index).then_some(record))
    .collect()
}

/// Keep the first occurrence of each exactly-equal record. Tolerates
/// re-fetch of literally unchanged rows without an identity key.
fn dedup_by_equality(records: Vec<Record>) -> Vec<Record> {
  let mut seen = HashSet::new();
  records
    .into_iter()
    .filter(|record| {
      // Map keys are sorted, so the serialized form is canonical.
      let repr = serde_json::to_string(&record.0).unwrap_or_default();
      seen.insert(repr)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: Value) -> Record {
    serde_json::from_value(value).unwrap()
  }

  fn collection(values: Vec<Value>) -> RecordCollection {
    RecordCollection::from_records(values.into_iter().map(record).collect())
  }

  #[test]
  fn test_delta_wins_on_id_conflict() {
    let old = collection(vec![
      json!({"id": 1, "name": "Alpha"}),
      json!({"id": 2, "name": "Beta"}),
    ]);
    let delta = collection(vec![json!({"id": 1, "name": "Alpha v2"})]);

    let merged = merge_collections(&old, &delta).unwrap();
    assert_eq!(merged.len(), 2);

    let alpha = merged.iter().find(|r| r.id() == Some(1)).unwrap();
    assert_eq!(alpha.str_field("name"), Some("Alpha v2"));
  }

  #[test]
  fn test_identical_records_without_id_collapse() {
    let old = collection(vec![json!({"name": "SO-1", "amount_total": 50.0})]);
    let delta = collection(vec![json!({"name": "SO-1", "amount_total": 50.0})]);

    let merged = merge_collections(&old, &delta).unwrap();
    assert_eq!(merged.len(), 1);
  }

  #[test]
  fn test_distinct_records_without_id_both_kept() {
    let old = collection(vec![json!({"name": "SO-1", "amount_total": 50.0})]);
    let delta = collection(vec![json!({"name": "SO-1", "amount_total": 75.0})]);

    let merged = merge_collections(&old, &delta).unwrap();
    assert_eq!(merged.len(), 2);
  }

  #[test]
  fn test_field_union_reindexes_missing_as_null() {
    let old = collection(vec![json!({"id": 1, "name": "Alpha"})]);
    let delta = collection(vec![json!({"id": 2, "stage": "active"})]);

    let merged = merge_collections(&old, &delta).unwrap();
    assert_eq!(merged.len(), 2);
    let first = merged.iter().find(|r| r.id() == Some(1)).unwrap();
    assert_eq!(first.get("stage"), Some(&Value::Null));
  }

  #[test]
  fn test_all_null_fields_dropped() {
    let old = collection(vec![json!({"id": 1, "ghost": null, "name": "Alpha"})]);
    let delta = collection(vec![json!({"id": 2, "ghost": null, "name": "Beta"})]);

    let merged = merge_collections(&old, &delta).unwrap();
    for r in merged.iter() {
      assert_eq!(r.get("ghost"), None);
    }
  }

  #[test]
  fn test_composite_values_stringified() {
    let old = collection(vec![]);
    let delta = collection(vec![json!({"id": 1, "partner_id": [5, "ACME"]})]);

    let merged = merge_collections(&old, &delta).unwrap();
    let partner = merged.records[0].str_field("partner_id").unwrap();
    assert_eq!(partner, "[5,\"ACME\"]");
  }

  #[test]
  fn test_merge_into_empty_old() {
    let old = collection(vec![]);
    let delta = collection(vec![
      json!({"id": 1, "name": "Alpha"}),
      json!({"id": 2, "name": "Beta"}),
    ]);

    let merged = merge_collections(&old, &delta).unwrap();
    assert_eq!(merged.len(), 2);
  }

  #[test]
  fn test_merge_preserves_delta_order_on_conflict() {
    let old = collection(vec![
      json!({"id": 1, "v": "a"}),
      json!({"id": 2, "v": "b"}),
    ]);
    let delta = collection(vec![json!({"id": 1, "v": "a2"})]);

    let merged = merge_collections(&old, &delta).unwrap();
    let ids: Vec<Option<i64>> = merged.iter().map(Record::id).collect();
    // id 1's surviving occurrence is the delta one, after id 2.
    assert_eq!(ids, vec![Some(2), Some(1)]);
  }
}
