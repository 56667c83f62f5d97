//! Dynamic record model for ERP data.
//!
//! The ERP does not guarantee a fixed schema: fields may be present in one
//! fetch and absent from the next, and foreign keys arrive as `[id, label]`
//! pairs. Records are therefore field-name -> value maps with explicit
//! `Option` accessors rather than fixed structs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single ERP record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
  pub fn new() -> Self {
    Self(Map::new())
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn set(&mut self, field: impl Into<String>, value: Value) {
    self.0.insert(field.into(), value);
  }

  pub fn remove(&mut self, field: &str) -> Option<Value> {
    self.0.remove(field)
  }

  /// The record's identity, when it has one. Tolerates ids encoded as
  /// `[id, label]` pairs.
  pub fn id(&self) -> Option<i64> {
    self.get("id").and_then(extract_id)
  }

  /// A field as a string slice. Numbers are not coerced.
  pub fn str_field(&self, field: &str) -> Option<&str> {
    self.get(field).and_then(Value::as_str)
  }

  /// A field as a float. Accepts integers and floats, not strings.
  pub fn num_field(&self, field: &str) -> Option<f64> {
    self.get(field).and_then(Value::as_f64)
  }

  /// A field parsed as a calendar date. See [`parse_date`] for the accepted
  /// formats.
  pub fn date_field(&self, field: &str) -> Option<NaiveDate> {
    self.str_field(field).and_then(parse_date)
  }

  pub fn field_names(&self) -> impl Iterator<Item = &String> {
    self.0.keys()
  }
}

/// Extract the scalar id from a value that is either a plain id or an
/// `[id, label]` pair.
pub fn extract_id(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64(),
    Value::Array(items) => items.first().and_then(Value::as_i64),
    _ => None,
  }
}

/// Extract the display label from an `[id, label]` pair. Plain strings pass
/// through unchanged.
pub fn extract_label(value: &Value) -> Option<&str> {
  match value {
    Value::String(s) => Some(s),
    Value::Array(items) if items.len() > 1 => items[1].as_str(),
    _ => None,
  }
}

/// Parse a date from the textual forms the ERP emits: plain dates
/// (`2024-01-01`), datetimes (`2024-01-01 13:45:00`), and RFC 3339.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Some(d);
  }
  if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
    return Some(dt.date());
  }
  chrono::DateTime::parse_from_rfc3339(s)
    .ok()
    .map(|dt| dt.date_naive())
}

/// An ordered collection of records for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCollection {
  pub records: Vec<Record>,
}

impl RecordCollection {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_records(records: Vec<Record>) -> Self {
    Self { records }
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Record> {
    self.records.iter()
  }

  pub fn push(&mut self, record: Record) {
    self.records.push(record);
  }

  /// Whether any record in the collection carries the given field.
  pub fn has_field(&self, field: &str) -> bool {
    self.records.iter().any(|r| r.get(field).is_some())
  }

  /// First field name (in record order) matching the predicate. Used to
  /// locate columns like "the date column" in loosely-schemed data.
  pub fn find_field(&self, pred: impl Fn(&str) -> bool) -> Option<String> {
    self
      .records
      .iter()
      .flat_map(|r| r.field_names())
      .find(|name| pred(name))
      .cloned()
  }
}

/// All known data as of some instant: one collection per entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub projects: RecordCollection,
  pub employees: RecordCollection,
  pub sales: RecordCollection,
  pub financials: RecordCollection,
  pub timesheet: RecordCollection,
  pub tasks: RecordCollection,
}

impl Snapshot {
  /// Six empty collections.
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.collections().iter().all(|(_, c)| c.is_empty())
  }

  /// The collections paired with their names, in fetch order.
  pub fn collections(&self) -> [(&'static str, &RecordCollection); 6] {
    [
      ("projects", &self.projects),
      ("employees", &self.employees),
      ("sales", &self.sales),
      ("financials", &self.financials),
      ("timesheet", &self.timesheet),
      ("tasks", &self.tasks),
    ]
  }

  pub fn collection_mut(&mut self, name: &str) -> Option<&mut RecordCollection> {
    match name {
      "projects" => Some(&mut self.projects),
      "employees" => Some(&mut self.employees),
      "sales" => Some(&mut self.sales),
      "financials" => Some(&mut self.financials),
      "timesheet" => Some(&mut self.timesheet),
      "tasks" => Some(&mut self.tasks),
      _ => None,
    }
  }
}
