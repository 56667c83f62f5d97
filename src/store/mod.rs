//! Durable persistence for sync and revenue state.
//!
//! One SQLite database holds five independent state families: the snapshot
//! records, the last-sync timestamp, the job-rate table, the financial
//! aggregate cache, and the last-recalculation timestamp. Each family lives
//! in its own table and loads independently; corrupt rows are skipped with
//! a warning, never letting one family's damage take down the others.
//!
//! There is no cross-process locking around the database file; a single
//! active session per cache file is assumed. Concurrent writers can race.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::erp::record::{Record, Snapshot};
use crate::rates::{JobRate, JobRateTable};
use crate::revenue::aggregate::FinancialAggregate;

const SYNC_STATE_KEY: &str = "last_sync";
const RECALC_STATE_KEY: &str = "last_recalc";

const SCHEMA: &str = r#"
-- Cached snapshot, one row per record, ordered within its collection
CREATE TABLE IF NOT EXISTS snapshot_records (
    collection TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (collection, position)
);

-- Sync and recalculation timestamps (RFC 3339 text)
CREATE TABLE IF NOT EXISTS sync_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- User-maintained job rates, currency per 8-hour day
CREATE TABLE IF NOT EXISTS job_rates (
    job_title TEXT PRIMARY KEY,
    cost TEXT NOT NULL DEFAULT '',
    revenue TEXT NOT NULL DEFAULT ''
);

-- Derived per-project financial aggregates (serialized JSON)
CREATE TABLE IF NOT EXISTS financial_aggregates (
    project TEXT PRIMARY KEY,
    data BLOB NOT NULL
);
"#;

/// SQLite-backed store for all durable state.
pub struct CacheStore {
  conn: Mutex<Connection>,
}

impl CacheStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(Self::default_path()?)
  }

  /// The default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("opsdash").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  // --------------------------------------------------------------------
  // Snapshot
  // --------------------------------------------------------------------

  /// The cached snapshot, or `None` when nothing has been persisted yet.
  /// Rows that fail to deserialize are skipped.
  pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT collection, data FROM snapshot_records
         ORDER BY collection, position",
      )
      .map_err(|e| eyre!("Failed to prepare snapshot query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query snapshot records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    if rows.is_empty() {
      return Ok(None);
    }

    let mut snapshot = Snapshot::empty();
    for (collection, data) in rows {
      let Some(target) = snapshot.collection_mut(&collection) else {
        warn!("Skipping record from unknown collection {}", collection);
        continue;
      };
      match serde_json::from_slice::<Record>(&data) {
        Ok(record) => target.push(record),
        Err(e) => warn!("Skipping corrupt {} record: {}", collection, e),
      }
    }

    Ok(Some(snapshot))
  }

  /// Replace the persisted snapshot atomically.
  pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM snapshot_records", [])
      .map_err(|e| eyre!("Failed to clear old snapshot: {}", e))?;

    for (name, collection) in snapshot.collections() {
      for (position, record) in collection.iter().enumerate() {
        let data =
          serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
        tx.execute(
          "INSERT INTO snapshot_records (collection, position, data) VALUES (?, ?, ?)",
          params![name, position, data],
        )
        .map_err(|e| eyre!("Failed to store {} record: {}", name, e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit snapshot: {}", e))?;
    Ok(())
  }

  // --------------------------------------------------------------------
  // Sync / recalculation timestamps
  // --------------------------------------------------------------------

  pub fn load_sync_state(&self) -> Result<Option<DateTime<Utc>>> {
    self.load_timestamp(SYNC_STATE_KEY)
  }

  pub fn save_sync_state(&self, ts: DateTime<Utc>) -> Result<()> {
    self.save_timestamp(SYNC_STATE_KEY, ts)
  }

  pub fn load_recalc_state(&self) -> Result<Option<DateTime<Utc>>> {
    self.load_timestamp(RECALC_STATE_KEY)
  }

  pub fn save_recalc_state(&self, ts: DateTime<Utc>) -> Result<()> {
    self.save_timestamp(RECALC_STATE_KEY, ts)
  }

  fn load_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT value FROM sync_meta WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare meta query: {}", e))?;

    let value: Option<String> = stmt.query_row(params![key], |row| row.get(0)).ok();

    let Some(value) = value else {
      return Ok(None);
    };

    match DateTime::parse_from_rfc3339(&value) {
      Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
      Err(e) => {
        warn!("Ignoring unparseable {} timestamp {:?}: {}", key, value, e);
        Ok(None)
      }
    }
  }

  fn save_timestamp(&self, key: &str, ts: DateTime<Utc>) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
        params![key, ts.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store {} timestamp: {}", key, e))?;
    Ok(())
  }

  // --------------------------------------------------------------------
  // Job rates
  // --------------------------------------------------------------------

  pub fn load_job_rates(&self) -> Result<JobRateTable> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT job_title, cost, revenue FROM job_rates")
      .map_err(|e| eyre!("Failed to prepare job rates query: {}", e))?;

    let mut rates = JobRateTable::new();
    let rows: Vec<(String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query job rates: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    for (title, cost, revenue) in rows {
      rates.set(title, JobRate { cost, revenue });
    }

    Ok(rates)
  }

  pub fn save_job_rates(&self, rates: &JobRateTable) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM job_rates", [])
      .map_err(|e| eyre!("Failed to clear job rates: {}", e))?;

    for (title, rate) in rates.iter() {
      tx.execute(
        "INSERT INTO job_rates (job_title, cost, revenue) VALUES (?, ?, ?)",
        params![title, rate.cost, rate.revenue],
      )
      .map_err(|e| eyre!("Failed to store job rate for {}: {}", title, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit job rates: {}", e))?;
    Ok(())
  }

  // --------------------------------------------------------------------
  // Financial aggregates
  // --------------------------------------------------------------------

  /// The aggregate cache, optionally restricted to an inclusive date range
  /// over each project's daily data (totals recomputed over the filtered
  /// subset). When filtering leaves nothing at all, the unfiltered cache is
  /// returned instead so the caller always has something to show.
  pub fn load_aggregates(
    &self,
    range: Option<(NaiveDate, NaiveDate)>,
  ) -> Result<BTreeMap<String, FinancialAggregate>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT project, data FROM financial_aggregates")
      .map_err(|e| eyre!("Failed to prepare aggregates query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query aggregates: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let all: BTreeMap<String, FinancialAggregate> = rows
      .into_iter()
      .filter_map(
        |(project, data)| match serde_json::from_slice::<FinancialAggregate>(&data) {
          Ok(aggregate) => Some((project, aggregate)),
          Err(e) => {
            warn!("Skipping corrupt aggregate for {}: {}", project, e);
            None
          }
        },
      )
      .collect();

    let Some((from, to)) = range else {
      return Ok(all);
    };

    let filtered: BTreeMap<String, FinancialAggregate> = all
      .iter()
      .filter_map(|(project, aggregate)| {
        let filtered = aggregate.filtered(from, to);
        (!filtered.daily_data.is_empty()).then(|| (project.clone(), filtered))
      })
      .collect();

    if filtered.is_empty() && !all.is_empty() {
      warn!(
        "No aggregate data between {} and {}, returning unfiltered cache",
        from, to
      );
      return Ok(all);
    }

    Ok(filtered)
  }

  /// Replace the aggregate cache atomically.
  pub fn save_aggregates(&self, aggregates: &BTreeMap<String, FinancialAggregate>) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM financial_aggregates", [])
      .map_err(|e| eyre!("Failed to clear aggregates: {}", e))?;

    for (project, aggregate) in aggregates {
      let data = serde_json::to_vec(aggregate)
        .map_err(|e| eyre!("Failed to serialize aggregate for {}: {}", project, e))?;
      tx.execute(
        "INSERT INTO financial_aggregates (project, data) VALUES (?, ?)",
        params![project, data],
      )
      .map_err(|e| eyre!("Failed to store aggregate for {}: {}", project, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit aggregates: {}", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::erp::record::RecordCollection;
  use serde_json::json;

  fn open_store() -> (CacheStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path().join("cache.db")).unwrap();
    (store, dir)
  }

  fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
  }

  fn sample_snapshot() -> Snapshot {
    let project: Record = serde_json::from_value(json!({"id": 1, "name": "Alpha"})).unwrap();
    let line: Record = serde_json::from_value(
      json!({"employee_name": "Bob", "project_name": "Alpha", "unit_amount": 8, "date": "2024-01-01"}),
    )
    .unwrap();
    Snapshot {
      projects: RecordCollection::from_records(vec![project]),
      timesheet: RecordCollection::from_records(vec![line]),
      ..Snapshot::empty()
    }
  }

  #[test]
  fn test_snapshot_round_trip() {
    let (store, _dir) = open_store();
    assert!(store.load_snapshot().unwrap().is_none());

    let snapshot = sample_snapshot();
    store.save_snapshot(&snapshot).unwrap();

    let loaded = store.load_snapshot().unwrap().unwrap();
    assert_eq!(loaded, snapshot);
  }

  #[test]
  fn test_save_snapshot_replaces_previous() {
    let (store, _dir) = open_store();
    store.save_snapshot(&sample_snapshot()).unwrap();

    let smaller = Snapshot {
      projects: sample_snapshot().projects,
      ..Snapshot::empty()
    };
    store.save_snapshot(&smaller).unwrap();

    let loaded = store.load_snapshot().unwrap().unwrap();
    assert_eq!(loaded, smaller);
    assert!(loaded.timesheet.is_empty());
  }

  #[test]
  fn test_timestamps_round_trip_independently() {
    let (store, _dir) = open_store();
    assert!(store.load_sync_state().unwrap().is_none());
    assert!(store.load_recalc_state().unwrap().is_none());

    let sync_ts = Utc::now();
    store.save_sync_state(sync_ts).unwrap();

    assert_eq!(store.load_sync_state().unwrap(), Some(sync_ts));
    assert!(store.load_recalc_state().unwrap().is_none());

    let recalc_ts = Utc::now();
    store.save_recalc_state(recalc_ts).unwrap();
    assert_eq!(store.load_recalc_state().unwrap(), Some(recalc_ts));
    assert_eq!(store.load_sync_state().unwrap(), Some(sync_ts));
  }

  #[test]
  fn test_job_rates_round_trip() {
    let (store, _dir) = open_store();
    assert!(store.load_job_rates().unwrap().is_empty());

    let mut rates = JobRateTable::new();
    rates.set(
      "Engineer",
      JobRate {
        cost: "400".into(),
        revenue: "800".into(),
      },
    );
    rates.set("Designer", JobRate::default());
    store.save_job_rates(&rates).unwrap();

    assert_eq!(store.load_job_rates().unwrap(), rates);
  }

  fn sample_aggregates() -> BTreeMap<String, FinancialAggregate> {
    let mut alpha = FinancialAggregate::default();
    alpha.add_line(date("2024-01-01"), 8.0, 800.0, Some("Bob"), Some("99"));
    alpha.add_line(date("2024-02-01"), 4.0, 400.0, Some("Bob"), None);
    alpha.recompute_totals();

    let mut beta = FinancialAggregate::default();
    beta.add_line(date("2024-01-15"), 2.0, 100.0, Some("Eve"), None);
    beta.recompute_totals();

    BTreeMap::from([("Alpha".to_string(), alpha), ("Beta".to_string(), beta)])
  }

  #[test]
  fn test_aggregates_round_trip() {
    let (store, _dir) = open_store();
    store.save_aggregates(&sample_aggregates()).unwrap();
    assert_eq!(store.load_aggregates(None).unwrap(), sample_aggregates());
  }

  #[test]
  fn test_aggregates_range_filter_recomputes_totals() {
    let (store, _dir) = open_store();
    store.save_aggregates(&sample_aggregates()).unwrap();

    let january = store
      .load_aggregates(Some((date("2024-01-01"), date("2024-01-31"))))
      .unwrap();

    let alpha = &january["Alpha"];
    assert_eq!(alpha.daily_data.len(), 1);
    assert_eq!(alpha.total_hours, 8.0);
    assert_eq!(alpha.total_revenue, 800.0);
    assert!(january.contains_key("Beta"));
  }

  #[test]
  fn test_empty_range_falls_back_to_unfiltered_cache() {
    let (store, _dir) = open_store();
    store.save_aggregates(&sample_aggregates()).unwrap();

    let result = store
      .load_aggregates(Some((date("2030-01-01"), date("2030-12-31"))))
      .unwrap();

    // Nothing matched, so the whole cache comes back instead of nothing.
    assert_eq!(result, sample_aggregates());
  }

  #[test]
  fn test_corrupt_rows_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = CacheStore::open(&path).unwrap();
      store.save_snapshot(&sample_snapshot()).unwrap();
      store.save_aggregates(&sample_aggregates()).unwrap();
    }

    // Damage one row of each family behind the store's back.
    let conn = Connection::open(&path).unwrap();
    conn
      .execute(
        "INSERT INTO snapshot_records (collection, position, data) VALUES ('projects', 999, x'00')",
        [],
      )
      .unwrap();
    conn
      .execute(
        "UPDATE financial_aggregates SET data = x'00' WHERE project = 'Beta'",
        [],
      )
      .unwrap();
    conn
      .execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES ('last_sync', 'garbage')",
        [],
      )
      .unwrap();
    drop(conn);

    let store = CacheStore::open(&path).unwrap();

    let snapshot = store.load_snapshot().unwrap().unwrap();
    assert_eq!(snapshot.projects.len(), 1);

    let aggregates = store.load_aggregates(None).unwrap();
    assert!(aggregates.contains_key("Alpha"));
    assert!(!aggregates.contains_key("Beta"));

    assert!(store.load_sync_state().unwrap().is_none());
    assert!(store.load_job_rates().is_ok());
  }
}
