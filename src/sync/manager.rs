//! Snapshot freshness policy.
//!
//! Decides between serving the cached snapshot, fetching incrementally, and
//! fetching from scratch; merges fetched deltas and persists the result.
//! The remote source failing is never fatal here: the previously cached
//! snapshot (or an empty one on first run) is served instead.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::erp::record::Snapshot;
use crate::erp::source::RecordSource;
use crate::store::CacheStore;

use super::merge::merge_snapshots;

/// How a [`SyncReport`]'s snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Cached snapshot served unchanged; no remote I/O happened.
  CacheFresh,
  /// Fresh data fetched (fully or incrementally) and persisted.
  Refreshed,
  /// The fetch failed; the stale cached snapshot is being served.
  FetchFailed,
  /// First-ever fetch failed; an empty snapshot is being served.
  InitialFetchFailed,
}

impl SyncOutcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::FetchFailed | Self::InitialFetchFailed)
  }
}

impl std::fmt::Display for SyncOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::CacheFresh => "up to date (cached)",
      Self::Refreshed => "refreshed from source",
      Self::FetchFailed => "could not refresh, serving cached data",
      Self::InitialFetchFailed => "could not fetch, no cached data available",
    };
    f.write_str(s)
  }
}

/// Result of an [`SyncManager::ensure_fresh`] call.
#[derive(Debug, Clone)]
pub struct SyncReport {
  pub snapshot: Snapshot,
  /// The instant the snapshot is valid as of: the fetch time for fresh
  /// data, the previous sync time when the cache was served.
  pub as_of: DateTime<Utc>,
  pub outcome: SyncOutcome,
}

/// Owns the staleness policy and the remote source.
pub struct SyncManager<S> {
  source: S,
  /// Cached data older than this is eligible for refresh.
  stale_after: Duration,
  /// Lookback subtracted from the last sync time on incremental fetches,
  /// so late-arriving or clock-skewed records are not missed.
  overlap: Duration,
}

impl<S: RecordSource> SyncManager<S> {
  pub fn new(source: S, stale_after: Duration, overlap: Duration) -> Self {
    Self {
      source,
      stale_after,
      overlap,
    }
  }

  /// Return a usable snapshot, fetching only when needed.
  ///
  /// - No cached snapshot or sync state: full fetch. A failure yields an
  ///   empty snapshot with [`SyncOutcome::InitialFetchFailed`].
  /// - Cache younger than the staleness threshold and `force` not set:
  ///   cached snapshot, zero remote I/O.
  /// - Otherwise: incremental fetch since `last_sync - overlap`, merged
  ///   into the cache. A failure serves the cached snapshot unchanged and
  ///   leaves the sync state untouched.
  ///
  /// Merge and persistence errors do propagate: the previously persisted
  /// snapshot remains valid in that case.
  pub async fn ensure_fresh(&self, store: &CacheStore, force: bool) -> Result<SyncReport> {
    let now = Utc::now();
    let cached = store.load_snapshot()?;
    let last_sync = store.load_sync_state()?;

    let (cached, last_sync) = match (cached, last_sync) {
      (Some(snapshot), Some(ts)) => (snapshot, ts),
      _ => {
        info!("No cached snapshot, performing full fetch");
        return match self.source.fetch(None).await {
          Ok(snapshot) => {
            store.save_snapshot(&snapshot)?;
            store.save_sync_state(now)?;
            Ok(SyncReport {
              snapshot,
              as_of: now,
              outcome: SyncOutcome::Refreshed,
            })
          }
          Err(err) => {
            warn!("Initial fetch failed: {:#}", err);
            Ok(SyncReport {
              snapshot: Snapshot::empty(),
              as_of: now,
              outcome: SyncOutcome::InitialFetchFailed,
            })
          }
        };
      }
    };

    if !force && now - last_sync < self.stale_after {
      debug!("Cached snapshot from {} is still fresh", last_sync);
      return Ok(SyncReport {
        snapshot: cached,
        as_of: last_sync,
        outcome: SyncOutcome::CacheFresh,
      });
    }

    let since = last_sync - self.overlap;
    info!("Fetching update since {} (force: {})", since, force);

    match self.source.fetch(Some(since)).await {
      Ok(delta) => {
        let merged = merge_snapshots(&cached, &delta)?;
        store.save_snapshot(&merged)?;
        store.save_sync_state(now)?;
        Ok(SyncReport {
          snapshot: merged,
          as_of: now,
          outcome: SyncOutcome::Refreshed,
        })
      }
      Err(err) => {
        warn!("Fetch failed, serving cached snapshot: {:#}", err);
        Ok(SyncReport {
          snapshot: cached,
          as_of: last_sync,
          outcome: SyncOutcome::FetchFailed,
        })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  use crate::erp::record::{Record, RecordCollection};

  /// Scripted source: pops one programmed response per fetch and records
  /// the `since` bound it was called with.
  struct StubSource {
    responses: Mutex<VecDeque<Result<Snapshot>>>,
    calls: AtomicUsize,
    last_since: Mutex<Option<Option<DateTime<Utc>>>>,
  }

  impl StubSource {
    fn new(responses: Vec<Result<Snapshot>>) -> Self {
      Self {
        responses: Mutex::new(responses.into()),
        calls: AtomicUsize::new(0),
        last_since: Mutex::new(None),
      }
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl RecordSource for StubSource {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Snapshot> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      *self.last_since.lock().unwrap() = Some(since);
      self
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(eyre!("No scripted response left")))
    }
  }

  fn store() -> (CacheStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path().join("cache.db")).unwrap();
    (store, dir)
  }

  fn snapshot_with_project(id: i64, name: &str) -> Snapshot {
    let record: Record = serde_json::from_value(json!({"id": id, "name": name})).unwrap();
    Snapshot {
      projects: RecordCollection::from_records(vec![record]),
      ..Snapshot::empty()
    }
  }

  fn manager(source: StubSource, stale_hours: i64) -> SyncManager<StubSource> {
    SyncManager::new(source, Duration::hours(stale_hours), Duration::hours(3))
  }

  #[tokio::test]
  async fn test_first_call_fetches_and_persists() {
    let (store, _dir) = store();
    let manager = manager(
      StubSource::new(vec![Ok(snapshot_with_project(1, "Alpha"))]),
      24,
    );

    let report = manager.ensure_fresh(&store, false).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Refreshed);
    assert_eq!(report.snapshot.projects.len(), 1);
    assert!(store.load_snapshot().unwrap().is_some());
    assert!(store.load_sync_state().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_second_call_within_window_serves_cache_without_io() {
    let (store, _dir) = store();
    let source = StubSource::new(vec![Ok(snapshot_with_project(1, "Alpha"))]);
    let manager = manager(source, 24);

    let first = manager.ensure_fresh(&store, false).await.unwrap();
    let second = manager.ensure_fresh(&store, false).await.unwrap();

    assert_eq!(second.outcome, SyncOutcome::CacheFresh);
    assert_eq!(second.snapshot, first.snapshot);
    assert_eq!(manager.source.calls(), 1);
  }

  #[tokio::test]
  async fn test_initial_fetch_failure_yields_empty_snapshot() {
    let (store, _dir) = store();
    let manager = manager(StubSource::new(vec![Err(eyre!("connection refused"))]), 24);

    let report = manager.ensure_fresh(&store, false).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::InitialFetchFailed);
    assert!(report.snapshot.is_empty());
    // Nothing persisted on failure.
    assert!(store.load_snapshot().unwrap().is_none());
    assert!(store.load_sync_state().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_forced_refresh_merges_delta() {
    let (store, _dir) = store();
    let source = StubSource::new(vec![
      Ok(snapshot_with_project(1, "Alpha")),
      Ok(snapshot_with_project(1, "Alpha renamed")),
    ]);
    let manager = manager(source, 24);

    manager.ensure_fresh(&store, false).await.unwrap();
    let report = manager.ensure_fresh(&store, true).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Refreshed);
    assert_eq!(report.snapshot.projects.len(), 1);
    assert_eq!(
      report.snapshot.projects.records[0].str_field("name"),
      Some("Alpha renamed")
    );

    // The since bound carries the overlap lookback.
    let last_since = manager.source.last_since.lock().unwrap().unwrap();
    let bound = last_since.unwrap();
    assert!(Utc::now() - bound >= Duration::hours(3));
  }

  #[tokio::test]
  async fn test_failed_refresh_serves_stale_cache_and_keeps_state() {
    let (store, _dir) = store();
    let source = StubSource::new(vec![
      Ok(snapshot_with_project(1, "Alpha")),
      Err(eyre!("gateway timeout")),
    ]);
    // Zero staleness: the second call always tries to refresh.
    let manager = manager(source, 0);

    let first = manager.ensure_fresh(&store, false).await.unwrap();
    let state_after_first = store.load_sync_state().unwrap();

    let second = manager.ensure_fresh(&store, false).await.unwrap();
    assert_eq!(second.outcome, SyncOutcome::FetchFailed);
    assert_eq!(second.snapshot, first.snapshot);
    assert_eq!(second.as_of, state_after_first.unwrap());
    assert_eq!(store.load_sync_state().unwrap(), state_after_first);
  }
}
