//! Owned application state.
//!
//! One `App` per running process: constructed from config, it loads the
//! persisted state at startup and is the only thing that mutates it.
//! Presentation code calls the four contracts exposed here (`refresh`,
//! `recalculate`, `financials`, job-rate read/write) and never touches the
//! store or the sync manager directly.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Utc};
use color_eyre::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::erp::client::ErpClient;
use crate::erp::record::RecordCollection;
use crate::erp::source::RecordSource;
use crate::rates::{JobRate, JobRateTable};
use crate::revenue::aggregate::{merge_aggregate_deltas, FinancialAggregate};
use crate::revenue::engine::{
  compute_project_financials, compute_project_financials_incremental, employee_job_title,
};
use crate::store::CacheStore;
use crate::sync::manager::{SyncManager, SyncReport};

/// Which recalculation path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcMode {
  Full,
  Incremental,
}

impl std::fmt::Display for RecalcMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Self::Full => "full",
      Self::Incremental => "incremental",
    })
  }
}

/// Result of a [`App::recalculate`] call.
#[derive(Debug, Clone)]
pub struct RecalcReport {
  pub mode: RecalcMode,
  /// Number of projects with aggregate data after the recalculation.
  pub projects: usize,
}

/// The application state object.
pub struct App<S = ErpClient> {
  store: CacheStore,
  sync: SyncManager<S>,
  rates: JobRateTable,
}

impl App<ErpClient> {
  /// Construct against the real ERP backend, opening the cache store at
  /// its configured (or default) location.
  pub fn new(config: &Config) -> Result<Self> {
    let client = ErpClient::new(config)?;
    let store = match &config.cache.path {
      Some(path) => CacheStore::open(path)?,
      None => CacheStore::open_default()?,
    };
    Self::with_source(client, store, config.stale_after(), config.overlap())
  }
}

impl<S: RecordSource> App<S> {
  /// Construct with an explicit source and store. This is also the test
  /// seam: any [`RecordSource`] works.
  pub fn with_source(
    source: S,
    store: CacheStore,
    stale_after: Duration,
    overlap: Duration,
  ) -> Result<Self> {
    let rates = store.load_job_rates().unwrap_or_else(|e| {
      warn!("Failed to load job rates, starting empty: {:#}", e);
      JobRateTable::new()
    });

    Ok(Self {
      store,
      sync: SyncManager::new(source, stale_after, overlap),
      rates,
    })
  }

  /// Ensure a usable snapshot (cached or refreshed), then fold any newly
  /// observed job titles into the rate table.
  pub async fn refresh(&mut self, force: bool) -> Result<SyncReport> {
    let report = self.sync.ensure_fresh(&self.store, force).await?;
    self.observe_job_titles(&report.snapshot.employees)?;
    Ok(report)
  }

  /// Bring the aggregate cache up to date.
  ///
  /// Full recompute when the recalculation state is missing or older than
  /// the last sync; otherwise an incremental pass bounded by the last
  /// recalculation date, merged into the cached aggregates.
  pub async fn recalculate(&mut self) -> Result<RecalcReport> {
    let report = self.refresh(false).await?;

    let last_sync = self.store.load_sync_state()?;
    let last_recalc = self.store.load_recalc_state()?;

    let (mode, aggregates) = match (last_recalc, last_sync) {
      // Nothing new arrived since the last recalculation: an incremental
      // pass bounded by that date suffices.
      (Some(recalc), Some(sync)) if recalc >= sync => {
        let since = recalc.date_naive();
        info!("Running incremental financial recomputation since {}", since);
        let deltas = compute_project_financials_incremental(&report.snapshot, &self.rates, since)?;
        let mut aggregates = self.store.load_aggregates(None)?;
        merge_aggregate_deltas(&mut aggregates, deltas);
        (RecalcMode::Incremental, aggregates)
      }
      _ => {
        info!("Running full financial recomputation");
        let aggregates = compute_project_financials(&report.snapshot, &self.rates, None)?;
        (RecalcMode::Full, aggregates)
      }
    };

    self.store.save_aggregates(&aggregates)?;
    self.store.save_recalc_state(Utc::now())?;

    Ok(RecalcReport {
      mode,
      projects: aggregates.len(),
    })
  }

  /// The cached per-project aggregates, optionally restricted to a date
  /// range (falling back to the unfiltered cache when the range matches
  /// nothing).
  pub fn financials(
    &self,
    range: Option<(NaiveDate, NaiveDate)>,
  ) -> Result<BTreeMap<String, FinancialAggregate>> {
    self.store.load_aggregates(range)
  }

  pub fn job_rates(&self) -> &JobRateTable {
    &self.rates
  }

  /// User-edit path: overwrite one title's rates and persist the table.
  pub fn set_job_rate(&mut self, title: &str, cost: &str, revenue: &str) -> Result<()> {
    self.rates.set(
      title,
      JobRate {
        cost: cost.to_string(),
        revenue: revenue.to_string(),
      },
    );
    self.store.save_job_rates(&self.rates)
  }

  /// Add titles seen in employee records to the rate table with empty
  /// rates. Existing entries are never touched.
  fn observe_job_titles(&mut self, employees: &RecordCollection) -> Result<()> {
    let titles: Vec<String> = employees.iter().filter_map(employee_job_title).collect();
    let added = self.rates.observe_titles(titles.iter().map(String::as_str));
    if added > 0 {
      info!("Observed {} new job titles", added);
      self.store.save_job_rates(&self.rates)?;
    }
    Ok(())
  }
}
