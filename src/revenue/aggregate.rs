//! Derived per-project financial aggregates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One day's activity on a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
  pub hours: f64,
  pub revenue: f64,
  /// Names of employees who logged time that day.
  #[serde(default)]
  pub employees: BTreeSet<String>,
  /// Identifiers of tasks worked that day.
  #[serde(default)]
  pub tasks: BTreeSet<String>,
}

/// Revenue and hours for one project, with a daily breakdown.
///
/// Totals are always derived by summing `daily_data`; merging a delta never
/// adds to a previously stored total directly, which would double-count
/// when incremental windows overlap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialAggregate {
  pub total_revenue: f64,
  pub total_hours: f64,
  pub daily_data: BTreeMap<NaiveDate, DailyEntry>,
}

impl FinancialAggregate {
  /// Fold one timesheet line's contribution into the day bucket. Call
  /// [`Self::recompute_totals`] once all lines are in.
  pub fn add_line(
    &mut self,
    date: NaiveDate,
    hours: f64,
    revenue: f64,
    employee: Option<&str>,
    task: Option<&str>,
  ) {
    let day = self.daily_data.entry(date).or_default();
    day.hours += hours;
    day.revenue += revenue;
    if let Some(name) = employee {
      day.employees.insert(name.to_string());
    }
    if let Some(id) = task {
      day.tasks.insert(id.to_string());
    }
  }

  /// Recompute the totals as the sum over all daily entries.
  pub fn recompute_totals(&mut self) {
    self.total_hours = self.daily_data.values().map(|d| d.hours).sum();
    self.total_revenue = self.daily_data.values().map(|d| d.revenue).sum();
  }

  /// Merge an incrementally computed delta into this aggregate: hours and
  /// revenue sum on overlapping dates, contributor sets union, new dates
  /// append, and the totals are recomputed from the daily data.
  pub fn merge_delta(&mut self, delta: &FinancialAggregate) {
    for (date, entry) in &delta.daily_data {
      let day = self.daily_data.entry(*date).or_default();
      day.hours += entry.hours;
      day.revenue += entry.revenue;
      day.employees.extend(entry.employees.iter().cloned());
      day.tasks.extend(entry.tasks.iter().cloned());
    }
    self.recompute_totals();
  }

  /// The aggregate restricted to `[from, to]`, totals recomputed over the
  /// filtered subset. Empty when no day falls in the range.
  pub fn filtered(&self, from: NaiveDate, to: NaiveDate) -> FinancialAggregate {
    let mut out = FinancialAggregate {
      daily_data: self
        .daily_data
        .range(from..=to)
        .map(|(d, e)| (*d, e.clone()))
        .collect(),
      ..FinancialAggregate::default()
    };
    out.recompute_totals();
    out
  }
}

/// Merge per-project deltas into a base aggregate map.
pub fn merge_aggregate_deltas(
  base: &mut BTreeMap<String, FinancialAggregate>,
  deltas: BTreeMap<String, FinancialAggregate>,
) {
  for (project, delta) in deltas {
    base.entry(project).or_default().merge_delta(&delta);
  }
}
