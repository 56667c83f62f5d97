//! User-maintained job-rate table.
//!
//! Maps a job title to cost and revenue figures per 8-hour day. The values
//! stay as strings because the table is edited as free text; parsing
//! failures degrade to a zero rate rather than erroring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cost and revenue for one job title, in currency units per 8-hour day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRate {
  #[serde(default)]
  pub cost: String,
  #[serde(default)]
  pub revenue: String,
}

impl JobRate {
  /// The daily revenue rate, or 0.0 when absent, empty, or non-numeric.
  pub fn daily_revenue(&self) -> f64 {
    self.revenue.trim().parse().unwrap_or(0.0)
  }
}

/// Job title -> rate mapping with an independent lifecycle from the
/// snapshot: titles are added automatically as they are observed in
/// employee records, but entries are never silently removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRateTable(BTreeMap<String, JobRate>);

impl JobRateTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, title: &str) -> Option<&JobRate> {
    self.0.get(title)
  }

  /// Insert or replace the entry for a title. This is the user-edit path;
  /// the observation path below never overwrites.
  pub fn set(&mut self, title: impl Into<String>, rate: JobRate) {
    self.0.insert(title.into(), rate);
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &JobRate)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// The daily revenue rate for a title, 0.0 for unknown titles.
  pub fn daily_revenue(&self, title: &str) -> f64 {
    self.get(title).map(JobRate::daily_revenue).unwrap_or(0.0)
  }

  /// Add titles observed in employee data, with empty rates, skipping any
  /// already present. Returns how many were added.
  pub fn observe_titles<'a>(&mut self, titles: impl IntoIterator<Item = &'a str>) -> usize {
    let mut added = 0;
    for title in titles {
      if title.is_empty() {
        continue;
      }
      if !self.0.contains_key(title) {
        self.0.insert(title.to_string(), JobRate::default());
        added += 1;
      }
    }
    added
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_daily_revenue_parsing() {
    let rate = JobRate {
      cost: "400".into(),
      revenue: "800".into(),
    };
    assert_eq!(rate.daily_revenue(), 800.0);

    let empty = JobRate::default();
    assert_eq!(empty.daily_revenue(), 0.0);

    let garbage = JobRate {
      cost: String::new(),
      revenue: "eight hundred".into(),
    };
    assert_eq!(garbage.daily_revenue(), 0.0);
  }

  #[test]
  fn test_unknown_title_is_zero() {
    let table = JobRateTable::new();
    assert_eq!(table.daily_revenue("Engineer"), 0.0);
  }

  #[test]
  fn test_observe_is_additive_only() {
    let mut table = JobRateTable::new();
    table.set(
      "Engineer",
      JobRate {
        cost: "400".into(),
        revenue: "800".into(),
      },
    );

    let added = table.observe_titles(["Engineer", "Designer", ""]);
    assert_eq!(added, 1);

    // Existing entry untouched, new title present with empty rates.
    assert_eq!(table.daily_revenue("Engineer"), 800.0);
    assert_eq!(table.get("Designer"), Some(&JobRate::default()));
    assert_eq!(table.get(""), None);
  }
}
