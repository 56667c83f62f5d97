//! Revenue computation.
//!
//! Joins timesheet lines to employees and job rates to derive per-project,
//! per-day revenue and hour totals. Schema problems (no date axis, no way
//! to link lines to employees) are fatal; individual join misses are not:
//! an unresolvable line contributes neither hours nor revenue, so totals
//! stay consistent with each other.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::warn;

use crate::erp::record::{extract_id, extract_label, Record, Snapshot};
use crate::error::EngineError;
use crate::rates::JobRateTable;

use super::aggregate::FinancialAggregate;

/// Rates are quoted per 8-hour workday; hours convert through this.
pub const HOURS_PER_DAY: f64 = 8.0;

/// Compute per-project aggregates over the whole snapshot, optionally
/// restricted to an inclusive date range. Projects with no timesheet
/// activity are absent from the result.
pub fn compute_project_financials(
  snapshot: &Snapshot,
  rates: &JobRateTable,
  range: Option<(NaiveDate, NaiveDate)>,
) -> Result<BTreeMap<String, FinancialAggregate>, EngineError> {
  compute(snapshot, rates, &LineFilter::Range(range))
}

/// Compute per-project aggregates from timesheet lines strictly after
/// `since`. The caller merges the returned deltas into previously cached
/// aggregates (see [`super::aggregate::merge_aggregate_deltas`]).
pub fn compute_project_financials_incremental(
  snapshot: &Snapshot,
  rates: &JobRateTable,
  since: NaiveDate,
) -> Result<BTreeMap<String, FinancialAggregate>, EngineError> {
  compute(snapshot, rates, &LineFilter::Since(since))
}

/// Resolve an employee's job title: a direct `job_title` field wins, then
/// the label half of a composite `job_id`.
pub fn employee_job_title(employee: &Record) -> Option<String> {
  if let Some(title) = employee.str_field("job_title") {
    return Some(title.to_string());
  }
  employee
    .get("job_id")
    .and_then(extract_label)
    .map(String::from)
}

enum LineFilter {
  Range(Option<(NaiveDate, NaiveDate)>),
  Since(NaiveDate),
}

impl LineFilter {
  fn accepts(&self, date: NaiveDate) -> bool {
    match self {
      Self::Range(None) => true,
      Self::Range(Some((from, to))) => *from <= date && date <= *to,
      Self::Since(since) => date > *since,
    }
  }
}

fn compute(
  snapshot: &Snapshot,
  rates: &JobRateTable,
  filter: &LineFilter,
) -> Result<BTreeMap<String, FinancialAggregate>, EngineError> {
  let timesheet = &snapshot.timesheet;

  // No data is an empty result, not a schema error.
  if timesheet.is_empty() {
    return Ok(BTreeMap::new());
  }

  let date_column = timesheet
    .find_field(|name| name.to_lowercase().contains("date"))
    .ok_or(EngineError::MissingDateColumn)?;
  let employee_column = timesheet
    .find_field(|name| {
      let name = name.to_lowercase();
      name.contains("employee") || name.contains("user")
    })
    .ok_or(EngineError::MissingEmployeeLink)?;

  let mut by_name: HashMap<&str, &Record> = HashMap::new();
  let mut by_id: HashMap<i64, &Record> = HashMap::new();
  for employee in snapshot.employees.iter() {
    if let Some(name) = employee.str_field("name") {
      by_name.insert(name, employee);
    }
    if let Some(id) = employee.id() {
      by_id.insert(id, employee);
    }
  }

  let mut lines_by_project: HashMap<&str, Vec<&Record>> = HashMap::new();
  for line in timesheet.iter() {
    if let Some(project) = line.str_field("project_name") {
      lines_by_project.entry(project).or_default().push(line);
    }
  }

  let mut result = BTreeMap::new();

  for project in snapshot.projects.iter() {
    let Some(name) = project.str_field("name") else {
      continue;
    };
    let Some(lines) = lines_by_project.get(name) else {
      continue;
    };

    let mut aggregate = FinancialAggregate::default();

    for line in lines {
      let Some(date) = line.date_field(&date_column) else {
        continue;
      };
      if !filter.accepts(date) {
        continue;
      }

      // Resolve the employee by display name, falling back to the id link
      // when the name is unavailable.
      let employee = match line.str_field("employee_name") {
        Some(employee_name) => by_name.get(employee_name).copied(),
        None => line
          .get(&employee_column)
          .and_then(extract_id)
          .and_then(|id| by_id.get(&id).copied()),
      };

      let Some(employee) = employee else {
        // Excluded from both hours and revenue so the totals agree.
        warn!(
          "No matching employee for timesheet line on project {} ({}: {:?})",
          name,
          employee_column,
          line.get(&employee_column)
        );
        continue;
      };

      let job_title = employee_job_title(employee).unwrap_or_else(|| "Unknown".to_string());
      let daily_rate = rates.daily_revenue(&job_title);

      let hours = line.num_field("unit_amount").unwrap_or(0.0);
      let revenue = hours / HOURS_PER_DAY * daily_rate;

      aggregate.add_line(
        date,
        hours,
        revenue,
        employee.str_field("name"),
        task_ident(line).as_deref(),
      );
    }

    // Absence means zero activity, not zero-with-entry.
    if aggregate.daily_data.is_empty() {
      continue;
    }
    aggregate.recompute_totals();
    result.insert(name.to_string(), aggregate);
  }

  Ok(result)
}

/// Normalize a task reference (scalar id, `[id, label]` pair, or string)
/// to a scalar identifier.
fn task_ident(line: &Record) -> Option<String> {
  let value = line.get("task_id")?;
  if let Some(id) = extract_id(value) {
    return Some(id.to_string());
  }
  value.as_str().map(String::from)
}
