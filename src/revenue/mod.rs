//! Revenue derivation from timesheet, employee, and job-rate data.

pub mod aggregate;
pub mod engine;

pub use aggregate::{merge_aggregate_deltas, DailyEntry, FinancialAggregate};
pub use engine::{
  compute_project_financials, compute_project_financials_incremental, employee_job_title,
  HOURS_PER_DAY,
};
