//! Error conditions callers need to branch on.
//!
//! Most failures flow through `color_eyre` like the rest of the crate; the
//! variants here are the ones the revenue engine must surface distinctly so
//! a missing schema is never mistaken for "no data" or a stale cache.

use thiserror::Error;

/// Fatal preconditions of the revenue computation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
  /// The timesheet collection has no recognizable date column; there is no
  /// axis to aggregate along.
  #[error("no date column found in timesheet data")]
  MissingDateColumn,

  /// The timesheet collection has no column linking entries to employees.
  #[error("no column found to link timesheet entries to employees")]
  MissingEmployeeLink,
}
