//! Incremental snapshot synchronization.
//!
//! `manager` owns the staleness policy (serve cache / fetch incrementally /
//! fetch fully); `merge` folds fetched deltas into the cached snapshot
//! without duplication or loss.

pub mod manager;
pub mod merge;

pub use manager::{SyncManager, SyncOutcome, SyncReport};
pub use merge::{merge_collections, merge_snapshots};
