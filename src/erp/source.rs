//! The fetch seam to the remote ERP.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::record::Snapshot;

/// A source of ERP records. Implemented by [`super::client::ErpClient`] for
/// the real backend and by scripted stubs in tests.
///
/// The source is a black box: it may fail (network, auth, protocol), and the
/// caller is expected to fall back to cached data when it does.
#[async_trait]
pub trait RecordSource: Send + Sync {
  /// Fetch the six record collections, restricted to records created or
  /// modified after `since` when given. `None` means a full fetch.
  async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Snapshot>;
}
