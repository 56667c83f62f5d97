//! ERP record model and remote client.
//!
//! `record` defines the dynamic-schema data model shared by the whole
//! system; `source` is the black-box fetch boundary; `client` implements it
//! against the ERP's JSON-RPC endpoint.

pub mod client;
pub mod record;
pub mod source;

pub use client::ErpClient;
pub use record::{Record, RecordCollection, Snapshot};
pub use source::RecordSource;
