//! Remote storage: the domain-level trait the sync state machine drives,
//! plus the wire protocol and the adapter that binds them together.

pub mod client;
pub mod protocol;

pub use client::SyncServiceStorage;

use crate::error::Result;
use crate::types::{DatasetMetadata, Record};

/// Everything `list_updates` learns about a dataset in one pull: the delta
/// records, the server's dataset counter, the session fence for the
/// follow-up push, and the dataset's liveness flags.
#[derive(Debug, Clone)]
pub struct DatasetUpdates {
    pub dataset_name: String,
    pub records: Vec<Record>,
    pub sync_count: i64,
    pub sync_session_token: String,
    pub exists: bool,
    /// The dataset was deleted after the requested sync count.
    pub deleted: bool,
    /// Datasets the server merged into this one; surfaced to the
    /// application, never drained by the engine itself.
    pub merged_dataset_names: Vec<String>,
}

/// The remote authoritative store. All operations block.
pub trait RemoteStorage: Send + Sync {
    /// Full metadata listing for the current identity.
    fn get_datasets(&self) -> Result<Vec<DatasetMetadata>>;

    /// Metadata of one dataset; `DatasetNotFound` when the server has no
    /// dataset of that name.
    fn get_dataset_metadata(&self, dataset_name: &str) -> Result<DatasetMetadata>;

    /// Records updated since `last_sync_count`; `0` returns the full set.
    /// A record with an absent value is a tombstone.
    fn list_updates(&self, dataset_name: &str, last_sync_count: i64) -> Result<DatasetUpdates>;

    /// Push local changes as an atomic patch batch fenced by the session
    /// token. Returns the server's view of each written record, or
    /// `DataConflict` when the server advanced past the token.
    fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: &str,
    ) -> Result<Vec<Record>>;

    fn delete_dataset(&self, dataset_name: &str) -> Result<()>;
}
