//! Local persistence: the `LocalStorage` trait and its SQLite backend.

pub mod sqlite;

pub use sqlite::SqliteLocalStore;

use crate::error::Result;
use crate::types::{DatasetMetadata, Record};

/// ACID persistence of datasets, records, and per-identity sync counters.
///
/// Every row is scoped by an identity id. All mutating operations are atomic
/// with respect to crashes (each runs in a single transaction), and the
/// whole store is serialized under one per-database lock.
pub trait LocalStorage: Send + Sync {
    /// Create a dataset row if it does not exist yet. Idempotent.
    fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    /// All dataset metadata rows under an identity, shadows included.
    fn get_datasets(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>>;

    /// Metadata of one dataset, or `None` when it was never created.
    fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>>;

    /// Bulk-merge remote metadata. Record contents are not touched, and the
    /// local `last_sync_count` of existing rows is preserved.
    fn update_dataset_metadata(
        &self,
        identity_id: &str,
        datasets: &[DatasetMetadata],
    ) -> Result<()>;

    /// Mark a dataset deleted locally: `last_sync_count` becomes `-1` and
    /// every record turns into a tombstone. The rows survive until
    /// `purge_dataset` runs after the remote deletion is confirmed.
    fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    /// Physically remove a dataset's records and metadata.
    fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    /// Local write. Sets the record's dirty bit, stamps the device clock,
    /// and leaves `sync_count` untouched. `None` writes a tombstone.
    fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;

    /// Batched `put_value` in one transaction.
    fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &[(String, String)],
    ) -> Result<()>;

    /// Value of a record, `None` when absent or tombstoned.
    fn get_value(&self, identity_id: &str, dataset_name: &str, key: &str)
        -> Result<Option<String>>;

    /// Full record row, tombstones included. `None` when the row is absent.
    fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>>;

    /// Every record of a dataset, tombstones included.
    fn get_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>>;

    /// Records with the dirty bit set, tombstones included.
    fn get_modified_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>>;

    /// Remote-authoritative merge: writes exactly the supplied rows,
    /// including their `sync_count` and dirty/tombstone state, and leaves
    /// rows outside the batch alone.
    fn put_records(&self, identity_id: &str, dataset_name: &str, records: &[Record])
        -> Result<()>;

    /// The dataset's last known server sync count; `0` when the dataset row
    /// is absent, `-1` when the dataset is deleted locally.
    fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> Result<i64>;

    fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<()>;

    /// Relocate every row from `old_identity_id` to `new_identity_id` in a
    /// single transaction. When the destination already has a dataset of the
    /// same name, the destination wins and the source dataset is preserved
    /// as a merged-dataset shadow `"{name}.{old_identity_id}"` under the new
    /// identity.
    fn change_identity_id(&self, old_identity_id: &str, new_identity_id: &str) -> Result<()>;

    /// Remove every row of every identity.
    fn wipe_data(&self) -> Result<()>;
}
