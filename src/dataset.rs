//! Per-dataset façade: local CRUD against the cache, plus the sync state
//! machine that reconciles the dataset with the remote store.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crate::error::{Result, SyncError};
use crate::identity::IdentityBinding;
use crate::remote::RemoteStorage;
use crate::storage::LocalStorage;
use crate::types::{validate_record_key, DatasetMetadata, Record, SyncConflict};

/// Retries a sync session grants itself before giving up.
const MAX_RETRY: i32 = 3;

// ============================================================================
// SyncCallback
// ============================================================================

/// Application hooks steering a sync session.
///
/// The boolean returns are the cooperative cancellation channel: `true`
/// lets the session continue (re-entering the state machine where the
/// contract says so), `false` stops it. Callbacks run on the sync worker
/// thread and may block.
pub trait SyncCallback: Send + Sync {
    /// The session finished; `updated_records` are the remote records that
    /// were applied to the local cache during the pull phase.
    fn on_success(&self, dataset: &Dataset, updated_records: &[Record]);

    /// The session terminated with an error.
    fn on_failure(&self, error: SyncError);

    /// Pulled records collide with dirty local ones. Resolve them via
    /// `Dataset::resolve` and return `true` to retry, or `false` to stop
    /// the session.
    fn on_conflict(&self, dataset: &Dataset, conflicts: &[SyncConflict]) -> bool;

    /// The remote store no longer has this dataset. Return `true` to purge
    /// the local copy and finish, `false` to stop the session.
    fn on_dataset_deleted(&self, dataset: &Dataset, dataset_name: &str) -> bool;

    /// The server (or a local identity merge) folded other datasets into
    /// this one. Return `true` to continue syncing after draining them,
    /// `false` to stop the session.
    fn on_datasets_merged(&self, dataset: &Dataset, dataset_names: &[String]) -> bool;
}

/// Where the state machine goes after one attempt.
enum SyncFlow {
    /// The session is over; all callbacks that will fire have fired.
    Finished,
    /// Re-enter from the local-delete check with one fewer retry.
    Retry,
}

// ============================================================================
// Dataset
// ============================================================================

/// Handle to one named dataset. Cheap to clone; all clones share the same
/// storage. Local reads and writes are synchronous and never touch the
/// network; `synchronize` runs on its own worker thread.
#[derive(Clone)]
pub struct Dataset {
    inner: Arc<DatasetInner>,
}

struct DatasetInner {
    dataset_name: String,
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<IdentityBinding>,
}

impl Dataset {
    pub(crate) fn new(
        dataset_name: impl Into<String>,
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<IdentityBinding>,
    ) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                dataset_name: dataset_name.into(),
                local,
                remote,
                identity,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.dataset_name
    }

    fn identity_id(&self) -> String {
        self.inner.identity.identity_id()
    }

    // -----------------------------------------------------------------------
    // Local CRUD
    // -----------------------------------------------------------------------

    /// Write a value. Marks the record dirty until the next successful push.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_record_key(key)?;
        self.inner
            .local
            .put_value(&self.identity_id(), self.name(), key, Some(value))
    }

    /// Batched writes in one transaction. Every key is validated before
    /// anything is written.
    pub fn put_all(&self, values: &[(String, String)]) -> Result<()> {
        for (key, _) in values {
            validate_record_key(key)?;
        }
        self.inner
            .local
            .put_all_values(&self.identity_id(), self.name(), values)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        validate_record_key(key)?;
        self.inner
            .local
            .get_value(&self.identity_id(), self.name(), key)
    }

    /// All live key/value pairs; tombstones are skipped.
    pub fn get_all(&self) -> Result<HashMap<String, String>> {
        let records = self
            .inner
            .local
            .get_records(&self.identity_id(), self.name())?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.value.map(|v| (r.key, v)))
            .collect())
    }

    /// Every record row, tombstones included.
    pub fn get_all_records(&self) -> Result<Vec<Record>> {
        self.inner
            .local
            .get_records(&self.identity_id(), self.name())
    }

    /// Deletion is a write: the row stays as a tombstone until the remote
    /// store acknowledges it.
    pub fn remove(&self, key: &str) -> Result<()> {
        validate_record_key(key)?;
        self.inner
            .local
            .put_value(&self.identity_id(), self.name(), key, None)
    }

    /// Whether a record carries unpushed local changes.
    pub fn is_changed(&self, key: &str) -> Result<bool> {
        validate_record_key(key)?;
        let record = self
            .inner
            .local
            .get_record(&self.identity_id(), self.name(), key)?;
        Ok(record.is_some_and(|r| r.modified))
    }

    /// Mark the whole dataset deleted locally; the next `synchronize`
    /// pushes the deletion to the remote store.
    pub fn delete(&self) -> Result<()> {
        self.inner
            .local
            .delete_dataset(&self.identity_id(), self.name())
    }

    /// Force-write remote-authoritative rows, used by the conflict callback
    /// to install the winning records.
    pub fn resolve(&self, records: &[Record]) -> Result<()> {
        self.inner
            .local
            .put_records(&self.identity_id(), self.name(), records)
    }

    pub fn get_dataset_metadata(&self) -> Result<Option<DatasetMetadata>> {
        self.inner
            .local
            .get_dataset_metadata(&self.identity_id(), self.name())
    }

    /// Total size of all records, tombstones counting their key only.
    pub fn get_total_size_in_bytes(&self) -> Result<i64> {
        let records = self
            .inner
            .local
            .get_records(&self.identity_id(), self.name())?;
        Ok(records.iter().map(Record::size_in_bytes).sum())
    }

    /// Size of one record, `0` when the row is absent.
    pub fn get_size_in_bytes(&self, key: &str) -> Result<i64> {
        validate_record_key(key)?;
        let record = self
            .inner
            .local
            .get_record(&self.identity_id(), self.name(), key)?;
        Ok(record.as_ref().map_or(0, Record::size_in_bytes))
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// Reconcile this dataset with the remote store.
    ///
    /// Never runs on the caller's thread: the session is dispatched to a
    /// worker, whose handle is returned, and the callback fires there.
    pub fn synchronize(&self, callback: Arc<dyn SyncCallback>) -> thread::JoinHandle<()> {
        let dataset = self.clone();
        thread::spawn(move || dataset.run_sync(callback.as_ref()))
    }

    fn run_sync(&self, callback: &dyn SyncCallback) {
        tracing::debug!(dataset = %self.name(), "starting synchronization");

        // Surface unprocessed merged-dataset shadows before anything else.
        // The return value does not gate the session.
        match self.local_merged_datasets() {
            Ok(shadows) if !shadows.is_empty() => {
                tracing::info!(
                    dataset = %self.name(),
                    count = shadows.len(),
                    "found local merged datasets"
                );
                callback.on_datasets_merged(self, &shadows);
            }
            Ok(_) => {}
            Err(err) => {
                callback.on_failure(err);
                return;
            }
        }

        let mut retries_left = MAX_RETRY;
        loop {
            if retries_left < 0 {
                tracing::error!(
                    dataset = %self.name(),
                    "synchronization failed: exceeded maximum retries"
                );
                return;
            }
            match self.sync_attempt(callback) {
                Ok(SyncFlow::Finished) => {
                    tracing::debug!(dataset = %self.name(), "synchronization finished");
                    return;
                }
                Ok(SyncFlow::Retry) => retries_left -= 1,
                Err(err) => {
                    callback.on_failure(err);
                    return;
                }
            }
        }
    }

    /// One pass through the pull/push machine. `Err` terminates the session
    /// through `on_failure`; `SyncFlow::Retry` re-enters with one fewer
    /// retry.
    fn sync_attempt(&self, callback: &dyn SyncCallback) -> Result<SyncFlow> {
        let identity_id = self.identity_id();
        let dataset_name = self.name();
        let local = &self.inner.local;
        let remote = &self.inner.remote;

        // A locally deleted dataset pushes its deletion and stops there.
        let last_sync_count = local.get_last_sync_count(&identity_id, dataset_name)?;
        if last_sync_count == -1 {
            remote.delete_dataset(dataset_name)?;
            local.purge_dataset(&identity_id, dataset_name)?;
            callback.on_success(self, &[]);
            return Ok(SyncFlow::Finished);
        }

        // Pull the remote delta.
        let updates = remote.list_updates(dataset_name, last_sync_count)?;

        if !updates.merged_dataset_names.is_empty() {
            tracing::info!(
                dataset = %dataset_name,
                count = updates.merged_dataset_names.len(),
                "server reports merged datasets"
            );
            return if callback.on_datasets_merged(self, &updates.merged_dataset_names) {
                Ok(SyncFlow::Retry)
            } else {
                Err(SyncError::ManualCancel)
            };
        }

        // `exists = false` at sync count 0 only means nothing was ever
        // pushed; past that point it is a remote deletion.
        if (last_sync_count != 0 && !updates.exists) || updates.deleted {
            return if callback.on_dataset_deleted(self, &updates.dataset_name) {
                local.delete_dataset(&identity_id, dataset_name)?;
                local.purge_dataset(&identity_id, dataset_name)?;
                callback.on_success(self, &[]);
                Ok(SyncFlow::Finished)
            } else {
                Err(SyncError::ManualCancel)
            };
        }

        // A conflict is a pulled record whose local row is dirty with a
        // byte-different value (tombstone vs. value included).
        let mut conflicts = Vec::new();
        for remote_record in &updates.records {
            let local_record = local.get_record(&identity_id, dataset_name, &remote_record.key)?;
            if let Some(local_record) = local_record {
                if local_record.modified && local_record.value != remote_record.value {
                    conflicts.push(SyncConflict {
                        remote: remote_record.clone(),
                        local: local_record,
                    });
                }
            }
        }
        if !conflicts.is_empty() {
            tracing::info!(
                dataset = %dataset_name,
                count = conflicts.len(),
                "records in conflict"
            );
            return if callback.on_conflict(self, &conflicts) {
                Ok(SyncFlow::Retry)
            } else {
                // The session ends with the callback's own disposition;
                // neither on_success nor on_failure fires.
                Ok(SyncFlow::Finished)
            };
        }

        // Apply the pulled batch and mirror the server's dataset counter.
        if !updates.records.is_empty() {
            tracing::info!(
                dataset = %dataset_name,
                count = updates.records.len(),
                "saving remote records"
            );
        }
        local.put_records(&identity_id, dataset_name, &updates.records)?;
        local.update_last_sync_count(&identity_id, dataset_name, updates.sync_count)?;

        // Push local changes under the session token.
        let changes = local.get_modified_records(&identity_id, dataset_name)?;
        if !changes.is_empty() {
            tracing::info!(
                dataset = %dataset_name,
                count = changes.len(),
                "pushing local records"
            );
            let result =
                match remote.put_records(dataset_name, &changes, &updates.sync_session_token) {
                    Ok(result) => result,
                    Err(SyncError::DataConflict(_)) => {
                        tracing::info!(
                            dataset = %dataset_name,
                            "push rejected, server advanced; retrying"
                        );
                        return Ok(SyncFlow::Retry);
                    }
                    Err(err) => return Err(err),
                };
            local.put_records(&identity_id, dataset_name, &result)?;

            // Advance the counter only when this push was the sole writer;
            // otherwise the next session pulls the gap.
            let new_sync_count = result.iter().map(|r| r.sync_count).max().unwrap_or(0);
            if new_sync_count == updates.sync_count + 1 {
                tracing::debug!(
                    dataset = %dataset_name,
                    sync_count = new_sync_count,
                    "updated last sync count"
                );
                local.update_last_sync_count(&identity_id, dataset_name, new_sync_count)?;
            }
        }

        callback.on_success(self, &updates.records);
        Ok(SyncFlow::Finished)
    }

    /// Dataset names under this identity that were merged into this dataset
    /// and not drained yet: anything prefixed `"{name}."`.
    fn local_merged_datasets(&self) -> Result<Vec<String>> {
        let prefix = format!("{}.", self.name());
        let datasets = self.inner.local.get_datasets(&self.identity_id())?;
        Ok(datasets
            .into_iter()
            .filter(|d| d.dataset_name.starts_with(&prefix))
            .map(|d| d.dataset_name)
            .collect())
    }
}
