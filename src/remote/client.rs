//! `SyncServiceStorage` — thin adapter from the wire RPCs onto
//! `RemoteStorage`: pagination, identity refresh, record/patch conversion,
//! and error classification.

use std::sync::Arc;

use crate::error::{Result, StorageError, SyncError};
use crate::identity::IdentityBinding;
use crate::types::{DatasetMetadata, Record};

use super::protocol::{
    DatasetSummary, DeleteDatasetRequest, DescribeDatasetRequest, ListDatasetsRequest,
    ListRecordsRequest, PatchOp, RecordEntry, RecordPatch, ServiceError, SyncService,
    UpdateRecordsRequest, DATASET_PAGE_SIZE, RECORD_PAGE_SIZE,
};
use super::{DatasetUpdates, RemoteStorage};

/// Translate a `ServiceError` onto the engine taxonomy. Anything the
/// service could not classify lands in `Storage`, with the original error
/// preserved as the cause.
fn map_service_err(err: ServiceError, message: String) -> SyncError {
    match err {
        ServiceError::ResourceNotFound(_) => SyncError::DatasetNotFound(message),
        ServiceError::ResourceConflict(_) => SyncError::DataConflict(message),
        ServiceError::LimitExceeded(_) => SyncError::DataLimitExceeded(message),
        ServiceError::Io { .. } => SyncError::network(message, Some(Box::new(err))),
        ServiceError::Service(_) => SyncError::Storage(StorageError::Service {
            message,
            source: Some(Box::new(err)),
        }),
    }
}

fn summary_to_metadata(summary: &DatasetSummary) -> DatasetMetadata {
    DatasetMetadata {
        dataset_name: summary.dataset_name.clone(),
        creation_date: summary.creation_date.unwrap_or(0),
        last_modified_date: summary.last_modified_date.unwrap_or(0),
        last_modified_by: summary.last_modified_by.clone().unwrap_or_default(),
        storage_size_bytes: summary.data_storage.unwrap_or(0),
        record_count: summary.num_records.unwrap_or(0),
        last_sync_count: 0,
    }
}

/// Server records arrive clean: the dirty bit is down, and missing server
/// dates default to epoch 0.
fn entry_to_record(entry: &RecordEntry) -> Record {
    Record {
        key: entry.key.clone(),
        value: entry.value.clone(),
        sync_count: entry.sync_count.unwrap_or(0),
        last_modified_date: entry.last_modified_date.unwrap_or(0),
        device_last_modified_date: entry.device_last_modified_date.unwrap_or(0),
        last_modified_by: entry.last_modified_by.clone().unwrap_or_default(),
        modified: false,
    }
}

/// A tombstoned record pushes a `Remove`; everything else replaces at the
/// record's last known server version.
fn record_to_patch(record: &Record) -> RecordPatch {
    RecordPatch {
        key: record.key.clone(),
        value: record.value.clone(),
        sync_count: record.sync_count,
        op: if record.is_deleted() {
            PatchOp::Remove
        } else {
            PatchOp::Replace
        },
    }
}

// ============================================================================
// SyncServiceStorage
// ============================================================================

pub struct SyncServiceStorage {
    identity_pool_id: String,
    service: Arc<dyn SyncService>,
    identity: Arc<IdentityBinding>,
}

impl SyncServiceStorage {
    pub fn new(
        identity_pool_id: impl Into<String>,
        service: Arc<dyn SyncService>,
        identity: Arc<IdentityBinding>,
    ) -> Self {
        Self {
            identity_pool_id: identity_pool_id.into(),
            service,
            identity,
        }
    }

    /// Refresh the identity id through the binding. The id may change
    /// between calls; an in-flight call always completes with the id it
    /// started with.
    fn identity_id(&self) -> String {
        self.identity.identity_id()
    }
}

impl RemoteStorage for SyncServiceStorage {
    fn get_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        let identity_id = self.identity_id();
        let mut datasets = Vec::new();
        let mut next_token = None;

        loop {
            let response = self
                .service
                .list_datasets(&ListDatasetsRequest {
                    identity_pool_id: self.identity_pool_id.clone(),
                    identity_id: identity_id.clone(),
                    next_token: next_token.take(),
                    max_results: DATASET_PAGE_SIZE,
                })
                .map_err(|e| map_service_err(e, "failed to list dataset metadata".to_string()))?;

            datasets.extend(response.datasets.iter().map(summary_to_metadata));
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }

        Ok(datasets)
    }

    fn get_dataset_metadata(&self, dataset_name: &str) -> Result<DatasetMetadata> {
        let response = self
            .service
            .describe_dataset(&DescribeDatasetRequest {
                identity_pool_id: self.identity_pool_id.clone(),
                identity_id: self.identity_id(),
                dataset_name: dataset_name.to_string(),
            })
            .map_err(|e| {
                map_service_err(e, format!("failed to get metadata of dataset: {dataset_name}"))
            })?;

        Ok(summary_to_metadata(&response.dataset))
    }

    fn list_updates(&self, dataset_name: &str, last_sync_count: i64) -> Result<DatasetUpdates> {
        let identity_id = self.identity_id();
        let mut updates = DatasetUpdates {
            dataset_name: dataset_name.to_string(),
            records: Vec::new(),
            sync_count: 0,
            sync_session_token: String::new(),
            exists: true,
            deleted: false,
            merged_dataset_names: Vec::new(),
        };
        let mut next_token = None;

        loop {
            let response = self
                .service
                .list_records(&ListRecordsRequest {
                    identity_pool_id: self.identity_pool_id.clone(),
                    identity_id: identity_id.clone(),
                    dataset_name: dataset_name.to_string(),
                    last_sync_count,
                    next_token: next_token.take(),
                    max_results: RECORD_PAGE_SIZE,
                })
                .map_err(|e| {
                    map_service_err(e, format!("failed to list records in dataset: {dataset_name}"))
                })?;

            updates.records.extend(response.records.iter().map(entry_to_record));
            if let Some(token) = response.sync_session_token {
                updates.sync_session_token = token;
            }
            if let Some(count) = response.dataset_sync_count {
                updates.sync_count = count;
            }
            updates.exists = response.dataset_exists.unwrap_or(true);
            updates.deleted = response
                .dataset_deleted_after_requested_sync_count
                .unwrap_or(false);
            updates
                .merged_dataset_names
                .extend(response.merged_dataset_names);

            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }

        tracing::debug!(
            dataset = %dataset_name,
            since = last_sync_count,
            records = updates.records.len(),
            sync_count = updates.sync_count,
            "pulled remote updates"
        );
        Ok(updates)
    }

    fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: &str,
    ) -> Result<Vec<Record>> {
        let response = self
            .service
            .update_records(&UpdateRecordsRequest {
                identity_pool_id: self.identity_pool_id.clone(),
                identity_id: self.identity_id(),
                dataset_name: dataset_name.to_string(),
                sync_session_token: sync_session_token.to_string(),
                record_patches: records.iter().map(record_to_patch).collect(),
            })
            .map_err(|e| {
                map_service_err(e, format!("failed to update records in dataset: {dataset_name}"))
            })?;

        Ok(response.records.iter().map(entry_to_record).collect())
    }

    fn delete_dataset(&self, dataset_name: &str) -> Result<()> {
        self.service
            .delete_dataset(&DeleteDatasetRequest {
                identity_pool_id: self.identity_pool_id.clone(),
                identity_id: self.identity_id(),
                dataset_name: dataset_name.to_string(),
            })
            .map_err(|e| map_service_err(e, format!("failed to delete dataset: {dataset_name}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: Option<&str>, sync_count: i64) -> Record {
        Record {
            key: key.to_string(),
            value: value.map(str::to_string),
            sync_count,
            last_modified_date: 0,
            device_last_modified_date: 0,
            last_modified_by: String::new(),
            modified: true,
        }
    }

    // --- conversions ---

    #[test]
    fn live_record_becomes_replace_patch() {
        let patch = record_to_patch(&record("color", Some("blue"), 4));
        assert_eq!(patch.op, PatchOp::Replace);
        assert_eq!(patch.sync_count, 4);
        assert_eq!(patch.value.as_deref(), Some("blue"));
    }

    #[test]
    fn tombstone_becomes_remove_patch() {
        let patch = record_to_patch(&record("color", None, 4));
        assert_eq!(patch.op, PatchOp::Remove);
        assert!(patch.value.is_none());
    }

    #[test]
    fn entry_defaults_missing_server_fields() {
        let r = entry_to_record(&RecordEntry {
            key: "k".to_string(),
            value: Some("v".to_string()),
            sync_count: None,
            last_modified_date: None,
            device_last_modified_date: None,
            last_modified_by: None,
        });
        assert_eq!(r.sync_count, 0);
        assert_eq!(r.last_modified_date, 0);
        assert_eq!(r.device_last_modified_date, 0);
        assert!(!r.modified);
    }

    #[test]
    fn summary_defaults_and_fresh_sync_count() {
        let md = summary_to_metadata(&DatasetSummary {
            dataset_name: "d".to_string(),
            ..DatasetSummary::default()
        });
        assert_eq!(md.creation_date, 0);
        assert_eq!(md.last_sync_count, 0);
    }

    // --- error mapping ---

    #[test]
    fn service_errors_map_onto_the_taxonomy() {
        let cases: Vec<(ServiceError, fn(&SyncError) -> bool)> = vec![
            (ServiceError::ResourceNotFound("x".into()), |e| {
                matches!(e, SyncError::DatasetNotFound(_))
            }),
            (ServiceError::ResourceConflict("x".into()), |e| {
                matches!(e, SyncError::DataConflict(_))
            }),
            (ServiceError::LimitExceeded("x".into()), |e| {
                matches!(e, SyncError::DataLimitExceeded(_))
            }),
            (
                ServiceError::Io {
                    message: "x".into(),
                    source: None,
                },
                |e| matches!(e, SyncError::Network { .. }),
            ),
            (ServiceError::Service("x".into()), |e| {
                matches!(e, SyncError::Storage(_))
            }),
        ];
        for (service_err, check) in cases {
            let mapped = map_service_err(service_err, "context".to_string());
            assert!(check(&mapped), "unexpected mapping: {mapped:?}");
        }
    }
}
