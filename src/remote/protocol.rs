//! Wire-level contracts of the five sync RPCs.
//!
//! These shapes mirror the backend's request/response models one-to-one;
//! the encoding itself (JSON over HTTP, protobuf, ...) is owned by the
//! `SyncService` implementation. Optional response fields capture servers
//! that omit dates or counters — the adapter fills the documented defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size for `ListDatasets`, large enough to keep request counts low.
pub const DATASET_PAGE_SIZE: u32 = 64;

/// Page size for `ListRecords`.
pub const RECORD_PAGE_SIZE: u32 = 1024;

// ============================================================================
// SyncService — the raw RPC surface
// ============================================================================

/// Blocking client for the backend's five RPCs.
///
/// Implementations handle transport, authentication, and encoding; the
/// engine only sees these typed calls and `ServiceError`.
pub trait SyncService: Send + Sync {
    fn list_datasets(
        &self,
        request: &ListDatasetsRequest,
    ) -> std::result::Result<ListDatasetsResponse, ServiceError>;

    fn describe_dataset(
        &self,
        request: &DescribeDatasetRequest,
    ) -> std::result::Result<DescribeDatasetResponse, ServiceError>;

    fn list_records(
        &self,
        request: &ListRecordsRequest,
    ) -> std::result::Result<ListRecordsResponse, ServiceError>;

    fn update_records(
        &self,
        request: &UpdateRecordsRequest,
    ) -> std::result::Result<UpdateRecordsResponse, ServiceError>;

    fn delete_dataset(
        &self,
        request: &DeleteDatasetRequest,
    ) -> std::result::Result<(), ServiceError>;
}

/// Failure classes a `SyncService` reports. The adapter maps these onto the
/// engine's error taxonomy.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource conflict: {0}")]
    ResourceConflict(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("i/o failure: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("service failure: {0}")]
    Service(String),
}

// ============================================================================
// ListDatasets
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDatasetsRequest {
    pub identity_pool_id: String,
    pub identity_id: String,
    pub next_token: Option<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDatasetsResponse {
    pub datasets: Vec<DatasetSummary>,
    pub next_token: Option<String>,
}

/// Server-side view of one dataset's metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset_name: String,
    pub creation_date: Option<i64>,
    pub last_modified_date: Option<i64>,
    pub last_modified_by: Option<String>,
    pub data_storage: Option<i64>,
    pub num_records: Option<i64>,
}

// ============================================================================
// DescribeDataset
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeDatasetRequest {
    pub identity_pool_id: String,
    pub identity_id: String,
    pub dataset_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeDatasetResponse {
    pub dataset: DatasetSummary,
}

// ============================================================================
// ListRecords
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRecordsRequest {
    pub identity_pool_id: String,
    pub identity_id: String,
    pub dataset_name: String,
    /// Return records written after this dataset sync count; `0` asks for
    /// the full record set.
    pub last_sync_count: i64,
    pub next_token: Option<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRecordsResponse {
    pub records: Vec<RecordEntry>,
    pub next_token: Option<String>,
    /// Optimistic-concurrency fence for the subsequent `UpdateRecords`.
    pub sync_session_token: Option<String>,
    pub dataset_sync_count: Option<i64>,
    pub dataset_exists: Option<bool>,
    pub dataset_deleted_after_requested_sync_count: Option<bool>,
    pub merged_dataset_names: Vec<String>,
}

/// Server-side view of one record. An absent value is a tombstone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordEntry {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: Option<i64>,
    pub last_modified_date: Option<i64>,
    pub device_last_modified_date: Option<i64>,
    pub last_modified_by: Option<String>,
}

// ============================================================================
// UpdateRecords
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecordsRequest {
    pub identity_pool_id: String,
    pub identity_id: String,
    pub dataset_name: String,
    pub sync_session_token: String,
    pub record_patches: Vec<RecordPatch>,
}

/// One optimistic write. `sync_count` is the record's last known server
/// version; the server rejects the whole batch when any base is stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPatch {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: i64,
    pub op: PatchOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    Replace,
    Remove,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRecordsResponse {
    pub records: Vec<RecordEntry>,
}

// ============================================================================
// DeleteDataset
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDatasetRequest {
    pub identity_pool_id: String,
    pub identity_id: String,
    pub dataset_name: String,
}
