//! Core data types: records, dataset metadata, conflicts, and the
//! validation rules shared by every public entry point.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::error::{Result, SyncError};

/// Identity scope used for rows written before a real identity id is known.
/// Once the credentials provider reports an id, all rows under this sentinel
/// are rekeyed to it in a single transaction.
pub const UNKNOWN_IDENTITY_ID: &str = "unknown";

/// Dataset names and record keys share one shape.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9_.:-]{1,128}$").expect("name pattern compiles"));

// ============================================================================
// Validation
// ============================================================================

/// Validate a dataset name against `[a-zA-Z0-9_.:-]{1,128}`.
pub fn validate_dataset_name(dataset_name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(dataset_name) {
        Ok(())
    } else {
        Err(SyncError::IllegalArgument(format!(
            "invalid dataset name: \"{dataset_name}\""
        )))
    }
}

/// Validate a record key against `[a-zA-Z0-9_.:-]{1,128}`.
pub fn validate_record_key(key: &str) -> Result<()> {
    if NAME_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(SyncError::IllegalArgument(format!(
            "invalid record key: \"{key}\""
        )))
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Record
// ============================================================================

/// A single key/value entry of a dataset.
///
/// `value == None` is the tombstone: the row persists with its deleted flag
/// set until the deletion is acknowledged by the remote store. `sync_count`
/// is the server version at which the record was last written (`0` if it has
/// never been synced). `modified` is the local-dirty bit — set by every local
/// write, cleared only when that exact version is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: i64,
    /// Epoch millis, server-authored.
    pub last_modified_date: i64,
    /// Epoch millis, stamped by the writing device.
    pub device_last_modified_date: i64,
    pub last_modified_by: String,
    pub modified: bool,
}

impl Record {
    /// Whether this record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    /// Size accounting: UTF-8 byte length of key plus value. Tombstones
    /// count the key only.
    pub fn size_in_bytes(&self) -> i64 {
        (self.key.len() + self.value.as_ref().map_or(0, |v| v.len())) as i64
    }
}

// ============================================================================
// DatasetMetadata
// ============================================================================

/// Per-dataset bookkeeping, keyed by `(identity_id, dataset_name)`.
///
/// `last_sync_count` mirrors the server's dataset counter; the sentinel `-1`
/// means "deleted locally, pending remote deletion".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub dataset_name: String,
    pub creation_date: i64,
    pub last_modified_date: i64,
    pub last_modified_by: String,
    pub storage_size_bytes: i64,
    pub record_count: i64,
    pub last_sync_count: i64,
}

impl DatasetMetadata {
    /// Whether the dataset is locally deleted and waiting for the remote
    /// deletion to be confirmed.
    pub fn is_deleted(&self) -> bool {
        self.last_sync_count == -1
    }
}

// ============================================================================
// SyncConflict
// ============================================================================

/// A remote record paired with the dirty local record it collides with.
/// Surfaced through `SyncCallback::on_conflict`; the application resolves it
/// by writing the winning rows back via `Dataset::resolve`.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub remote: Record,
    pub local: Record,
}

impl SyncConflict {
    /// The record key both sides share.
    pub fn key(&self) -> &str {
        &self.remote.key
    }
}

// ============================================================================
// Tests
// ============================================================================
