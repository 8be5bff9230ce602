//! Shared test fixtures: a scriptable mock remote store, a settable
//! identity provider, and a recording sync callback.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use pocket_sync::dataset::{Dataset, SyncCallback};
use pocket_sync::error::{Result, SyncError};
use pocket_sync::identity::{IdentityBinding, IdentityProvider};
use pocket_sync::manager::SyncManager;
use pocket_sync::remote::{DatasetUpdates, RemoteStorage};
use pocket_sync::storage::SqliteLocalStore;
use pocket_sync::types::{DatasetMetadata, Record, SyncConflict};

// ============================================================================
// Builders
// ============================================================================

pub fn record(key: &str, value: Option<&str>, sync_count: i64, modified: bool) -> Record {
    Record {
        key: key.to_string(),
        value: value.map(str::to_string),
        sync_count,
        last_modified_date: 0,
        device_last_modified_date: 0,
        last_modified_by: String::new(),
        modified,
    }
}

pub fn metadata(dataset_name: &str) -> DatasetMetadata {
    DatasetMetadata {
        dataset_name: dataset_name.to_string(),
        creation_date: 0,
        last_modified_date: 0,
        last_modified_by: String::new(),
        storage_size_bytes: 0,
        record_count: 0,
        last_sync_count: 0,
    }
}

/// A pull result for a dataset that exists on the server.
pub fn updates(dataset_name: &str, records: Vec<Record>, sync_count: i64) -> DatasetUpdates {
    DatasetUpdates {
        dataset_name: dataset_name.to_string(),
        records,
        sync_count,
        sync_session_token: "session-token".to_string(),
        exists: true,
        deleted: false,
        merged_dataset_names: Vec::new(),
    }
}

/// A pull result for a dataset the server has never seen.
pub fn absent_updates(dataset_name: &str) -> DatasetUpdates {
    DatasetUpdates {
        exists: false,
        ..updates(dataset_name, Vec::new(), 0)
    }
}

// ============================================================================
// MockRemote
// ============================================================================

type ListUpdatesFn = dyn FnMut(&str, i64) -> Result<DatasetUpdates> + Send;
type PutRecordsFn = dyn FnMut(&str, &[Record], &str) -> Result<Vec<Record>> + Send;
type DeleteDatasetFn = dyn FnMut(&str) -> Result<()> + Send;

#[derive(Default)]
struct MockRemoteInner {
    list_updates_calls: Vec<(String, i64)>,
    put_records_calls: Vec<(String, Vec<Record>, String)>,
    delete_dataset_calls: Vec<String>,
    datasets: Vec<DatasetMetadata>,
    on_list_updates: Option<Box<ListUpdatesFn>>,
    on_put_records: Option<Box<PutRecordsFn>>,
    on_delete_dataset: Option<Box<DeleteDatasetFn>>,
}

/// Scriptable `RemoteStorage`. Unscripted calls answer with benign
/// defaults: an absent dataset on pull, echo-with-next-version on push,
/// and success on delete.
#[derive(Default)]
pub struct MockRemote {
    inner: Mutex<MockRemoteInner>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_list_updates(
        &self,
        f: impl FnMut(&str, i64) -> Result<DatasetUpdates> + Send + 'static,
    ) {
        self.inner.lock().on_list_updates = Some(Box::new(f));
    }

    pub fn on_put_records(
        &self,
        f: impl FnMut(&str, &[Record], &str) -> Result<Vec<Record>> + Send + 'static,
    ) {
        self.inner.lock().on_put_records = Some(Box::new(f));
    }

    pub fn on_delete_dataset(&self, f: impl FnMut(&str) -> Result<()> + Send + 'static) {
        self.inner.lock().on_delete_dataset = Some(Box::new(f));
    }

    pub fn set_datasets(&self, datasets: Vec<DatasetMetadata>) {
        self.inner.lock().datasets = datasets;
    }

    pub fn list_updates_calls(&self) -> Vec<(String, i64)> {
        self.inner.lock().list_updates_calls.clone()
    }

    pub fn put_records_calls(&self) -> Vec<(String, Vec<Record>, String)> {
        self.inner.lock().put_records_calls.clone()
    }

    pub fn delete_dataset_calls(&self) -> Vec<String> {
        self.inner.lock().delete_dataset_calls.clone()
    }
}

impl RemoteStorage for MockRemote {
    fn get_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        Ok(self.inner.lock().datasets.clone())
    }

    fn get_dataset_metadata(&self, dataset_name: &str) -> Result<DatasetMetadata> {
        self.inner
            .lock()
            .datasets
            .iter()
            .find(|d| d.dataset_name == dataset_name)
            .cloned()
            .ok_or_else(|| SyncError::DatasetNotFound(dataset_name.to_string()))
    }

    fn list_updates(&self, dataset_name: &str, last_sync_count: i64) -> Result<DatasetUpdates> {
        let mut inner = self.inner.lock();
        inner
            .list_updates_calls
            .push((dataset_name.to_string(), last_sync_count));
        match inner.on_list_updates.as_mut() {
            Some(f) => f(dataset_name, last_sync_count),
            None => Ok(absent_updates(dataset_name)),
        }
    }

    fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: &str,
    ) -> Result<Vec<Record>> {
        let mut inner = self.inner.lock();
        inner.put_records_calls.push((
            dataset_name.to_string(),
            records.to_vec(),
            sync_session_token.to_string(),
        ));
        match inner.on_put_records.as_mut() {
            Some(f) => f(dataset_name, records, sync_session_token),
            None => {
                // Default server behavior: accept the batch atomically and
                // stamp every record with the dataset's next counter.
                let next = records.iter().map(|r| r.sync_count).max().unwrap_or(0) + 1;
                Ok(records
                    .iter()
                    .map(|r| Record {
                        sync_count: next,
                        modified: false,
                        ..r.clone()
                    })
                    .collect())
            }
        }
    }

    fn delete_dataset(&self, dataset_name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.delete_dataset_calls.push(dataset_name.to_string());
        match inner.on_delete_dataset.as_mut() {
            Some(f) => f(dataset_name),
            None => Ok(()),
        }
    }
}

// ============================================================================
// TestProvider
// ============================================================================

pub struct TestProvider {
    id: Mutex<Option<String>>,
    pub cleared: AtomicUsize,
}

impl TestProvider {
    pub fn new(id: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            id: Mutex::new(id.map(str::to_string)),
            cleared: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, id: &str) {
        *self.id.lock() = Some(id.to_string());
    }
}

impl IdentityProvider for TestProvider {
    fn identity_id(&self) -> Option<String> {
        self.id.lock().clone()
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// RecordingCallback
// ============================================================================

#[derive(Clone, Debug)]
pub enum CallbackEvent {
    Success(Vec<Record>),
    Failure(String),
    Conflict(Vec<SyncConflict>),
    DatasetDeleted(String),
    DatasetsMerged(Vec<String>),
}

type ConflictHandler = dyn Fn(&Dataset, &[SyncConflict]) -> bool + Send + Sync;
type DeletedHandler = dyn Fn(&Dataset, &str) -> bool + Send + Sync;
type MergedHandler = dyn Fn(&Dataset, &[String]) -> bool + Send + Sync;

/// Records every callback invocation; the boolean-returning hooks answer
/// `false` unless a handler is installed.
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
    conflict_handler: Box<ConflictHandler>,
    deleted_handler: Box<DeletedHandler>,
    merged_handler: Box<MergedHandler>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            conflict_handler: Box::new(|_, _| false),
            deleted_handler: Box::new(|_, _| false),
            merged_handler: Box::new(|_, _| false),
        }
    }

    pub fn with_on_conflict(
        mut self,
        f: impl Fn(&Dataset, &[SyncConflict]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conflict_handler = Box::new(f);
        self
    }

    pub fn with_on_dataset_deleted(
        mut self,
        f: impl Fn(&Dataset, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.deleted_handler = Box::new(f);
        self
    }

    pub fn with_on_datasets_merged(
        mut self,
        f: impl Fn(&Dataset, &[String]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.merged_handler = Box::new(f);
        self
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    pub fn successes(&self) -> Vec<Vec<Record>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Success(records) => Some(records),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Failure(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl SyncCallback for RecordingCallback {
    fn on_success(&self, _dataset: &Dataset, updated_records: &[Record]) {
        self.events
            .lock()
            .push(CallbackEvent::Success(updated_records.to_vec()));
    }

    fn on_failure(&self, error: SyncError) {
        self.events
            .lock()
            .push(CallbackEvent::Failure(error.to_string()));
    }

    fn on_conflict(&self, dataset: &Dataset, conflicts: &[SyncConflict]) -> bool {
        self.events
            .lock()
            .push(CallbackEvent::Conflict(conflicts.to_vec()));
        (self.conflict_handler)(dataset, conflicts)
    }

    fn on_dataset_deleted(&self, dataset: &Dataset, dataset_name: &str) -> bool {
        self.events
            .lock()
            .push(CallbackEvent::DatasetDeleted(dataset_name.to_string()));
        (self.deleted_handler)(dataset, dataset_name)
    }

    fn on_datasets_merged(&self, dataset: &Dataset, dataset_names: &[String]) -> bool {
        self.events
            .lock()
            .push(CallbackEvent::DatasetsMerged(dataset_names.to_vec()));
        (self.merged_handler)(dataset, dataset_names)
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub local: Arc<SqliteLocalStore>,
    pub remote: Arc<MockRemote>,
    pub provider: Arc<TestProvider>,
    pub identity: Arc<IdentityBinding>,
    pub manager: SyncManager,
}

/// In-memory store + mock remote wired into a manager under the given
/// provider identity (`None` starts under the unknown sentinel).
pub fn fixture_with_identity(id: Option<&str>) -> Fixture {
    let local = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
    let remote = MockRemote::new();
    let provider = TestProvider::new(id);
    let identity = Arc::new(IdentityBinding::new(
        Arc::clone(&provider) as Arc<dyn IdentityProvider>
    ));
    let manager = SyncManager::new(
        Arc::clone(&local) as Arc<dyn pocket_sync::storage::LocalStorage>,
        Arc::clone(&remote) as Arc<dyn RemoteStorage>,
        Arc::clone(&identity),
    );
    Fixture {
        local,
        remote,
        provider,
        identity,
        manager,
    }
}

pub fn fixture() -> Fixture {
    fixture_with_identity(Some("device-1"))
}
