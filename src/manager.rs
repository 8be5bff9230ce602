//! `SyncManager` — owns one local/remote storage pair, keeps local data
//! keyed to the current identity, and hands out dataset handles.

use std::sync::Arc;

use crate::dataset::Dataset;
use crate::error::{Result, SyncError};
use crate::identity::IdentityBinding;
use crate::remote::RemoteStorage;
use crate::storage::LocalStorage;
use crate::types::{validate_dataset_name, DatasetMetadata, UNKNOWN_IDENTITY_ID};

pub struct SyncManager {
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<IdentityBinding>,
}

impl SyncManager {
    /// Wire a manager to its stores. Subscribes to identity transitions so
    /// rows written under the old id (or the unknown sentinel) are rekeyed
    /// before the new id is used.
    pub fn new(
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<IdentityBinding>,
    ) -> Self {
        let rekey_target = Arc::clone(&local);
        identity.subscribe(Box::new(move |old, new| {
            let old = old.unwrap_or(UNKNOWN_IDENTITY_ID);
            if let Err(err) = rekey_target.change_identity_id(old, new) {
                tracing::error!(%old, %new, error = %err, "failed to rekey local data");
            }
        }));

        Self {
            local,
            remote,
            identity,
        }
    }

    /// Open a dataset, creating an empty one on first use.
    ///
    /// Fails with `IllegalState` when the dataset is deleted locally but
    /// the deletion has not been reconciled with the remote store yet;
    /// call `refresh_dataset_metadata` (or sync the dataset) first.
    pub fn open_or_create_dataset(&self, dataset_name: &str) -> Result<Dataset> {
        validate_dataset_name(dataset_name)?;
        let identity_id = self.identity.identity_id();

        if let Some(metadata) = self.local.get_dataset_metadata(&identity_id, dataset_name)? {
            if metadata.is_deleted() {
                return Err(SyncError::IllegalState(format!(
                    "dataset \"{dataset_name}\" is deleted locally and not yet \
                     reconciled with the remote store"
                )));
            }
        }

        self.local.create_dataset(&identity_id, dataset_name)?;
        Ok(Dataset::new(
            dataset_name,
            Arc::clone(&self.local),
            Arc::clone(&self.remote),
            Arc::clone(&self.identity),
        ))
    }

    /// Locally cached dataset metadata. May lag the remote store until
    /// `refresh_dataset_metadata` runs.
    pub fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        self.local.get_datasets(&self.identity.identity_id())
    }

    /// Pull the remote metadata listing into the local cache. Record
    /// contents are not touched.
    pub fn refresh_dataset_metadata(&self) -> Result<()> {
        let datasets = self.remote.get_datasets()?;
        self.local
            .update_dataset_metadata(&self.identity.identity_id(), &datasets)
    }

    /// Wipe everything cached locally: credentials first, then every
    /// dataset and record of every identity. Unsynced data is lost.
    pub fn wipe_data(&self) -> Result<()> {
        self.identity.wipe();
        self.local.wipe_data()
    }
}
