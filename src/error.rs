use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Failures of the durable layers: the local database, or a remote failure
/// the service could not classify any further.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

// ---------------------------------------------------------------------------
// SyncError — the crate-wide error taxonomy
// ---------------------------------------------------------------------------

/// Every error the engine surfaces. The kinds are disjoint: an error is
/// classified exactly once, at the layer that observes it.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport or I/O failure while talking to the remote store.
    /// Transient; the caller may retry the whole operation.
    #[error("network failure: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote store has no dataset with the requested name.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// A record push was rejected because the server advanced past the
    /// caller's sync session token. Recovered internally by the sync
    /// state machine.
    #[error("data conflict: {0}")]
    DataConflict(String),

    /// A per-user or per-dataset quota was exceeded on the remote store.
    #[error("data limit exceeded: {0}")]
    DataLimitExceeded(String),

    /// Local database failure, or an unclassified remote failure.
    #[error("storage failure")]
    Storage(#[from] StorageError),

    /// Invalid dataset name or record key. Raised before any I/O.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The requested operation is not valid in the store's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A control callback returned `false` during a sync session.
    #[error("sync cancelled by callback")]
    ManualCancel,
}

impl SyncError {
    /// Build a `Network` error with an optional underlying cause.
    pub fn network(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        SyncError::Network {
            message: message.into(),
            source,
        }
    }
}

/// Convenience alias — the default error type is `SyncError`.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
