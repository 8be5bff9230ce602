//! Identity binding: resolves the current identity id from a credentials
//! provider, detects identity transitions, and notifies subscribers so the
//! local store can rekey cached data.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::UNKNOWN_IDENTITY_ID;

// ============================================================================
// IdentityProvider — user-supplied credentials layer
// ============================================================================

/// The slice of a credentials provider this engine depends on.
///
/// Implementations are expected to cache aggressively; `identity_id` is
/// called before every remote operation and on every dataset access.
pub trait IdentityProvider: Send + Sync {
    /// Current identity id, or `None` when the user has not been resolved
    /// yet (e.g. before the first sign-in round trip completes).
    fn identity_id(&self) -> Option<String>;

    /// Drop any cached identity or session credentials. Called on wipe.
    fn clear(&self) {}
}

/// Listener invoked on an identity transition with `(old, new)`. `old` is
/// `None` when no id (not even the sentinel) had been observed before.
pub type IdentityChangedListener = dyn Fn(Option<&str>, &str) + Send + Sync;

// ============================================================================
// IdentityBinding
// ============================================================================

/// Owns the identity lifecycle for one engine instance.
///
/// Every `identity_id()` call polls the provider, substitutes the sentinel
/// when nothing is known, and compares against the last observed id. A real
/// transition fires the registered listeners synchronously, while the
/// observation lock is held, so rekeying completes before any caller sees
/// the new id.
pub struct IdentityBinding {
    provider: Option<Arc<dyn IdentityProvider>>,
    current: Mutex<Option<String>>,
    listeners: Mutex<Vec<Box<IdentityChangedListener>>>,
}

impl IdentityBinding {
    /// Bind to a credentials provider.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider: Some(provider),
            current: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A binding with no provider configured. `identity_id()` always
    /// returns the sentinel.
    pub fn unbound() -> Self {
        Self {
            provider: None,
            current: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a transition listener. Listeners run on whichever thread
    /// observes the change.
    pub fn subscribe(&self, listener: Box<IdentityChangedListener>) {
        self.listeners.lock().push(listener);
    }

    /// Resolve the current identity id, firing transition listeners if the
    /// provider's answer differs from the last observation.
    ///
    /// Never returns an empty string; the sentinel stands in for "unknown".
    /// The very first observation of the sentinel is not a transition.
    pub fn identity_id(&self) -> String {
        let fresh = self
            .provider
            .as_deref()
            .and_then(|provider| provider.identity_id())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_IDENTITY_ID.to_string());

        // Lock order: current before listeners.
        let mut current = self.current.lock();
        if current.as_deref() != Some(fresh.as_str()) {
            let old = current.replace(fresh.clone());
            if !(old.is_none() && fresh == UNKNOWN_IDENTITY_ID) {
                tracing::info!(old = ?old, new = %fresh, "identity change detected");
                for listener in self.listeners.lock().iter() {
                    listener(old.as_deref(), &fresh);
                }
            }
        }
        fresh
    }

    /// Clear the provider's credential cache and forget the last observed
    /// id. The next `identity_id()` call starts from scratch.
    pub fn wipe(&self) {
        if let Some(provider) = &self.provider {
            provider.clear();
        }
        *self.current.lock() = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
