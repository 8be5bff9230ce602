//! Offline-first key/value dataset synchronization.
//!
//! A local SQLite cache stays fully usable offline; `Dataset::synchronize`
//! reconciles it against a remote authoritative store with an optimistic
//! protocol keyed by per-record sync counters.

pub mod error;
pub mod types;

pub mod dataset;
pub mod identity;
pub mod manager;
pub mod remote;
pub mod storage;
