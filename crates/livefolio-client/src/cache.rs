//! Cache invalidation sink.
//!
//! The manager never owns cached data; it only names what went stale.
//! Implementations must be idempotent, since the same update can arrive
//! more than once around a reconnect.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use livefolio_core::UserId;
use parking_lot::Mutex;

/// Identifies one cached dataset.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a user's investment list: `investments:<userId>`.
    pub fn investments(user_id: UserId) -> Self {
        Self(format!("investments:{user_id}"))
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives invalidation requests.
pub trait CacheInvalidator: Send + Sync + 'static {
    /// Mark `key` stale.
    fn invalidate(&self, key: &CacheKey);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&CacheKey) + Send + Sync + 'static,
{
    fn invalidate(&self, key: &CacheKey) {
        self(key);
    }
}

/// Records invalidated keys as a set.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    keys: Mutex<BTreeSet<CacheKey>>,
    calls: AtomicUsize,
}

impl RecordingInvalidator {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct keys invalidated so far.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.keys.lock().iter().cloned().collect()
    }

    /// Whether `key` has been invalidated.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.lock().contains(key)
    }

    /// Total `invalidate` calls, duplicates included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, key: &CacheKey) {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.keys.lock().insert(key.clone());
    }
}
