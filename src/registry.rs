//! Per-client registry of in-flight requests.
//!
//! Every attempt registers a [`CancellationHandle`] under its request key.
//! Registering over an existing entry may abort the earlier holder, which is
//! how duplicate requests are cancelled. The returned [`Registration`] removes
//! the entry again when dropped, but only while the entry still belongs to it,
//! so a superseded attempt never unregisters its successor.
//!
//! Each [`Client`](crate::Client) owns its own registry; clients never cancel
//! each other's requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio_util::sync::CancellationToken;

/// An abortable token for one in-flight attempt.
///
/// # Examples
///
/// ```
/// use callkit::registry::CancellationHandle;
///
/// let handle = CancellationHandle::new();
/// assert!(!handle.is_aborted());
///
/// handle.abort("superseded");
/// handle.abort("ignored, the first reason sticks");
/// assert!(handle.is_aborted());
/// assert_eq!(handle.reason(), Some("superseded"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancellationHandle {
    /// Creates a handle that has not been aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the attempt. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    /// Returns `true` once [`abort`](Self::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the abort reason, if aborted.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Completes when the handle is aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
struct Entry {
    id: u64,
    handle: CancellationHandle,
}

/// Maps request keys to the handle of the attempt currently holding them.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh handle under `key`, overwriting any existing entry.
    ///
    /// When `abort_previous` carries a reason and `key` is already held, the
    /// previous holder is aborted with that reason first. Lookup, abort and
    /// overwrite happen under one lock.
    pub fn register(
        self: &Arc<Self>,
        key: impl Into<String>,
        abort_previous: Option<String>,
    ) -> Registration {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = CancellationHandle::new();

        let mut entries = self.lock();
        if let (Some(previous), Some(reason)) = (entries.get(&key), abort_previous) {
            tracing::debug!(key = %key, "Aborting in-flight duplicate request");
            previous.handle.abort(reason);
        }
        entries.insert(
            key.clone(),
            Entry {
                id,
                handle: handle.clone(),
            },
        );
        drop(entries);

        Registration {
            registry: Arc::clone(self),
            key,
            id,
            handle,
        }
    }

    /// Returns `true` if an attempt currently holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Returns the number of registered keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no key is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// An attempt's hold on a registry key, released on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    key: String,
    id: u64,
    handle: CancellationHandle,
}

impl Registration {
    /// The handle registered for this attempt.
    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    /// The request key this attempt holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_aborts_previous_holder() {
        let registry = Arc::new(CancellationRegistry::new());

        let first = registry.register("k", Some("duplicate".to_string()));
        let second = registry.register("k", Some("duplicate".to_string()));

        assert!(first.handle().is_aborted());
        assert_eq!(first.handle().reason(), Some("duplicate"));
        assert!(!second.handle().is_aborted());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_without_reason_previous_keeps_running() {
        let registry = Arc::new(CancellationRegistry::new());

        let first = registry.register("k", None);
        let _second = registry.register("k", None);

        assert!(!first.handle().is_aborted());
    }

    #[test]
    fn test_superseded_drop_keeps_successor_registered() {
        let registry = Arc::new(CancellationRegistry::new());

        let first = registry.register("k", Some("dup".to_string()));
        let second = registry.register("k", Some("dup".to_string()));

        drop(first);
        assert!(registry.contains("k"));

        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_independent_keys_do_not_interact() {
        let registry = Arc::new(CancellationRegistry::new());

        let a = registry.register("a", Some("dup".to_string()));
        let b = registry.register("b", Some("dup".to_string()));

        assert!(!a.handle().is_aborted());
        assert!(!b.handle().is_aborted());
        assert_eq!(registry.len(), 2);
        assert_eq!(a.key(), "a");
    }

    #[tokio::test]
    async fn test_aborted_future_completes() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.aborted().await });
        handle.abort("stop");

        task.await.unwrap();
    }
}
