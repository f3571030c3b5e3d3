//! Upload wait registry
//!
//! Readers that arrive before an asynchronous upload has completed park on a
//! `WaiterHandle`; the upload completion path wakes every handle registered for
//! that media with one `notify` call.
//!
//! All bookkeeping happens under one mutex that is never held across an await.
//! A `notify` only reaches handles registered before it took the lock, so a
//! waiter must re-read the record after `start_wait` and before blocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

type WaitKey = (String, String);

#[derive(Default)]
struct Waiters {
    next_id: u64,
    by_key: HashMap<WaitKey, HashMap<u64, oneshot::Sender<()>>>,
}

/// Registry of readers waiting on asynchronous uploads.
///
/// Cheap to clone; clones share state. Construct one per process and pass it
/// to whatever needs it.
#[derive(Clone, Default)]
pub struct UploadWaitRegistry {
    inner: Arc<Mutex<Waiters>>,
}

/// One registered waiter for a `(origin, media_id)` key.
///
/// Dropping the handle unregisters it.
pub struct WaiterHandle {
    id: u64,
    key: WaitKey,
    rx: oneshot::Receiver<()>,
    registry: UploadWaitRegistry,
}

impl WaiterHandle {
    pub fn origin(&self) -> &str {
        &self.key.0
    }

    pub fn media_id(&self) -> &str {
        &self.key.1
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}

impl UploadWaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register interest in `(origin, media_id)`. Does not block.
    pub fn start_wait(&self, origin: &str, media_id: &str) -> WaiterHandle {
        let (tx, rx) = oneshot::channel();
        let key = (origin.to_string(), media_id.to_string());

        let id = {
            let mut waiters = self.lock();
            let id = waiters.next_id;
            waiters.next_id += 1;
            waiters.by_key.entry(key.clone()).or_default().insert(id, tx);
            id
        };

        tracing::debug!(origin = %origin, media_id = %media_id, waiter_id = id, "Registered upload waiter");

        WaiterHandle {
            id,
            key,
            rx,
            registry: self.clone(),
        }
    }

    /// Block until `handle` is notified (`true`) or `timeout` elapses (`false`).
    ///
    /// The handle is unregistered on either outcome.
    pub async fn wait(&self, mut handle: WaiterHandle, timeout: Duration) -> bool {
        let notified = matches!(tokio::time::timeout(timeout, &mut handle.rx).await, Ok(Ok(())));

        tracing::debug!(
            origin = %handle.origin(),
            media_id = %handle.media_id(),
            notified,
            "Upload wait finished"
        );

        drop(handle);
        notified
    }

    /// Unregister `handle` without waiting. Safe after a notify has already
    /// removed it.
    pub fn cancel_wait(&self, handle: WaiterHandle) {
        drop(handle);
    }

    /// Wake every waiter currently registered for `(origin, media_id)`.
    ///
    /// Returns how many waiters were signalled; zero when nobody was waiting.
    pub fn notify(&self, origin: &str, media_id: &str) -> usize {
        let key = (origin.to_string(), media_id.to_string());
        let mut waiters = self.lock();

        let Some(listeners) = waiters.by_key.remove(&key) else {
            tracing::debug!(origin = %origin, media_id = %media_id, "No waiters for completed upload");
            return 0;
        };

        let count = listeners.len();
        for (_, tx) in listeners {
            // The receiver may have timed out concurrently; that is fine.
            let _ = tx.send(());
        }
        drop(waiters);

        tracing::debug!(origin = %origin, media_id = %media_id, listeners = count, "Notified upload waiters");
        count
    }

    /// Number of waiters registered for a key.
    pub fn waiting_on(&self, origin: &str, media_id: &str) -> usize {
        let key = (origin.to_string(), media_id.to_string());
        self.lock().by_key.get(&key).map_or(0, HashMap::len)
    }

    /// True when no key has any registered waiter.
    pub fn is_idle(&self) -> bool {
        self.lock().by_key.is_empty()
    }

    fn remove(&self, key: &WaitKey, id: u64) {
        let mut waiters = self.lock();
        if let Some(listeners) = waiters.by_key.get_mut(key) {
            listeners.remove(&id);
            if listeners.is_empty() {
                waiters.by_key.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn notify_wakes_every_registered_waiter() {
        let registry = UploadWaitRegistry::new();
        let handles: Vec<_> = (0..5).map(|_| registry.start_wait("example.org", "abc")).collect();
        assert_eq!(registry.waiting_on("example.org", "abc"), 5);

        let tasks: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.wait(handle, Duration::from_secs(30)).await })
            })
            .collect();

        assert_eq!(registry.notify("example.org", "abc"), 5);
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert!(registry.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn late_waiters_miss_earlier_notify() {
        let registry = UploadWaitRegistry::new();
        let early = registry.start_wait("example.org", "abc");
        registry.notify("example.org", "abc");
        let late = registry.start_wait("example.org", "abc");

        assert!(registry.wait(early, Duration::from_millis(100)).await);
        assert!(!registry.wait(late, Duration::from_millis(100)).await);
        assert!(registry.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let registry = UploadWaitRegistry::new();
        let handle = registry.start_wait("example.org", "never");

        let start = Instant::now();
        assert!(!registry.wait(handle, Duration::from_millis(200)).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
        assert!(registry.is_idle());
    }

    #[test]
    fn notify_without_waiters_is_a_no_op() {
        let registry = UploadWaitRegistry::new();
        assert_eq!(registry.notify("example.org", "nobody"), 0);
        assert!(registry.is_idle());
    }

    #[test]
    fn repeated_cycles_leave_no_entries() {
        let registry = UploadWaitRegistry::new();
        for i in 0..50 {
            let media_id = format!("m{}", i % 7);
            let a = registry.start_wait("example.org", &media_id);
            let b = registry.start_wait("example.org", &media_id);
            match i % 3 {
                0 => {
                    registry.notify("example.org", &media_id);
                    registry.cancel_wait(a);
                    registry.cancel_wait(b);
                }
                1 => {
                    registry.cancel_wait(a);
                    registry.notify("example.org", &media_id);
                    drop(b);
                }
                _ => {
                    registry.cancel_wait(b);
                    registry.cancel_wait(a);
                }
            }
        }
        assert!(registry.is_idle());
    }

    #[test]
    fn cancel_removes_only_that_handle() {
        let registry = UploadWaitRegistry::new();
        let a = registry.start_wait("example.org", "abc");
        let b = registry.start_wait("example.org", "abc");
        registry.cancel_wait(a);
        assert_eq!(registry.waiting_on("example.org", "abc"), 1);
        registry.cancel_wait(b);
        assert!(registry.is_idle());
    }
}
