use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

struct Entry {
    peer: SocketAddr,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct Inner {
    active: Mutex<HashMap<u64, Entry>>,
    idle: Notify,
    next_id: AtomicU64,
}

/// The set of live connections of one server run.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection. It stays in the set until the guard is dropped.
    pub fn register(&self, peer: SocketAddr) -> ConnectionGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.active().insert(id, Entry { peer, abort: None });
        ConnectionGuard {
            id,
            tracker: self.clone(),
        }
    }

    /// Records the task serving a connection so it can be aborted.
    pub fn attach(&self, id: u64, abort: AbortHandle) {
        if let Some(entry) = self.active().get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every connection has finished or the timeout elapses.
    /// Returns whether the set drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    /// Aborts every connection task still running. Returns how many.
    pub fn abort_all(&self) -> usize {
        // Abort outside the lock; a cancelled task drops its guard, which
        // locks the set again.
        let handles: Vec<_> = self
            .active()
            .iter()
            .map(|(id, entry)| {
                tracing::debug!(id, peer = %entry.peer, "aborting connection");
                entry.abort.clone()
            })
            .collect();
        for abort in handles.iter().flatten() {
            abort.abort();
        }
        handles.len()
    }

    fn remove(&self, id: u64) {
        let empty = {
            let mut active = self.active();
            active.remove(&id);
            active.is_empty()
        };
        if empty {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Removes its connection from the tracker when dropped, including when
/// the connection task is aborted or panics.
pub struct ConnectionGuard {
    id: u64,
    tracker: ConnectionTracker,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[tokio::test]
    async fn drains_when_guards_drop() {
        let tracker = ConnectionTracker::new();
        let a = tracker.register(peer());
        let b = tracker.register(peer());
        assert_eq!(tracker.len(), 2);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(a);
            drop(b);
        });

        assert!(tracker.wait_idle(Duration::from_secs(2)).await);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn wait_idle_times_out() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.register(peer());

        assert!(!tracker.wait_idle(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn abort_all_stops_tasks() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.register(peer());
        let id = guard.id();
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tracker.attach(id, task.abort_handle());

        assert_eq!(tracker.abort_all(), 1);
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }
}
