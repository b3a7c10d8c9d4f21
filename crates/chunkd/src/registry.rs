//! In-flight replication registry and cooperative cancellation.
//!
//! The metadata coordinator may resend a replication request after a
//! lost ack; two concurrent builds of the same chunk would race on the
//! same on-disk path and version. The registry enforces at most one
//! replicator per chunk id: a duplicate cancels the incumbent and
//! supplants it. Canceling the incumbent is safe because an in-progress
//! replica is never published to the live chunk table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chunkfs_proto::ChunkId;
use tokio::sync::Notify;

/// Cooperative cancellation token shared between a replicator and the
/// registry. The flag is sampled at every state transition; awaiting
/// tasks are woken through the notifier.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<CancelInner>);

#[derive(Default)]
struct CancelInner {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.canceled.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::Acquire)
    }

    /// Resolve once the token is canceled.
    pub async fn cancelled(&self) {
        loop {
            // Arm the notifier before checking the flag so a cancel
            // between the check and the await cannot be missed.
            let notified = self.0.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

/// Control handle the registry keeps for a running replicator.
#[derive(Clone)]
pub struct ReplicatorHandle {
    /// Unique per replicator instance; distinguishes a supplanted entry
    /// from the current one.
    pub instance: u64,
    pub cancel: CancelToken,
    /// Peer address or "none", for log lines about this replicator.
    pub peer_name: String,
    /// Current byte offset, advanced by the replicator as it writes.
    pub offset: Arc<AtomicI64>,
}

/// Outcome of registering a replicator.
pub enum RegisterOutcome {
    New,
    /// An incumbent for the chunk was canceled and replaced.
    Supplanted {
        prev_peer: String,
        prev_offset: i64,
        prev_canceled: bool,
    },
}

struct Inner {
    map: HashMap<ChunkId, ReplicatorHandle>,
    count: i64,
}

/// Mapping from chunk id to the currently running replicator.
pub struct InFlightRegistry {
    inner: Mutex<Inner>,
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                count: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` for `chunk_id`, canceling and supplanting any
    /// incumbent in the same critical section.
    ///
    /// After registering, the caller must re-check its own token: a
    /// cancel observed at that point means the registration itself was
    /// a pathological self-replacement (or raced a cancel-all) and the
    /// replicator must terminate with failure rather than start.
    pub fn register(&self, chunk_id: ChunkId, handle: ReplicatorHandle) -> RegisterOutcome {
        let mut inner = self.lock();
        match inner.map.insert(chunk_id, handle) {
            None => {
                inner.count += 1;
                RegisterOutcome::New
            }
            Some(prev) => {
                let prev_canceled = prev.cancel.is_canceled();
                prev.cancel.cancel();
                RegisterOutcome::Supplanted {
                    prev_peer: prev.peer_name,
                    prev_offset: prev.offset.load(Ordering::Relaxed),
                    prev_canceled,
                }
            }
        }
    }

    /// Whether `instance` is still the registered owner of `chunk_id`.
    /// A supplanted replicator must not clobber its replacement's
    /// bookkeeping, so completion callbacks check this first.
    pub fn is_current(&self, chunk_id: ChunkId, instance: u64) -> bool {
        self.lock()
            .map
            .get(&chunk_id)
            .map(|h| h.instance == instance)
            .unwrap_or(false)
    }

    /// Remove the entry if `instance` still owns it. The in-flight
    /// count is decremented only for non-canceled completions; a
    /// cancel-all already reset it.
    pub fn unregister(&self, chunk_id: ChunkId, instance: u64, canceled: bool) {
        let mut inner = self.lock();
        let owned = inner
            .map
            .get(&chunk_id)
            .map(|h| h.instance == instance)
            .unwrap_or(false);
        if owned {
            inner.map.remove(&chunk_id);
            if !canceled && inner.count > 0 {
                inner.count -= 1;
            }
        }
    }

    /// Cancel every registered replicator and reset the count.
    pub fn cancel_all(&self) {
        let handles: Vec<CancelToken> = {
            let mut inner = self.lock();
            inner.count = 0;
            inner.map.values().map(|h| h.cancel.clone()).collect()
        };
        for token in handles {
            token.cancel();
        }
    }

    /// Number of in-flight replications. Self-heals to zero when the
    /// registry is empty.
    pub fn num_replications(&self) -> i64 {
        let mut inner = self.lock();
        if inner.map.is_empty() {
            inner.count = 0;
        }
        inner.count
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }
}
