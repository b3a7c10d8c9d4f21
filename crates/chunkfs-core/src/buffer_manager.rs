//! Global byte-quota arbiter for in-flight I/O buffers.
//!
//! Every replicator reserves its buffer bytes up front and holds the
//! reservation for its whole lifetime, so engine memory stays bounded.
//! Waiters are served strictly FIFO, which rules out livelock: each
//! client asks for all of its bytes once and releases on exit, so no
//! hold-and-wait cycle can form.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Byte-quota arbiter. Cheap to clone; clones share the same quota.
///
/// Quotas are tracked as semaphore permits (one permit per byte), so
/// totals must fit in `u32`.
#[derive(Clone)]
pub struct BufferManager {
    sem: Arc<Semaphore>,
    total: i64,
    max_client_quota: i64,
}

/// A granted byte reservation. Dropping it returns the bytes to the
/// pool, so release-on-terminate holds on every exit path.
pub struct BufferReservation {
    _permit: OwnedSemaphorePermit,
    bytes: i64,
}

impl BufferReservation {
    /// Number of bytes this reservation holds.
    pub fn bytes(&self) -> i64 {
        self.bytes
    }
}

impl BufferManager {
    /// Create an arbiter with `total` bytes, of which a single client
    /// may hold at most `max_client_quota`.
    pub fn new(total: i64, max_client_quota: i64) -> Self {
        let total = total.clamp(0, u32::MAX as i64);
        Self {
            sem: Arc::new(Semaphore::new(total as usize)),
            total,
            max_client_quota: max_client_quota.clamp(0, total),
        }
    }

    /// Total quota bytes.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Bytes not currently reserved.
    pub fn available(&self) -> i64 {
        self.sem.available_permits() as i64
    }

    /// Bytes currently reserved.
    pub fn in_use(&self) -> i64 {
        self.total - self.available()
    }

    /// Per-client reservation ceiling.
    pub fn max_client_quota(&self) -> i64 {
        self.max_client_quota
    }

    /// A request above the per-client ceiling can never be granted and
    /// must fail immediately rather than wait.
    pub fn is_over_quota(&self, bytes: i64) -> bool {
        bytes > self.max_client_quota
    }

    /// Reserve `bytes` without waiting, if currently available.
    pub fn try_reserve(&self, bytes: i64) -> Option<BufferReservation> {
        let n = bytes.clamp(0, self.total) as u32;
        match self.sem.clone().try_acquire_many_owned(n) {
            Ok(permit) => Some(BufferReservation {
                _permit: permit,
                bytes,
            }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => unreachable!("buffer semaphore is never closed"),
        }
    }

    /// Reserve `bytes`, waiting FIFO behind earlier requests.
    ///
    /// Cancel-safe: dropping the future releases the queue slot without
    /// consuming any bytes, which is how a waiting client's pending
    /// reservation is failed on cancellation.
    pub async fn reserve(&self, bytes: i64) -> BufferReservation {
        let n = bytes.clamp(0, self.total) as u32;
        match self.sem.clone().acquire_many_owned(n).await {
            Ok(permit) => BufferReservation {
                _permit: permit,
                bytes,
            },
            Err(_) => unreachable!("buffer semaphore is never closed"),
        }
    }
}
