//! Direct chunk replication state machine.
//!
//! Replication runs in three steps: learn the chunk size and version
//! from the source peer, loop reading from the peer and writing to the
//! local store, then commit the version and notify the metadata
//! coordinator of the outcome. The chunk being built stays out of the
//! live chunk table the whole time; only the final version commit makes
//! it visible.
//!
//! [`ReplicatorCore`] carries the state and steps shared with RS
//! recovery (registration, buffer quota, local allocation, aligned
//! writes, version commit, completion reporting); this module's
//! [`DirectReplicator`] adds the peer-driven read loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chunkfs_core::double_buffer::DoubleBuffer;
use chunkfs_core::buffer_manager::BufferReservation;
use chunkfs_proto::constants::{
    CHECKSUM_BLOCK_SIZE, CHUNK_HEADER_SIZE, CHUNK_SIZE, DEFAULT_REPLICATION_READ_SIZE,
};
use chunkfs_proto::{ChunkError, ChunkId, ChunkResult, ChunkVersion, FileId, ReplicateChunkOp};
use tracing::{error, info, warn};

use crate::die;
use crate::engine::EngineShared;
use crate::peer::PeerClient;
use crate::registry::{CancelToken, RegisterOutcome, ReplicatorHandle};

/// State and steps shared by the direct and RS recovery replicators.
pub(crate) struct ReplicatorCore {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) op: ReplicateChunkOp,
    pub(crate) fid: FileId,
    pub(crate) chunk_id: ChunkId,
    /// Target version: refined from peer metadata in direct mode, the
    /// request's version in recovery mode.
    pub(crate) chunk_version: ChunkVersion,
    /// Learned chunk size; the read/write loop runs until `offset`
    /// reaches it.
    pub(crate) chunk_size: i64,
    offset: Arc<AtomicI64>,
    pub(crate) cancel: CancelToken,
    pub(crate) instance: u64,
    pub(crate) peer_name: String,
    pub(crate) done: bool,
    /// Set when a cancel observed at registration must be reported as a
    /// plain failure (re-issued request replacing itself).
    pub(crate) force_fail: bool,
    reservation: Option<BufferReservation>,
}

impl ReplicatorCore {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        op: ReplicateChunkOp,
        peer_name: String,
    ) -> Self {
        shared.counters.replicator_started();
        let instance = shared.next_instance.fetch_add(1, Ordering::Relaxed);
        Self {
            fid: op.fid,
            chunk_id: op.chunk_id,
            chunk_version: op.chunk_version,
            chunk_size: 0,
            offset: Arc::new(AtomicI64::new(0)),
            cancel: CancelToken::new(),
            instance,
            peer_name,
            done: false,
            force_fail: false,
            reservation: None,
            op,
            shared,
        }
    }

    pub(crate) fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    fn advance(&self, n: i64) {
        self.offset.fetch_add(n, Ordering::Relaxed);
    }

    /// Register in the in-flight table, canceling and supplanting any
    /// incumbent. Returns false when this replicator's own token was
    /// canceled in the process; the caller must then fail instead of
    /// starting.
    pub(crate) fn register(&mut self) -> bool {
        let handle = ReplicatorHandle {
            instance: self.instance,
            cancel: self.cancel.clone(),
            peer_name: self.peer_name.clone(),
            offset: self.offset.clone(),
        };
        if let RegisterOutcome::Supplanted {
            prev_peer,
            prev_offset,
            prev_canceled,
        } = self.shared.registry.register(self.chunk_id, handle)
        {
            info!(
                "replication: chunk: {} peer: {} offset: {} canceling:{} restarting from peer: {}",
                self.chunk_id,
                prev_peer,
                prev_offset,
                if prev_canceled { " already canceled?" } else { "" },
                self.peer_name
            );
        }
        if self.cancel.is_canceled() {
            self.force_fail = true;
            return false;
        }
        true
    }

    /// Reserve the buffer bytes this replication needs for its whole
    /// lifetime. A request above the per-client ceiling fails
    /// immediately; otherwise the replicator waits FIFO, racing the
    /// wait against cancellation.
    pub(crate) async fn reserve_buffers(&mut self, bytes: i64) -> bool {
        let buffers = &self.shared.buffers;
        if buffers.is_over_quota(bytes) {
            error!(
                "replication: chunk: {} peer: {} bytes: {} over quota: {}",
                self.chunk_id,
                self.peer_name,
                bytes,
                buffers.max_client_quota()
            );
            return false;
        }
        if let Some(reservation) = buffers.try_reserve(bytes) {
            self.reservation = Some(reservation);
            return true;
        }
        info!(
            "replication: chunk: {} peer: {} denied: {} waiting for buffers",
            self.chunk_id, self.peer_name, bytes
        );
        tokio::select! {
            reservation = buffers.reserve(bytes) => {
                info!(
                    "replication: chunk: {} peer: {} granted: {}",
                    self.chunk_id, self.peer_name, bytes
                );
                self.reservation = Some(reservation);
                true
            }
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Make room for the new replica: any previous copy is implicitly
    /// stale, and the chunk is allocated at version 0 so an interrupted
    /// replication is purged on restart.
    pub(crate) async fn alloc_local_chunk(&self) -> ChunkResult<()> {
        self.shared.store.stale_chunk(self.chunk_id, true).await;
        self.shared
            .store
            .alloc_chunk(self.fid, self.chunk_id, 0, true)
            .await
    }

    async fn write_block(&mut self, data: &[u8]) -> ChunkResult<()> {
        let n = self
            .shared
            .store
            .write_chunk(self.chunk_id, self.offset(), data, true)
            .await
            .map_err(|e| {
                error!(
                    "replication: chunk: {} peer: {} write failed: error: {}",
                    self.chunk_id, self.peer_name, e
                );
                e
            })?;
        self.advance(n as i64);
        Ok(())
    }

    /// Write the staged buffer. A sub-block remainder is split into a
    /// second short write, which is only legal at the end of the chunk;
    /// excess bytes anywhere else mean the transfer is corrupt.
    pub(crate) async fn write_staged(&mut self, buffers: &mut DoubleBuffer) -> ChunkResult<()> {
        let tail = buffers.split_at_checksum_boundary();
        if tail > 0 {
            let end = self.offset() + (buffers.write_len() + tail) as i64;
            if end != self.chunk_size {
                die(&format!(
                    "replication: chunk: {} unaligned write before end of chunk: \
                     position: {} size: {}",
                    self.chunk_id, end, self.chunk_size
                ));
            }
        }
        self.write_block(buffers.write_slice()).await?;
        if tail > 0 {
            buffers.move_tail_back();
            buffers.swap();
            self.write_block(buffers.write_slice()).await?;
        }
        Ok(())
    }

    /// Durably commit the replica at the learned version, making it
    /// stable and visible to readers.
    pub(crate) async fn commit(&mut self) -> i32 {
        info!(
            "replication: chunk: {} peer: {} finished",
            self.chunk_id, self.peer_name
        );
        match self
            .shared
            .store
            .change_chunk_vers(self.chunk_id, self.chunk_version, true)
            .await
        {
            Ok(()) => 0,
            Err(e) => e.status_code(),
        }
    }

    /// Terminal step: record the outcome on the op, notify the chunk
    /// store (only while still the registered owner of the chunk id),
    /// bump the counter bucket, release the buffer reservation, and
    /// hand the op back to the request source. Exactly one response is
    /// submitted per accepted request.
    pub(crate) async fn finish(mut self, status: i32) {
        let canceled = !self.force_fail && self.cancel.is_canceled();
        self.op.status = if status >= 0 { 0 } else { -1 };

        if self.op.status < 0 {
            error!(
                "replication: chunk: {} peer: {} {}: status: {} {}",
                self.chunk_id,
                self.peer_name,
                if canceled { "canceled" } else { "failed" },
                status,
                self.op
            );
        } else {
            let size = self
                .shared
                .store
                .get_chunk_info(self.chunk_id)
                .await
                .map(|info| info.size)
                .unwrap_or(-1);
            info!("{} chunk size: {}", self.op, size);
        }

        let notify = !canceled || self.shared.registry.is_current(self.chunk_id, self.instance);
        if notify {
            self.shared.store.replication_done(self.chunk_id, status).await;
        }

        self.op.chunk_version = if !canceled && status >= 0 {
            self.chunk_version
        } else {
            -1
        };
        if self.op.status < 0 || canceled {
            self.shared
                .counters
                .count_terminal(self.op.location.is_valid(), canceled);
        }

        self.shared
            .registry
            .unregister(self.chunk_id, self.instance, canceled);
        self.reservation.take();
        self.shared.counters.replicator_finished();
        let _ = self.shared.responses.send(self.op);
    }
}

/// Peer-to-peer replication of a single chunk.
pub(crate) struct DirectReplicator {
    core: ReplicatorCore,
    peer: Arc<dyn PeerClient>,
}

impl DirectReplicator {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        op: ReplicateChunkOp,
        peer: Arc<dyn PeerClient>,
    ) -> Self {
        let peer_name = peer.location().to_string();
        Self {
            core: ReplicatorCore::new(shared, op, peer_name),
            peer,
        }
    }

    /// Register in the in-flight table. Called by the dispatcher before
    /// the replicator task is spawned, so duplicate suppression is
    /// ordered with request arrival.
    pub(crate) fn register(&mut self) -> bool {
        self.core.register()
    }

    pub(crate) async fn run(mut self, registered: bool) {
        let status = if registered {
            self.drive().await
        } else {
            warn!(
                "replication: chunk: {} peer: {} canceled during registration",
                self.core.chunk_id, self.core.peer_name
            );
            -1
        };
        self.core.finish(status).await;
    }

    async fn drive(&mut self) -> i32 {
        let bytes = CHUNK_HEADER_SIZE.max(DEFAULT_REPLICATION_READ_SIZE);
        if !self.core.reserve_buffers(bytes).await {
            return -1;
        }
        if self.core.cancel.is_canceled() {
            return -1;
        }

        // Learn the authoritative size and version from the peer.
        let meta = tokio::select! {
            m = self.peer.get_chunk_metadata(self.core.chunk_id) => m,
            _ = self.core.cancel.cancelled() => return -1,
        };
        let meta = match meta {
            Ok(m) => m,
            Err(e) => {
                info!(
                    "replication: chunk: {} peer: {} metadata failed: error: {}",
                    self.core.chunk_id, self.core.peer_name, e
                );
                return e.status_code();
            }
        };
        if meta.chunk_size < 0 || meta.chunk_size > CHUNK_SIZE {
            info!(
                "replication: invalid chunk size: {}",
                meta.chunk_size
            );
            return ChunkError::SizeOutOfRange.status_code();
        }
        self.core.chunk_size = meta.chunk_size;
        self.core.chunk_version = meta.chunk_version;

        if self.core.alloc_local_chunk().await.is_err() {
            return -1;
        }
        info!(
            "replication: chunk: {} peer: {} starting: size: {}",
            self.core.chunk_id, self.core.peer_name, self.core.chunk_size
        );

        let mut buffers = DoubleBuffer::new();
        loop {
            if self.core.cancel.is_canceled() {
                return -1;
            }
            let offset = self.core.offset();
            if offset >= self.core.chunk_size {
                self.core.done = offset == self.core.chunk_size;
                if self.core.done {
                    info!(
                        "replication: chunk: {} peer: {} done position: {} size: {} {}",
                        self.core.chunk_id,
                        self.core.peer_name,
                        offset,
                        self.core.chunk_size,
                        self.core.op
                    );
                } else {
                    error!(
                        "replication: chunk: {} peer: {} failed position: {} size: {} {}",
                        self.core.chunk_id,
                        self.core.peer_name,
                        offset,
                        self.core.chunk_size,
                        self.core.op
                    );
                }
                break;
            }

            debug_assert_eq!(offset % CHECKSUM_BLOCK_SIZE, 0);
            let num_bytes = (self.core.chunk_size - offset).min(DEFAULT_REPLICATION_READ_SIZE);
            let read = tokio::select! {
                r = self.peer.read(
                    self.core.chunk_id,
                    self.core.chunk_version,
                    offset,
                    num_bytes as usize,
                ) => r,
                _ = self.core.cancel.cancelled() => return -1,
            };
            let data = match read {
                Ok(d) => d,
                Err(e) => {
                    info!(
                        "replication: chunk: {} peer: {} read failed: error: {}",
                        self.core.chunk_id, self.core.peer_name, e
                    );
                    return e.status_code();
                }
            };
            let num_read = data.len() as i64;
            if num_read < num_bytes && offset + num_read < self.core.chunk_size {
                error!(
                    "replication: chunk: {} peer: {} short read: got: {} expected: {}",
                    self.core.chunk_id, self.core.peer_name, num_read, num_bytes
                );
                return ChunkError::ShortRead.status_code();
            }

            buffers.fill_read(data);
            buffers.swap();
            if let Err(e) = self.core.write_staged(&mut buffers).await {
                return e.status_code();
            }
        }

        if !self.core.done || self.core.cancel.is_canceled() {
            return -1;
        }
        self.core.commit().await
    }
}
