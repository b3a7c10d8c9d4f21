//! RS chunk recovery state machine.
//!
//! When no healthy peer holds the chunk, its data is recomputed from
//! the surviving stripes of its Reed-Solomon stripe group. Recovery
//! follows the same skeleton as direct replication but reads through a
//! [`StripeReader`] instead of a peer: the chunk size is not known up
//! front (it starts at the maximum and the true end is detected when
//! the reader returns short), reads land on stripe-friendly boundaries,
//! and a failed read may carry a report naming the corrupt stripes,
//! which is forwarded to the metadata coordinator.

use std::sync::Arc;

use chunkfs_core::double_buffer::DoubleBuffer;
use chunkfs_core::numeric::lcm;
use chunkfs_proto::constants::{
    CHECKSUM_BLOCK_SIZE, CHUNK_HEADER_SIZE, CHUNK_SIZE, IO_BUFFER_SIZE,
};
use chunkfs_proto::stripes::{decode_invalid_stripes, format_invalid_stripes};
use chunkfs_proto::ReplicateChunkOp;
use tracing::{debug, error, info, warn};

use crate::die;
use crate::engine::EngineShared;
use crate::reader::{OpenParams, StripeReadError, StripeReader};
use crate::replicator::ReplicatorCore;

/// Recovery of a single chunk from its stripe group.
pub(crate) struct RsReplicator {
    core: ReplicatorCore,
    reader: Box<dyn StripeReader>,
    read_size: i64,
}

impl RsReplicator {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        op: ReplicateChunkOp,
        reader: Box<dyn StripeReader>,
        read_size: i64,
    ) -> Self {
        debug_assert_eq!(read_size % IO_BUFFER_SIZE, 0);
        Self {
            core: ReplicatorCore::new(shared, op, "none".to_string()),
            reader,
            read_size,
        }
    }

    /// See [`DirectReplicator::register`](crate::replicator::DirectReplicator).
    pub(crate) fn register(&mut self) -> bool {
        self.core.register()
    }

    pub(crate) async fn run(mut self, registered: bool) {
        let status = if registered {
            self.drive().await
        } else {
            warn!(
                "recovery: chunk: {} canceled during registration",
                self.core.chunk_id
            );
            -1
        };
        // The reader may still be cleaning up in-flight stripe requests;
        // teardown is deferred until it reports inactive.
        if self.reader.is_active() {
            debug!(
                "recovery: chunk: {} waiting for chunk reader close",
                self.core.chunk_id
            );
        }
        self.reader.shutdown().await;
        self.core.finish(status).await;
    }

    async fn drive(&mut self) -> i32 {
        let num_stripes = self.core.op.num_stripes;
        let bytes = CHUNK_HEADER_SIZE.max(self.read_size * (num_stripes as i64 + 1));
        if !self.core.reserve_buffers(bytes).await {
            return -1;
        }
        if self.core.cancel.is_canceled() {
            return -1;
        }

        // The stripe group does not tell us the chunk size up front;
        // read to the maximum and let a short return mark the end. The
        // committed version is the one the coordinator asked for.
        self.core.chunk_size = CHUNK_SIZE;
        let params = OpenParams {
            fid: self.core.fid,
            path: self.core.op.path.clone(),
            file_size: self.core.op.file_size,
            striper_type: self.core.op.striper_type,
            stripe_size: self.core.op.stripe_size,
            num_stripes,
            num_recovery_stripes: self.core.op.num_recovery_stripes,
            skip_holes: true,
            chunk_offset: self.core.op.chunk_offset,
        };
        if let Err(e) = self.reader.open(params).await {
            info!(
                "recovery: chunk: {} open failed: error: {}",
                self.core.chunk_id, e
            );
            return e.status_code();
        }

        if self.core.alloc_local_chunk().await.is_err() {
            return -1;
        }
        info!(
            "recovery: chunk: {} starting: read size: {}",
            self.core.chunk_id, self.read_size
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
                        "recovery: chunk: {} done position: {} size: {} {}",
                        self.core.chunk_id, offset, self.core.chunk_size, self.core.op
                    );
                } else {
                    error!(
                        "recovery: chunk: {} failed position: {} size: {} {}",
                        self.core.chunk_id, offset, self.core.chunk_size, self.core.op
                    );
                }
                break;
            }

            debug_assert_eq!(offset % CHECKSUM_BLOCK_SIZE, 0);
            let read_at = offset + buffers.tail_len() as i64;
            let result = tokio::select! {
                r = self.reader.read(self.read_size as usize, read_at) => r,
                // The reader is about to be shut down; no completion
                // will arrive, so synthesize a timed-out one.
                _ = self.core.cancel.cancelled() => Err(StripeReadError::timed_out()),
            };
            let data = match result {
                Ok(d) => d,
                Err(err) => {
                    self.report_read_failure(&err);
                    return err.status;
                }
            };

            let end_of_chunk = (data.len() as i64) < self.read_size
                || offset + self.read_size >= self.core.chunk_size;
            if end_of_chunk {
                let total = buffers.flush_tail(&data);
                self.core.chunk_size = offset + total as i64;
                self.reader.close().await;
                if total == 0 {
                    continue;
                }
            } else if buffers.stage_aligned(&data) == 0 {
                // Everything fit below one checksum block; keep reading.
                continue;
            }
            if let Err(e) = self.core.write_staged(&mut buffers).await {
                return e.status_code();
            }
        }

        if !self.core.done || self.core.cancel.is_canceled() {
            return -1;
        }
        self.core.commit().await
    }

    /// Log a failed stripe read; when the failure names corrupt
    /// stripes, decode the report and attach it to the op for the
    /// metadata coordinator. A report that does not fit the stripe
    /// group indicates corruption on our side and aborts.
    fn report_read_failure(&mut self, err: &StripeReadError) {
        if err.report.is_empty() {
            info!(
                "recovery: chunk: {} read failed: error: {}",
                self.core.chunk_id, err.status
            );
            return;
        }
        let group_width =
            (self.core.op.num_stripes + self.core.op.num_recovery_stripes) as usize;
        let stripes = match decode_invalid_stripes(&err.report, group_width) {
            Ok(stripes) => stripes,
            Err(e) => die(&format!(
                "recovery: chunk: {} completion: invalid bad stripe report: {}",
                self.core.chunk_id, e
            )),
        };
        self.core.op.invalid_stripe_idx = format_invalid_stripes(&stripes);
        error!(
            "recovery: chunk: {} status: {} invalid stripes: {}",
            self.core.chunk_id, err.status, self.core.op.invalid_stripe_idx
        );
    }
}

/// Select the recovery read size.
///
/// The quota ceiling is divided across one buffer per data stripe plus
/// one for the reconstructed output, rounded down to a checksum-block
/// multiple and capped by the configured maximum. To keep reads off
/// cross-stripe boundaries the size is then aligned down to the LCM of
/// the checksum block and stripe sizes when that fits; otherwise the
/// LCM of the I/O buffer and stripe sizes is used as-is.
pub(crate) fn recovery_read_size(
    stripe_size: i32,
    num_stripes: i32,
    max_read_size: i64,
    max_client_quota: i64,
) -> i64 {
    debug_assert!(
        max_read_size >= CHECKSUM_BLOCK_SIZE
            && stripe_size > 0
            && max_read_size % CHECKSUM_BLOCK_SIZE == 0
            && CHECKSUM_BLOCK_SIZE % IO_BUFFER_SIZE == 0
    );
    let stripe_size = stripe_size as i64;
    let per_buffer = max_client_quota / (num_stripes as i64 + 1).max(1);
    let size = CHECKSUM_BLOCK_SIZE
        .max(max_read_size.min(per_buffer / CHECKSUM_BLOCK_SIZE * CHECKSUM_BLOCK_SIZE));
    if size <= stripe_size {
        debug!(
            "recovery: large stripe: {} read size: {}",
            stripe_size, size
        );
        return size;
    }
    let mut step = lcm(CHECKSUM_BLOCK_SIZE, stripe_size);
    if step > size {
        step = lcm(IO_BUFFER_SIZE, stripe_size);
        if step > size {
            warn!(
                "recovery: invalid read parameters: max read size: {} io buffer size: {} \
                 stripe size: {} set read size: {}",
                max_read_size, IO_BUFFER_SIZE, stripe_size, step
            );
            return step;
        }
    }
    size / step * step
}
