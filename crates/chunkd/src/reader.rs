//! Striped-file reader contract.
//!
//! RS recovery reads logical chunk bytes through a reader that fetches
//! the surviving stripes of the stripe group and recomputes missing
//! data. Stripe location lookups go through the shared metaserver
//! client; the Reed-Solomon decode itself lives behind this trait.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chunkfs_proto::{ChunkError, ChunkResult, FileId, SeqNum, StriperType};

use crate::config::ReaderConfig;
use crate::meta::MetaClient;

/// Parameters opening a reader over one chunk of a striped file.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub fid: FileId,
    pub path: String,
    pub file_size: i64,
    pub striper_type: StriperType,
    pub stripe_size: i32,
    pub num_stripes: i32,
    pub num_recovery_stripes: i32,
    /// Treat missing stripes of a sparse file as holes rather than
    /// errors.
    pub skip_holes: bool,
    /// Byte offset of the chunk being recovered within the file. Reads
    /// are issued chunk-relative; the reader resolves them against this
    /// base.
    pub chunk_offset: i64,
}

/// A failed stripe read: the negative status, plus the packed
/// invalid-stripe report when the failure identified corrupt stripes
/// (see [`chunkfs_proto::stripes`] for the record format).
#[derive(Debug, Clone)]
pub struct StripeReadError {
    pub status: i32,
    pub report: Vec<u8>,
}

impl StripeReadError {
    pub fn new(status: i32) -> Self {
        Self {
            status,
            report: Vec::new(),
        }
    }

    /// Synthesized completion for a read whose callback will never
    /// arrive (reader shut down under a canceled replicator).
    pub fn timed_out() -> Self {
        Self::new(ChunkError::TimedOut.status_code())
    }
}

impl fmt::Display for StripeReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stripe read failed: status: {}", self.status)?;
        if !self.report.is_empty() {
            write!(f, " ({} report bytes)", self.report.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for StripeReadError {}

/// Streaming reader over one chunk of an RS striped file.
#[async_trait]
pub trait StripeReader: Send {
    /// Open the reader. Must be called before `read`.
    async fn open(&mut self, params: OpenParams) -> ChunkResult<()>;

    /// Read up to `num_bytes` of logical chunk data at the
    /// chunk-relative `offset`. A return shorter than requested marks
    /// the end of the chunk.
    async fn read(&mut self, num_bytes: usize, offset: i64) -> Result<Vec<u8>, StripeReadError>;

    /// Initiate close. Cleanup of in-flight stripe requests may
    /// continue afterwards; see `is_active`.
    async fn close(&mut self);

    /// Whether in-flight cleanup is still pending after `close`.
    fn is_active(&self) -> bool;

    /// Tear down completely, waiting for the reader to go inactive.
    /// Must be called before the reader is dropped.
    async fn shutdown(&mut self);
}

/// Metaserver session handed to each recovery reader: the shared client,
/// a per-replicator initial sequence number, and the reader's tuning.
#[derive(Clone)]
pub struct MetaSession {
    pub client: Arc<dyn MetaClient>,
    pub initial_seq: SeqNum,
    pub log_prefix: String,
    pub config: ReaderConfig,
}

/// Builds a reader per recovery, bound to a metaserver session.
pub trait StripeReaderFactory: Send + Sync {
    fn create(&self, session: MetaSession) -> Box<dyn StripeReader>;
}
