//! Local chunk storage contract.
//!
//! The engine drives the store through this trait; the store owns the
//! on-disk chunk format, per-chunk version bookkeeping, and write
//! serialization for its own files.

use async_trait::async_trait;
use chunkfs_proto::{ChunkId, ChunkResult, ChunkVersion, FileId};

/// Version and size of a stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub chunk_id: ChunkId,
    pub version: ChunkVersion,
    pub size: i64,
}

/// Persistent local chunk storage with version bookkeeping.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create a local chunk file at `version`.
    ///
    /// Replication allocates at version 0 with `replication_in_progress`
    /// set: the chunk stays out of the live chunk table until its
    /// version is committed, and a version-0 leftover is purged on node
    /// restart.
    async fn alloc_chunk(
        &self,
        fid: FileId,
        chunk_id: ChunkId,
        version: ChunkVersion,
        replication_in_progress: bool,
    ) -> ChunkResult<()>;

    /// Mark any existing copy of the chunk stale; with `delete_ok` the
    /// stale copy is deleted rather than parked.
    async fn stale_chunk(&self, chunk_id: ChunkId, delete_ok: bool);

    /// Write `data` at `offset`. The length must be a multiple of the
    /// checksum block size, except the final short write at the end of
    /// the chunk. Returns the byte count actually written.
    async fn write_chunk(
        &self,
        chunk_id: ChunkId,
        offset: i64,
        data: &[u8],
        from_replication: bool,
    ) -> ChunkResult<usize>;

    /// Durably commit the chunk at `version`; with `stable` the chunk
    /// becomes visible to readers. Returns only once durable.
    async fn change_chunk_vers(
        &self,
        chunk_id: ChunkId,
        version: ChunkVersion,
        stable: bool,
    ) -> ChunkResult<()>;

    /// Replication bookkeeping callback: the chunk is no longer being
    /// replicated, with the final (0 or negative) status.
    async fn replication_done(&self, chunk_id: ChunkId, status: i32);

    /// Look up a stored chunk.
    async fn get_chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo>;
}
