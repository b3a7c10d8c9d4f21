/// Chunk and file identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// File identifier assigned by the metadata coordinator.
pub type FileId = i64;

/// Chunk version number. `-1` marks a failed or canceled replication
/// outcome; version 0 marks a chunk that is still being built.
pub type ChunkVersion = i64;

/// Client sequence number for metaserver sessions.
pub type SeqNum = i64;

/// A 64-bit chunk identifier, globally unique within a file system.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub i64);

impl ChunkId {
    /// Create a new ChunkId from a raw i64.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw i64 value.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({})", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChunkId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<ChunkId> for i64 {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_round_trip() {
        let id = ChunkId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(ChunkId::from(42), id);
    }

    #[test]
    fn test_chunk_id_display() {
        assert_eq!(ChunkId::new(7).to_string(), "7");
        assert_eq!(format!("{:?}", ChunkId::new(7)), "Chunk(7)");
    }
}
