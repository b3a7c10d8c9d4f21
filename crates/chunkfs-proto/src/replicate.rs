/// Replication and recovery request carried from the metadata coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkId, ChunkVersion, FileId};
use crate::location::ServerLocation;

/// File striping scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StriperType {
    /// Plain (non-striped) file.
    None,
    /// Reed-Solomon striped file.
    Rs,
}

/// Instruction to materialize a local replica of a chunk.
///
/// A valid `location` selects direct replication from that peer. An
/// invalid location selects RS recovery; `location.port` then names the
/// metaserver port and the striping fields describe the stripe group.
///
/// The outcome fields are filled in before the op is handed back:
/// `status` is 0 on success and negative otherwise, `chunk_version` is
/// overwritten with the achieved version (`-1` on failure or cancel),
/// and `invalid_stripe_idx` lists stripes the recovery read found bad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateChunkOp {
    pub fid: FileId,
    pub chunk_id: ChunkId,
    pub chunk_version: ChunkVersion,
    pub location: ServerLocation,
    pub path: String,
    pub file_size: i64,
    pub chunk_offset: i64,
    pub striper_type: StriperType,
    pub stripe_size: i32,
    pub num_stripes: i32,
    pub num_recovery_stripes: i32,

    // Outcome, reported back to the metadata coordinator.
    pub status: i32,
    pub invalid_stripe_idx: String,
}

impl ReplicateChunkOp {
    pub fn new(fid: FileId, chunk_id: ChunkId, chunk_version: ChunkVersion) -> Self {
        Self {
            fid,
            chunk_id,
            chunk_version,
            location: ServerLocation::default(),
            path: String::new(),
            file_size: -1,
            chunk_offset: 0,
            striper_type: StriperType::None,
            stripe_size: 0,
            num_stripes: 0,
            num_recovery_stripes: 0,
            status: 0,
            invalid_stripe_idx: String::new(),
        }
    }

    /// Recovery mode is selected by the absence of a dialable source peer.
    pub fn is_recovery(&self) -> bool {
        !self.location.is_valid()
    }
}

impl fmt::Display for ReplicateChunkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replicate: fid: {} chunk: {} version: {} location: {}",
            self.fid, self.chunk_id, self.chunk_version, self.location
        )?;
        if self.is_recovery() {
            write!(
                f,
                " striper: {:?} stripes: {}+{} stripe size: {} offset: {} file size: {}",
                self.striper_type,
                self.num_stripes,
                self.num_recovery_stripes,
                self.stripe_size,
                self.chunk_offset,
                self.file_size
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        let mut op = ReplicateChunkOp::new(1, ChunkId::new(7), 3);
        assert!(op.is_recovery());
        op.location = ServerLocation::new("peer-a", 20000);
        assert!(!op.is_recovery());
        // A bare port (metaserver port in recovery mode) is not dialable.
        op.location = ServerLocation::new("", 20000);
        assert!(op.is_recovery());
    }
}
