/// Unified error type for storage node operations.
///
/// The metadata coordinator protocol carries errors as negative status
/// codes; `status_code` maps each variant onto that wire representation.

use serde::{Deserialize, Serialize};

/// Errors surfaced by chunk storage, replication, and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid parameters")]
    InvalidParms,
    #[error("I/O error")]
    Eio,
    #[error("operation timed out")]
    TimedOut,
    #[error("no such chunk")]
    NoChunk,
    #[error("chunk exists already")]
    ChunkExists,
    #[error("no space available")]
    NoSpace,
    #[error("no peer available")]
    NoPeer,
    #[error("short read from peer")]
    ShortRead,
    #[error("chunk size out of range")]
    SizeOutOfRange,
    #[error("buffer quota exceeded")]
    QuotaExceeded,
    #[error("operation canceled")]
    Canceled,
    #[error("malformed invalid-stripe report")]
    BadStripeReport,
    #[error("network error")]
    NetworkError,
}

impl ChunkError {
    /// Negative status code reported to the metadata coordinator.
    pub fn status_code(self) -> i32 {
        match self {
            Self::InvalidParms | Self::ShortRead | Self::BadStripeReport => -22, // -EINVAL
            Self::Eio | Self::NetworkError => -5,                                // -EIO
            Self::TimedOut => -110,                                              // -ETIMEDOUT
            Self::NoChunk => -2,                                                 // -ENOENT
            Self::ChunkExists => -17,                                            // -EEXIST
            Self::NoSpace => -28,                                                // -ENOSPC
            Self::NoPeer | Self::SizeOutOfRange | Self::QuotaExceeded | Self::Canceled => -1,
        }
    }
}

/// Result type alias for storage node operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

impl From<std::io::Error> for ChunkError {
    fn from(_: std::io::Error) -> Self {
        ChunkError::Eio
    }
}
