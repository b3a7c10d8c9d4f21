//! # chunkfs-proto
//!
//! Protocol types, constants, and data structures for the chunkfs
//! distributed file system.
//!
//! This crate defines the identifiers, size constants, error types, and
//! request structures shared by the storage node, the metadata
//! coordinator protocol glue, and the client library.

pub mod chunk;
pub mod constants;
pub mod error;
pub mod location;
pub mod replicate;
pub mod stripes;

// Re-export commonly used types at the crate root
pub use chunk::{ChunkId, ChunkVersion, FileId, SeqNum};
pub use error::{ChunkError, ChunkResult};
pub use location::ServerLocation;
pub use replicate::{ReplicateChunkOp, StriperType};
