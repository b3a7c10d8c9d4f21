/// Chunk layout and striping constants.

/// Fixed chunk size (64 MB). Files are split into chunks of this size;
/// the last chunk of a file may be shorter.
pub const CHUNK_SIZE: i64 = 64 << 20;

/// Finest unit at which the store writes and checksums chunk data (64 KB).
/// Every write must be a multiple of this size, except the final short
/// write at the end of a chunk.
pub const CHECKSUM_BLOCK_SIZE: i64 = 64 << 10;

/// On-disk chunk header size. Also the floor for per-chunk buffer
/// reservations.
pub const CHUNK_HEADER_SIZE: i64 = 16 << 10;

/// Granularity of network I/O buffers.
pub const IO_BUFFER_SIZE: i64 = 4 << 10;

/// Stripe sizes must be multiples of this alignment.
pub const STRIPE_ALIGNMENT: i32 = 4 << 10;

/// Minimum stripe size for Reed-Solomon striped files.
pub const MIN_STRIPE_SIZE: i32 = STRIPE_ALIGNMENT;

/// Maximum stripe size for Reed-Solomon striped files.
pub const MAX_STRIPE_SIZE: i32 = CHUNK_SIZE as i32;

/// Default replication read size: 1 MB rounded up to a checksum block
/// multiple.
pub const DEFAULT_REPLICATION_READ_SIZE: i64 =
    ((1 << 20) + CHECKSUM_BLOCK_SIZE - 1) / CHECKSUM_BLOCK_SIZE * CHECKSUM_BLOCK_SIZE;
