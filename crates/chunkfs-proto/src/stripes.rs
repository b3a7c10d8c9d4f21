/// Invalid-stripe report wire format.
///
/// When a recovery read fails because source stripes are corrupt, the
/// stripe reader attaches a report identifying them. The report is a
/// packed sequence of records, each three little-endian i64 values:
/// `(stripe_index, chunk_id, chunk_version)`. The explicit fixed-width
/// encoding keeps the format independent of host word size and byte
/// order.

use crate::chunk::{ChunkId, ChunkVersion};
use crate::error::{ChunkError, ChunkResult};

/// Bytes per encoded record.
pub const INVALID_STRIPE_RECORD_SIZE: usize = 24;

/// One bad stripe identified by a recovery read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStripe {
    pub stripe_idx: i64,
    pub chunk_id: ChunkId,
    pub chunk_version: ChunkVersion,
}

/// Encode a report as packed little-endian records.
pub fn encode_invalid_stripes(stripes: &[InvalidStripe]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(stripes.len() * INVALID_STRIPE_RECORD_SIZE);
    for s in stripes {
        buf.extend_from_slice(&s.stripe_idx.to_le_bytes());
        buf.extend_from_slice(&s.chunk_id.raw().to_le_bytes());
        buf.extend_from_slice(&s.chunk_version.to_le_bytes());
    }
    buf
}

/// Decode a report.
///
/// `max_stripes` is the stripe group width (data + recovery stripes);
/// a report with more records than that, a stripe index outside
/// `[0, max_stripes)`, or a trailing partial record is malformed.
pub fn decode_invalid_stripes(buf: &[u8], max_stripes: usize) -> ChunkResult<Vec<InvalidStripe>> {
    if buf.len() % INVALID_STRIPE_RECORD_SIZE != 0 {
        return Err(ChunkError::BadStripeReport);
    }
    let count = buf.len() / INVALID_STRIPE_RECORD_SIZE;
    if count > max_stripes {
        return Err(ChunkError::BadStripeReport);
    }
    let mut stripes = Vec::with_capacity(count);
    for rec in buf.chunks_exact(INVALID_STRIPE_RECORD_SIZE) {
        let stripe_idx = i64::from_le_bytes(rec[0..8].try_into().map_err(|_| ChunkError::BadStripeReport)?);
        let chunk_id = i64::from_le_bytes(rec[8..16].try_into().map_err(|_| ChunkError::BadStripeReport)?);
        let chunk_version = i64::from_le_bytes(rec[16..24].try_into().map_err(|_| ChunkError::BadStripeReport)?);
        if stripe_idx < 0 || stripe_idx >= max_stripes as i64 {
            return Err(ChunkError::BadStripeReport);
        }
        stripes.push(InvalidStripe {
            stripe_idx,
            chunk_id: ChunkId::new(chunk_id),
            chunk_version,
        });
    }
    Ok(stripes)
}

/// Render a report as the space-separated triplet list the metadata
/// coordinator expects, e.g. `"2 101 4 5 104 4"`.
pub fn format_invalid_stripes(stripes: &[InvalidStripe]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for (i, s) in stripes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{} {} {}", s.stripe_idx, s.chunk_id, s.chunk_version);
    }
    out
}
