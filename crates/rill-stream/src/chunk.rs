//! Payloads larger than one block.
//!
//! A single allocation never spans blocks, so a payload longer than
//! [`max_chunk`] is written as `len / max` full chunks followed by one
//! remainder chunk. Each chunk is an ordinary record. The reader must know
//! the payload length to replay the same chunk sequence.

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::read::LaneRead;
use crate::write::LaneWrite;

/// Largest chunk a writer accepts under `config`.
pub fn max_chunk(config: &StreamConfig) -> usize {
    config.usable_bytes()
}

/// Records needed for a `len`-byte payload with chunks of at most `max`.
///
/// An empty remainder is not written, so a payload that is an exact
/// multiple of `max` (including an empty payload) has no trailing chunk.
pub fn chunk_count(len: usize, max: usize) -> usize {
    debug_assert!(max > 0, "chunk size must be positive");
    len.div_ceil(max)
}

/// Append `bytes` to the writer's lane as consecutive chunk records.
///
/// Returns the number of records written.
pub fn write_chunked<W: LaneWrite>(
    writer: &mut W,
    bytes: &[u8],
    config: &StreamConfig,
) -> Result<usize, StreamError> {
    let max = max_chunk(config);
    let mut written = 0;
    for chunk in bytes.chunks(max) {
        writer.write_bytes(chunk)?;
        written += 1;
    }
    Ok(written)
}

/// Read a payload written by [`write_chunked`] into `out`.
///
/// `out.len()` is the payload length and must match what was written.
pub fn read_chunked<R: LaneRead>(
    reader: &mut R,
    out: &mut [u8],
    config: &StreamConfig,
) -> Result<usize, StreamError> {
    let max = max_chunk(config);
    let mut read = 0;
    for chunk in out.chunks_mut(max) {
        chunk.copy_from_slice(reader.read_bytes(chunk.len())?);
        read += 1;
    }
    Ok(read)
}
