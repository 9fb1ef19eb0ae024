//! Lane replay.
//!
//! [`StreamReader`] walks one lane's block list in append order, handing
//! back the bytes of each record. The caller must read records with the
//! same sizes they were written with; the checked build verifies at
//! `end_lane` that every record was consumed and the cursor landed on the
//! lane's recorded end, since nothing else validates consumption.

use bytemuck::Pod;

use crate::block::{BlockId, Lane};
use crate::error::StreamError;
use crate::raw::{ClaimMode, LaneClaim};
use crate::stream::EventStream;

/// Sequential read access to a lane.
pub trait LaneRead {
    /// Return the next record's `size` bytes and advance past it.
    fn read_bytes(&mut self, size: usize) -> Result<&[u8], StreamError>;

    /// Return the next record's `size` bytes without advancing.
    fn peek_bytes(&self, size: usize) -> Result<&[u8], StreamError>;

    /// Records left in the open lane.
    fn remaining(&self) -> u32;

    /// Read the next record as a `T`.
    fn read<T: Pod>(&mut self) -> Result<T, StreamError> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Look at the next record as a `T` without advancing.
    fn peek<T: Pod>(&self) -> Result<T, StreamError> {
        let bytes = self.peek_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

struct ReadSession<'a> {
    index: usize,
    claim: LaneClaim<'a>,
    lane: Lane,
    block: Option<BlockId>,
    offset: u32,
    remaining: u32,
}

impl ReadSession<'_> {
    /// Where the next `size`-byte record starts: `(block, byte offset)`.
    fn locate(&self, max: usize, size: usize) -> Result<(BlockId, usize), StreamError> {
        let past_end = StreamError::ReadPastEnd {
            lane: self.index,
            requested: size,
        };
        if size > max {
            return Err(StreamError::AllocationTooLarge {
                requested: size,
                max,
            });
        }
        if crate::CHECKED && self.remaining == 0 {
            return Err(past_end);
        }
        let block = self.block.ok_or_else(|| past_end.clone())?;
        if self.offset as usize + size <= max {
            return Ok((block, self.offset as usize));
        }
        let next = self.claim.slot().blocks.get(block).next().ok_or(past_end)?;
        Ok((next, 0))
    }

    fn bytes(&self, block: BlockId, start: usize, size: usize) -> &[u8] {
        &self.claim.slot().blocks.get(block).data[start..start + size]
    }
}

/// Replays the lanes of one stream.
///
/// One lane is open at a time. Any number of readers may replay the same
/// stream, including the same lane, concurrently; opening a lane that a
/// writer holds fails with [`StreamError::LaneBusy`].
pub struct StreamReader<'a> {
    stream: &'a EventStream,
    session: Option<ReadSession<'a>>,
}

impl<'a> StreamReader<'a> {
    pub(crate) fn new(stream: &'a EventStream) -> Self {
        Self {
            stream,
            session: None,
        }
    }

    /// Number of lanes in the underlying stream.
    pub fn lane_count(&self) -> usize {
        self.stream.lane_count()
    }

    /// The lane currently open, if any.
    pub fn current_lane(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    /// Open `index` for reading and return its record count.
    pub fn begin_lane(&mut self, index: usize) -> Result<u32, StreamError> {
        if let Some(open) = &self.session {
            return Err(StreamError::SessionAlreadyOpen {
                open: open.index,
                requested: index,
            });
        }
        let claim = self.stream.claim(index, ClaimMode::Read)?;
        let lane = claim.slot().lane;
        self.session = Some(ReadSession {
            index,
            claim,
            lane,
            block: lane.head_block,
            offset: lane.first_offset,
            remaining: lane.element_count,
        });
        Ok(lane.element_count)
    }

    /// Close the open lane.
    ///
    /// The checked build fails if records were skipped or the cursor is
    /// not at the lane's recorded end. The lane is released either way.
    pub fn end_lane(&mut self) -> Result<(), StreamError> {
        let session = self.session.take().ok_or(StreamError::NoSessionOpen {
            operation: "end_lane",
        })?;
        if !crate::CHECKED {
            return Ok(());
        }
        if session.remaining != 0 {
            return Err(StreamError::LaneNotConsumed {
                lane: session.index,
                remaining: session.remaining,
            });
        }
        let tail = session.claim.slot().blocks.tail();
        if session.block != tail || session.offset != session.lane.last_offset {
            return Err(StreamError::CursorMismatch {
                lane: session.index,
                expected_offset: session.lane.last_offset,
                actual_offset: session.offset,
            });
        }
        Ok(())
    }

    /// Open `index`, read every record as a `T`, and close it.
    pub fn drain_lane<T: Pod>(&mut self, index: usize) -> Result<Vec<T>, StreamError> {
        let count = self.begin_lane(index)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(self.read::<T>()?);
        }
        self.end_lane()?;
        Ok(out)
    }

    fn open(&self, operation: &'static str) -> Result<&ReadSession<'a>, StreamError> {
        self.session
            .as_ref()
            .ok_or(StreamError::NoSessionOpen { operation })
    }
}

impl LaneRead for StreamReader<'_> {
    fn read_bytes(&mut self, size: usize) -> Result<&[u8], StreamError> {
        let max = self.stream.config().usable_bytes();
        let session = self.session.as_mut().ok_or(StreamError::NoSessionOpen {
            operation: "read",
        })?;
        let (block, start) = session.locate(max, size)?;
        session.block = Some(block);
        session.offset = (start + size) as u32;
        session.remaining = session.remaining.saturating_sub(1);
        Ok(session.bytes(block, start, size))
    }

    fn peek_bytes(&self, size: usize) -> Result<&[u8], StreamError> {
        let max = self.stream.config().usable_bytes();
        let session = self.open("peek")?;
        let (block, start) = session.locate(max, size)?;
        Ok(session.bytes(block, start, size))
    }

    fn remaining(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.remaining)
    }
}
