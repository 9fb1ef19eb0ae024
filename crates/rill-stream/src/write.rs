//! Lane writers.
//!
//! Both writers bump-allocate inside the current block of a lane and ask
//! the [`BlockArena`] for a new block when a record does not fit. A record
//! is never split across blocks, so one allocation is limited to
//! [`StreamConfig::usable_bytes`](crate::StreamConfig::usable_bytes);
//! larger payloads go through [`chunk`](crate::chunk).
//!
//! The two writers differ in when lane metadata becomes valid:
//!
//! | Writer | Lane chosen by | Metadata committed |
//! |--------|----------------|--------------------|
//! | [`IndexWriter`] | `begin_lane(i)` | at `end_lane()` |
//! | [`ThreadWriter`] | worker id at creation | after every record |

use std::ops::Range;

use bytemuck::Pod;
use rill_core::WorkerId;
use tracing::debug;

use crate::arena::BlockArena;
use crate::block::{BlockList, Lane};
use crate::error::StreamError;
use crate::raw::{ClaimMode, LaneClaim};
use crate::stream::EventStream;

/// Append access to a lane.
pub trait LaneWrite {
    /// Reserve `size` bytes for one record and return them for filling.
    ///
    /// The bytes stay valid until the stream is destroyed; the returned
    /// borrow only lasts until the next writer call.
    fn allocate(&mut self, size: usize) -> Result<&mut [u8], StreamError>;

    /// Append `bytes` as one record.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.allocate(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Append `value` as one record.
    fn write<T: Pod>(&mut self, value: &T) -> Result<(), StreamError> {
        self.write_bytes(bytemuck::bytes_of(value))
    }
}

/// Bump-allocate `size` bytes at the end of a lane.
fn bump<'b>(
    arena: &BlockArena,
    index: usize,
    lane: &mut Lane,
    blocks: &'b mut BlockList,
    size: usize,
) -> Result<&'b mut [u8], StreamError> {
    let max = arena.config().usable_bytes();
    if size > max {
        return Err(StreamError::AllocationTooLarge {
            requested: size,
            max,
        });
    }

    let target = match blocks.tail() {
        Some(tail) if lane.last_offset as usize + size <= max => tail,
        previous => {
            let id = arena.allocate_block(index, blocks, previous);
            if lane.head_block.is_none() {
                lane.head_block = Some(id);
                lane.first_offset = 0;
            }
            lane.block_count += 1;
            lane.last_offset = 0;
            id
        }
    };

    let start = lane.last_offset as usize;
    lane.last_offset += size as u32;
    lane.element_count += 1;
    Ok(&mut blocks.get_mut(target).data[start..start + size])
}

struct WriteSession<'a> {
    index: usize,
    claim: LaneClaim<'a>,
    lane: Lane,
}

/// Writes into lanes the caller chooses explicitly.
///
/// Each lane gets one `begin_lane`/`end_lane` session per tick. Lane
/// metadata is only committed at `end_lane`; until then readers see the
/// lane as busy. A writer may be restricted to a sub-range of lanes when
/// the lane set is statically partitioned across workers.
pub struct IndexWriter<'a> {
    stream: &'a EventStream,
    restriction: Range<usize>,
    session: Option<WriteSession<'a>>,
}

impl<'a> IndexWriter<'a> {
    pub(crate) fn new(stream: &'a EventStream, restriction: Range<usize>) -> Self {
        Self {
            stream,
            restriction,
            session: None,
        }
    }

    /// Open `index` for writing.
    ///
    /// Fails before any allocation if this writer already has a lane open,
    /// if another instance holds the lane, or (checked build) if the lane
    /// is outside the restriction or already written this tick.
    pub fn begin_lane(&mut self, index: usize) -> Result<(), StreamError> {
        if let Some(open) = &self.session {
            return Err(StreamError::SessionAlreadyOpen {
                open: open.index,
                requested: index,
            });
        }
        if crate::CHECKED && !self.restriction.contains(&index) {
            return Err(StreamError::LaneOutsideRestriction {
                lane: index,
                min: self.restriction.start,
                max: self.restriction.end,
            });
        }
        let claim = self.stream.claim(index, ClaimMode::Write)?;
        let lane = claim.slot().lane;
        if crate::CHECKED && lane.element_count != 0 {
            return Err(StreamError::LaneAlreadyWritten {
                lane: index,
                element_count: lane.element_count,
            });
        }
        self.session = Some(WriteSession { index, claim, lane });
        Ok(())
    }

    /// Close the open lane, committing its metadata.
    pub fn end_lane(&mut self) -> Result<Lane, StreamError> {
        let session = self.session.take().ok_or(StreamError::NoSessionOpen {
            operation: "end_lane",
        })?;
        Ok(Self::commit(session))
    }

    /// The lane currently open, if any.
    pub fn current_lane(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    /// Lanes this writer may open.
    pub fn restriction(&self) -> Range<usize> {
        self.restriction.clone()
    }

    fn commit(mut session: WriteSession<'_>) -> Lane {
        session.claim.slot_mut().lane = session.lane;
        session.lane
    }
}

impl LaneWrite for IndexWriter<'_> {
    fn allocate(&mut self, size: usize) -> Result<&mut [u8], StreamError> {
        let stream = self.stream;
        let session = self.session.as_mut().ok_or(StreamError::NoSessionOpen {
            operation: "allocate",
        })?;
        let slot = session.claim.slot_mut();
        bump(
            stream.arena(),
            session.index,
            &mut session.lane,
            &mut slot.blocks,
            size,
        )
    }
}

impl Drop for IndexWriter<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(lane = session.index, "index writer dropped with lane open; committing");
            Self::commit(session);
        }
    }
}

/// Writes into the lane of the worker thread that created it.
///
/// No session bracket: every record updates the lane's metadata
/// immediately, so the lane is consistent even if the task stops between
/// records. The lane is claimed for the writer's lifetime.
pub struct ThreadWriter<'a> {
    stream: &'a EventStream,
    worker: WorkerId,
    claim: LaneClaim<'a>,
}

impl<'a> ThreadWriter<'a> {
    pub(crate) fn new(stream: &'a EventStream, worker: WorkerId, claim: LaneClaim<'a>) -> Self {
        Self {
            stream,
            worker,
            claim,
        }
    }

    /// The worker this writer belongs to.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Current metadata of the worker's lane.
    pub fn lane(&self) -> Lane {
        self.claim.slot().lane
    }
}

impl LaneWrite for ThreadWriter<'_> {
    fn allocate(&mut self, size: usize) -> Result<&mut [u8], StreamError> {
        let stream = self.stream;
        let index = self.worker.index();
        let slot = self.claim.slot_mut();
        bump(stream.arena(), index, &mut slot.lane, &mut slot.blocks, size)
    }
}
