//! The event stream: a block arena plus its lane table.
//!
//! An [`EventStream`] is created once per producer phase, filled by any
//! number of parallel writers, replayed by readers, and destroyed exactly
//! once when the last owner drops it. Its lane count is fixed at
//! construction.

use std::fmt;
use std::ops::Range;

use rill_core::{StreamId, WorkerId};
use tracing::debug;

use crate::alloc::SharedAllocator;
use crate::arena::BlockArena;
use crate::block::Lane;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::raw::{ClaimMode, LaneCell, LaneClaim};
use crate::read::StreamReader;
use crate::write::{IndexWriter, ThreadWriter};

/// How a stream's lanes are keyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneLayout {
    /// One lane per logical partition, chosen explicitly by
    /// [`IndexWriter`]s.
    Indexed {
        /// Number of partitions.
        lanes: usize,
    },
    /// One lane per hardware worker, chosen implicitly by
    /// [`ThreadWriter`]s.
    PerWorker {
        /// Number of worker threads.
        workers: usize,
    },
}

impl LaneLayout {
    /// Number of lanes this layout allocates.
    pub fn lane_count(self) -> usize {
        match self {
            Self::Indexed { lanes } => lanes,
            Self::PerWorker { workers } => workers,
        }
    }
}

impl fmt::Display for LaneLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed { lanes } => write!(f, "indexed({lanes})"),
            Self::PerWorker { workers } => write!(f, "per-worker({workers})"),
        }
    }
}

/// A segmented, append-only, multi-lane record stream.
///
/// `EventStream` is `Send + Sync`: writers and readers borrow it shared
/// and serialise per lane through atomic claims. Share it across tasks
/// with `Arc<EventStream>`.
pub struct EventStream {
    id: StreamId,
    layout: LaneLayout,
    arena: BlockArena,
    lanes: Box<[LaneCell]>,
}

// Compile-time assertion: EventStream must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<EventStream>();
};

impl EventStream {
    /// Create an empty stream with `layout.lane_count()` lanes.
    pub fn new(
        layout: LaneLayout,
        config: StreamConfig,
        allocator: SharedAllocator,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let lanes = (0..layout.lane_count()).map(|_| LaneCell::new()).collect();
        let id = StreamId::next();
        debug!(%id, %layout, block_size = config.block_size, "stream created");
        Ok(Self {
            id,
            layout,
            arena: BlockArena::new(allocator, config),
            lanes,
        })
    }

    /// Unique identity of this stream.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// How the lanes are keyed.
    pub fn layout(&self) -> LaneLayout {
        self.layout
    }

    /// Number of lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// The stream's block arena.
    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    /// The stream's configuration.
    pub fn config(&self) -> &StreamConfig {
        self.arena.config()
    }

    /// Copy of one lane's metadata.
    ///
    /// Fails with [`StreamError::LaneBusy`] while the lane is being
    /// written. Open readers do not block it.
    pub fn lane(&self, index: usize) -> Result<Lane, StreamError> {
        let claim = self.claim(index, ClaimMode::Read)?;
        Ok(claim.slot().lane)
    }

    /// Total records across all lanes.
    pub fn element_count(&self) -> Result<u64, StreamError> {
        let mut total = 0u64;
        for index in 0..self.lane_count() {
            total += u64::from(self.lane(index)?.element_count);
        }
        Ok(total)
    }

    /// Total blocks linked across all lanes.
    pub fn block_count(&self) -> Result<u64, StreamError> {
        let mut total = 0u64;
        for index in 0..self.lane_count() {
            total += u64::from(self.lane(index)?.block_count);
        }
        Ok(total)
    }

    /// Whether no lane holds a record.
    pub fn is_empty(&self) -> Result<bool, StreamError> {
        Ok(self.element_count()? == 0)
    }

    /// A writer that may open any lane.
    pub fn index_writer(&self) -> Result<IndexWriter<'_>, StreamError> {
        self.index_writer_in(0..self.lane_count())
    }

    /// A writer restricted to `range`, for lane sets statically partitioned
    /// across workers.
    pub fn index_writer_in(&self, range: Range<usize>) -> Result<IndexWriter<'_>, StreamError> {
        if crate::CHECKED && !matches!(self.layout, LaneLayout::Indexed { .. }) {
            return Err(StreamError::WrongLayout {
                expected: "indexed",
                actual: self.layout,
            });
        }
        if range.end > self.lane_count() || range.start > range.end {
            return Err(StreamError::LaneOutOfRange {
                lane: range.end.saturating_sub(1).max(range.start),
                lane_count: self.lane_count(),
            });
        }
        Ok(IndexWriter::new(self, range))
    }

    /// A writer bound to `worker`'s lane.
    ///
    /// The lane stays claimed until the writer drops, so create one per
    /// task at task start and let it go when the task ends.
    pub fn thread_writer(&self, worker: WorkerId) -> Result<ThreadWriter<'_>, StreamError> {
        if crate::CHECKED && !matches!(self.layout, LaneLayout::PerWorker { .. }) {
            return Err(StreamError::WrongLayout {
                expected: "per-worker",
                actual: self.layout,
            });
        }
        let claim = self.claim(worker.index(), ClaimMode::Write)?;
        Ok(ThreadWriter::new(self, worker, claim))
    }

    /// A reader over this stream's lanes.
    pub fn reader(&self) -> StreamReader<'_> {
        StreamReader::new(self)
    }

    /// Destroy the stream, returning every block to the allocator.
    ///
    /// Equivalent to dropping it; ownership guarantees it runs once.
    pub fn destroy(self) {
        drop(self);
    }

    pub(crate) fn claim(&self, index: usize, mode: ClaimMode) -> Result<LaneClaim<'_>, StreamError> {
        let cell = self.lanes.get(index).ok_or(StreamError::LaneOutOfRange {
            lane: index,
            lane_count: self.lanes.len(),
        })?;
        cell.claim(index, mode)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for cell in self.lanes.iter_mut() {
            self.arena.release_lane(&mut cell.get_mut().blocks);
        }
        debug!(
            id = %self.id,
            blocks = self.arena.blocks_released(),
            "stream destroyed"
        );
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("live_blocks", &self.arena.live_blocks())
            .finish()
    }
}
