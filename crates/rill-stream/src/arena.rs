//! Block arena: the only place blocks are allocated and freed.
//!
//! [`BlockArena`] holds the allocator handle and block accounting for one
//! stream. The per-lane block lists live in the stream's lane table next to
//! each lane's metadata, so that the lane claim which serialises writers
//! also serialises block linking. The arena is handed the list of the lane
//! it is growing; it never touches another lane's list.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::alloc::SharedAllocator;
use crate::block::{Block, BlockId, BlockList};
use crate::config::StreamConfig;

/// Allocator handle plus block accounting for one stream.
pub struct BlockArena {
    allocator: SharedAllocator,
    config: StreamConfig,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

// Compile-time assertion: BlockArena must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BlockArena>();
};

impl BlockArena {
    /// Create an arena over `allocator`. The config must already be validated.
    pub fn new(allocator: SharedAllocator, config: StreamConfig) -> Self {
        Self {
            allocator,
            config,
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Allocate a block for `lane` and link it after `previous`.
    ///
    /// With `previous == None` the block becomes the head of the lane's
    /// list. Calls for different lanes may run concurrently; calls for the
    /// same lane are serialised by the lane claim that lends out `blocks`.
    pub(crate) fn allocate_block(
        &self,
        lane: usize,
        blocks: &mut BlockList,
        previous: Option<BlockId>,
    ) -> BlockId {
        let data = self.allocator.allocate(self.config.usable_bytes());
        let id = blocks.link(Block::new(data), previous);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        trace!(lane, block = id.index(), "linked block");
        id
    }

    /// Return every block of one lane's list to the allocator.
    pub(crate) fn release_lane(&self, blocks: &mut BlockList) {
        let mut count = 0;
        for data in blocks.drain() {
            self.allocator.release(data);
            count += 1;
        }
        self.released.fetch_add(count, Ordering::Relaxed);
    }

    /// Total blocks handed out over the arena's lifetime.
    pub fn blocks_allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total blocks returned to the allocator.
    pub fn blocks_released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Blocks currently owned by the arena's lanes.
    pub fn live_blocks(&self) -> usize {
        self.blocks_allocated() - self.blocks_released()
    }

    /// Memory currently held, in bytes (full block size per block).
    pub fn memory_bytes(&self) -> usize {
        self.live_blocks() * self.config.block_size
    }

    /// The arena's stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;

    fn arena(block_size: usize) -> BlockArena {
        BlockArena::new(
            HeapAllocator::shared(),
            StreamConfig::with_block_size(block_size),
        )
    }

    #[test]
    fn allocate_links_after_previous() {
        let arena = arena(64);
        let mut list = BlockList::default();
        let head = arena.allocate_block(0, &mut list, None);
        let second = arena.allocate_block(0, &mut list, Some(head));
        assert_eq!(list.get(head).next(), Some(second));
        assert_eq!(list.get(second).capacity(), 64 - StreamConfig::HEADER_BYTES);
        assert_eq!(arena.blocks_allocated(), 2);
    }

    #[test]
    fn release_returns_every_block() {
        let arena = arena(64);
        let mut a = BlockList::default();
        let mut b = BlockList::default();
        let head = arena.allocate_block(0, &mut a, None);
        arena.allocate_block(0, &mut a, Some(head));
        arena.allocate_block(1, &mut b, None);
        assert_eq!(arena.live_blocks(), 3);
        assert_eq!(arena.memory_bytes(), 3 * 64);

        arena.release_lane(&mut a);
        arena.release_lane(&mut b);
        assert_eq!(arena.blocks_released(), 3);
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn release_of_empty_lane_is_noop() {
        let arena = arena(64);
        let mut list = BlockList::default();
        arena.release_lane(&mut list);
        assert_eq!(arena.blocks_released(), 0);
    }
}
