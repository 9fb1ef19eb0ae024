//! Blocks, per-lane block lists, and lane metadata.
//!
//! A [`Block`] is a fixed-size segment of zeroed bytes with a link to the
//! next block of its lane. A [`BlockList`] owns one lane's blocks in link
//! order; blocks are never reordered or removed until the stream is
//! destroyed. A [`Lane`] records everything a reader needs to replay it.

/// Index of a block within its lane's [`BlockList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Position of the block in its lane's list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A fixed-size memory segment.
///
/// Blocks are handed out by the [`BlockArena`](crate::BlockArena) and
/// returned to its allocator when the owning stream is destroyed.
pub struct Block {
    /// Following block of the same lane, if one has been linked.
    pub(crate) next: Option<BlockId>,
    /// Payload bytes (block size minus the link header).
    pub(crate) data: Box<[u8]>,
}

impl Block {
    pub(crate) fn new(data: Box<[u8]>) -> Self {
        Self { next: None, data }
    }

    /// The following block in the lane, if any.
    pub fn next(&self) -> Option<BlockId> {
        self.next
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// One lane's blocks, in link order.
#[derive(Default)]
pub(crate) struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    /// Append a block, linking it after `previous` when given.
    pub(crate) fn link(&mut self, block: Block, previous: Option<BlockId>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        if let Some(prev) = previous {
            self.blocks[prev.index()].next = Some(id);
        }
        id
    }

    /// The most recently linked block.
    pub(crate) fn tail(&self) -> Option<BlockId> {
        self.blocks
            .len()
            .checked_sub(1)
            .map(|last| BlockId(last as u32))
    }

    pub(crate) fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Remove every block, yielding their payloads for release.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Box<[u8]>> + '_ {
        self.blocks.drain(..).map(|b| b.data)
    }
}

/// Replay metadata for one lane.
///
/// Only valid after the lane's write session has closed (for
/// [`IndexWriter`](crate::IndexWriter) lanes) or after any completed
/// record (for [`ThreadWriter`](crate::ThreadWriter) lanes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Lane {
    /// First block of the lane, `None` if nothing was written.
    pub head_block: Option<BlockId>,
    /// Byte offset of the first record in the head block.
    pub first_offset: u32,
    /// Number of records appended.
    pub element_count: u32,
    /// Byte offset one past the last record in the last block.
    pub last_offset: u32,
    /// Number of blocks linked into the lane.
    pub block_count: u32,
}

impl Lane {
    /// Whether the lane holds no records.
    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(len: usize) -> Block {
        Block::new(vec![0u8; len].into_boxed_slice())
    }

    #[test]
    fn link_chains_blocks_in_order() {
        let mut list = BlockList::default();
        assert_eq!(list.tail(), None);
        let a = list.link(block(8), None);
        let b = list.link(block(8), Some(a));
        let c = list.link(block(8), Some(b));
        assert_eq!(list.get(a).next(), Some(b));
        assert_eq!(list.get(b).next(), Some(c));
        assert_eq!(list.get(c).next(), None);
        assert_eq!(list.tail(), Some(c));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn drain_yields_every_payload() {
        let mut list = BlockList::default();
        let a = list.link(block(4), None);
        list.link(block(4), Some(a));
        assert_eq!(list.drain().count(), 2);
        assert_eq!(list.len(), 0);
        assert_eq!(list.tail(), None);
    }

    #[test]
    fn default_lane_is_empty() {
        let lane = Lane::default();
        assert!(lane.is_empty());
        assert_eq!(lane.head_block, None);
        assert_eq!(lane.block_count, 0);
    }
}
