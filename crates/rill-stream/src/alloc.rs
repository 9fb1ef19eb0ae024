//! Block allocators.
//!
//! The [`BlockArena`](crate::BlockArena) never allocates memory itself; it
//! asks a [`BlockAllocator`] for block payloads and hands them back on
//! teardown. Allocators must be callable from any worker thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Source of zeroed block payloads.
pub trait BlockAllocator: Send + Sync {
    /// Return a zeroed payload of exactly `size` bytes.
    fn allocate(&self, size: usize) -> Box<[u8]>;

    /// Take back a payload previously returned by [`allocate`](Self::allocate).
    fn release(&self, data: Box<[u8]>);
}

/// Allocator handle shared by every stream of a container.
pub type SharedAllocator = Arc<dyn BlockAllocator>;

/// Allocates every block fresh from the global heap.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    /// Wrap a heap allocator in a shared handle.
    pub fn shared() -> SharedAllocator {
        Arc::new(HeapAllocator)
    }
}

impl BlockAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Box<[u8]> {
        vec![0u8; size].into_boxed_slice()
    }

    fn release(&self, data: Box<[u8]>) {
        drop(data);
    }
}

/// Recycles released blocks for the next tick's streams.
///
/// A bounded channel serves as a lock-free free list. Payloads whose size
/// does not match a request are dropped rather than resized, so a pool
/// shared by streams of different block sizes degrades to heap allocation
/// instead of misbehaving.
pub struct PooledAllocator {
    free_tx: Sender<Box<[u8]>>,
    free_rx: Receiver<Box<[u8]>>,
}

impl PooledAllocator {
    /// Create a pool retaining at most `capacity` released blocks.
    pub fn new(capacity: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        Self { free_tx, free_rx }
    }

    /// Wrap a new pool in a shared handle.
    pub fn shared(capacity: usize) -> SharedAllocator {
        Arc::new(Self::new(capacity))
    }

    /// Number of blocks currently waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.free_rx.len()
    }
}

impl BlockAllocator for PooledAllocator {
    fn allocate(&self, size: usize) -> Box<[u8]> {
        while let Ok(mut data) = self.free_rx.try_recv() {
            if data.len() == size {
                data.fill(0);
                return data;
            }
        }
        vec![0u8; size].into_boxed_slice()
    }

    fn release(&self, data: Box<[u8]>) {
        match self.free_tx.try_send(data) {
            Ok(()) => {}
            // Pool full: let the block go back to the heap.
            Err(TrySendError::Full(data)) | Err(TrySendError::Disconnected(data)) => drop(data),
        }
    }
}
