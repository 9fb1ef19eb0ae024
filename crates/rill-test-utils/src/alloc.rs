//! Instrumented block allocator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rill_stream::{BlockAllocator, SharedAllocator};

/// Heap allocator that counts every call.
///
/// Hand a clone of the `Arc` to the code under test as a
/// [`SharedAllocator`] and keep one to inspect the counters.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    bytes_allocated: AtomicUsize,
    bytes_released: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The same allocator as a trait-object handle.
    pub fn shared(self: &Arc<Self>) -> SharedAllocator {
        Arc::clone(self) as SharedAllocator
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Blocks handed out and not yet returned.
    ///
    /// Releases are read first so a concurrent allocate/release pair
    /// cannot make the difference negative; releasing blocks this
    /// allocator never handed out reads as zero.
    pub fn outstanding(&self) -> usize {
        let releases = self.releases();
        self.allocations().saturating_sub(releases)
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::SeqCst)
    }

    pub fn bytes_released(&self) -> usize {
        self.bytes_released.load(Ordering::SeqCst)
    }
}

impl BlockAllocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Box<[u8]> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.bytes_allocated.fetch_add(size, Ordering::SeqCst);
        vec![0u8; size].into_boxed_slice()
    }

    fn release(&self, data: Box<[u8]>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.bytes_released.fetch_add(data.len(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_balance() {
        let counter = CountingAllocator::new();
        let shared = counter.shared();
        let a = shared.allocate(16);
        let b = shared.allocate(16);
        assert_eq!(counter.allocations(), 2);
        assert_eq!(counter.outstanding(), 2);
        shared.release(a);
        shared.release(b);
        assert_eq!(counter.releases(), 2);
        assert_eq!(counter.bytes_released(), counter.bytes_allocated());
    }

    #[test]
    fn foreign_release_does_not_underflow() {
        let counter = CountingAllocator::new();
        counter.shared().release(vec![0u8; 8].into_boxed_slice());
        assert_eq!(counter.releases(), 1);
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn outstanding_never_underflows_under_churn() {
        let counter = CountingAllocator::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                let shared = counter.shared();
                s.spawn(move || {
                    for _ in 0..2000 {
                        let block = shared.allocate(8);
                        shared.release(block);
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..2000 {
                    let outstanding = counter.outstanding();
                    assert!(outstanding <= counter.allocations());
                }
            });
        });
        assert_eq!(counter.outstanding(), 0);
    }
}
