//! Claim-guarded lane cells.
//!
//! Lanes of one stream are mutated concurrently by different workers
//! through a shared `&EventStream`. Each lane's state sits in an
//! `UnsafeCell` behind an atomic claim word: a [`LaneClaim`] is the only way
//! to reach the state. A lane holds either one write claim or any number of
//! read claims. Claiming never waits; a contended claim fails with
//! `LaneBusy`.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::block::{BlockList, Lane};
use crate::error::StreamError;

/// Claim word values: `FREE`, `WRITING`, or a count of live read claims.
const FREE: u32 = 0;
const WRITING: u32 = u32::MAX;
const MAX_READERS: u32 = WRITING - 1;

/// What a claim is taken for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClaimMode {
    Write,
    Read,
}

fn describe(word: u32) -> &'static str {
    match word {
        WRITING => "writing",
        FREE => "free",
        _ => "reading",
    }
}

/// Everything one lane owns: replay metadata and its block list.
#[derive(Default)]
pub(crate) struct LaneSlot {
    pub(crate) lane: Lane,
    pub(crate) blocks: BlockList,
}

/// A lane's state behind an atomic claim.
pub(crate) struct LaneCell {
    state: AtomicU32,
    slot: UnsafeCell<LaneSlot>,
}

// SAFETY: the slot is only reached through a `LaneClaim` or through
// `get_mut` (which requires exclusive access to the cell). A write claim
// is the only live claim on its cell, enforced by the compare-exchange
// from `FREE`; read claims coexist with each other but never with a write
// claim, and only hand out shared references. `LaneSlot` owns plain heap
// data and is `Send + Sync`.
unsafe impl Sync for LaneCell {}

impl LaneCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU32::new(FREE),
            slot: UnsafeCell::new(LaneSlot::default()),
        }
    }

    /// Take the lane for `mode`, failing immediately if a conflicting
    /// claim is held.
    pub(crate) fn claim(&self, lane: usize, mode: ClaimMode) -> Result<LaneClaim<'_>, StreamError> {
        match mode {
            ClaimMode::Write => self.claim_write(lane),
            ClaimMode::Read => self.claim_read(lane),
        }
    }

    fn claim_write(&self, lane: usize) -> Result<LaneClaim<'_>, StreamError> {
        match self
            .state
            .compare_exchange(FREE, WRITING, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(LaneClaim {
                cell: self,
                mode: ClaimMode::Write,
            }),
            Err(held) => Err(StreamError::LaneBusy {
                lane,
                held_for: describe(held),
            }),
        }
    }

    fn claim_read(&self, lane: usize) -> Result<LaneClaim<'_>, StreamError> {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current == WRITING || current == MAX_READERS {
                return Err(StreamError::LaneBusy {
                    lane,
                    held_for: describe(current),
                });
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(LaneClaim {
                        cell: self,
                        mode: ClaimMode::Read,
                    })
                }
                Err(seen) => current = seen,
            }
        }
    }

    /// Exclusive access without claiming.
    pub(crate) fn get_mut(&mut self) -> &mut LaneSlot {
        self.slot.get_mut()
    }
}

/// Access to one lane: exclusive for writes, shared for reads. Released
/// on drop.
pub(crate) struct LaneClaim<'a> {
    cell: &'a LaneCell,
    mode: ClaimMode,
}

impl LaneClaim<'_> {
    pub(crate) fn slot(&self) -> &LaneSlot {
        // SAFETY: while this claim lives no write claim exists on the cell
        // other than possibly this one, and `get_mut` cannot run while
        // `&LaneCell` is borrowed by it.
        unsafe { &*self.cell.slot.get() }
    }

    pub(crate) fn slot_mut(&mut self) -> &mut LaneSlot {
        assert_eq!(self.mode, ClaimMode::Write, "read claims never mutate");
        // SAFETY: a write claim is the only live claim on the cell, and
        // `&mut self` prevents overlapping borrows obtained through it.
        unsafe { &mut *self.cell.slot.get() }
    }
}

impl Drop for LaneClaim<'_> {
    fn drop(&mut self) {
        match self.mode {
            ClaimMode::Write => self.cell.state.store(FREE, Ordering::Release),
            ClaimMode::Read => {
                self.cell.state.fetch_sub(1, Ordering::Release);
            }
        }
    }
}
