//! Segmented append-only event streams for Rill.
//!
//! Many parallel workers append fixed-layout records into per-lane block
//! lists without locks and without per-record heap allocation; consumers
//! later replay each lane in append order. This crate is the only one in
//! the workspace that contains `unsafe` code, confined to `raw.rs`.
//!
//! # Architecture
//!
//! ```text
//! EventStream (one per producer phase, per tick)
//! ├── BlockArena (allocator handle + block accounting)
//! └── LaneCell × lane_count (atomic claim + lane state)
//!     ├── Lane (head block, offsets, element and block counts)
//!     └── BlockList → Block[] (fixed-size segments, linked by `next`)
//! ```
//!
//! # Writers and readers
//!
//! - [`IndexWriter`]: the caller opens lanes explicitly with
//!   `begin_lane`/`end_lane`; lane metadata is committed at `end_lane`.
//! - [`ThreadWriter`]: the lane is the worker's slot; metadata is updated
//!   after every record.
//! - [`StreamReader`]: replays one lane at a time in append order.
//!
//! Every lane is guarded by an atomic claim: one writer, or any number of
//! readers. A writer on a lane that is being read or written, or a reader
//! on a lane that is being written, gets [`StreamError::LaneBusy`]
//! immediately rather than waiting, so misuse never turns into a data race.
//!
//! # Checked build
//!
//! The `checked` feature (on by default, and always on under
//! `debug_assertions`) adds the descriptive protocol checks listed on
//! [`CHECKED`]. Disabling it removes them from the hot path; misuse then
//! yields wrong counts, never undefined behaviour.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod alloc;
pub mod arena;
pub mod block;
pub mod chunk;
pub mod config;
pub mod error;
mod raw;
pub mod read;
pub mod stream;
pub mod write;

// Public re-exports for the primary API surface.
pub use alloc::{BlockAllocator, HeapAllocator, PooledAllocator, SharedAllocator};
pub use arena::BlockArena;
pub use block::{Block, BlockId, Lane};
pub use config::StreamConfig;
pub use error::StreamError;
pub use read::{LaneRead, StreamReader};
pub use stream::{EventStream, LaneLayout};
pub use write::{IndexWriter, LaneWrite, ThreadWriter};

/// Whether descriptive protocol checks are compiled in.
///
/// When true, the following misuses are reported as errors:
/// - opening a lane that already holds records this tick
/// - opening a lane outside an [`IndexWriter`] restriction
/// - using a writer kind that does not match the stream's [`LaneLayout`]
/// - reading more records than a lane recorded
/// - closing a reader lane with records left or the cursor off the
///   recorded end
pub const CHECKED: bool = cfg!(any(feature = "checked", debug_assertions));
