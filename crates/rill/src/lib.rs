//! Rill: segmented append-only event streams for parallel simulations.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Rill sub-crates. For most users, adding `rill` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use rill::prelude::*;
//!
//! let stream = EventStream::new(
//!     LaneLayout::Indexed { lanes: 2 },
//!     StreamConfig::new(),
//!     HeapAllocator::shared(),
//! )
//! .unwrap();
//!
//! // Producers fill lanes; lane 0 stays empty.
//! let mut writer = stream.index_writer().unwrap();
//! writer.begin_lane(1).unwrap();
//! writer.write(&42u32).unwrap();
//! writer.write(&7u32).unwrap();
//! writer.end_lane().unwrap();
//! drop(writer);
//!
//! // Consumers replay each lane in append order.
//! let mut reader = stream.reader();
//! assert!(reader.drain_lane::<u32>(0).unwrap().is_empty());
//! assert_eq!(reader.drain_lane::<u32>(1).unwrap(), vec![42, 7]);
//! ```
//!
//! Per-tick coordination goes through [`events::EventContainer`], which
//! needs a [`core_types::Scheduler`] implementation from the host's task
//! system.
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`core_types`] | `rill-core` | IDs and the scheduler contract |
//! | [`stream`] | `rill-stream` | Blocks, lanes, writers, readers, chunking |
//! | [`events`] | `rill-events` | Event containers, reader snapshots, event bus |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers and the scheduler contract (`rill-core`).
///
/// Implement [`core_types::Scheduler`] to plug Rill into a task system.
pub use rill_core as core_types;

/// Segmented streams (`rill-stream`).
///
/// [`stream::EventStream`] with its [`stream::IndexWriter`],
/// [`stream::ThreadWriter`], and [`stream::StreamReader`]; block
/// allocators; and [`stream::chunk`] for payloads larger than one block.
pub use rill_stream as stream;

/// Tick-scoped containers and the event bus (`rill-events`).
pub use rill_events as events;

/// Common imports for typical Rill usage.
///
/// ```rust
/// use rill::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use rill_core::{Scheduler, StreamId, TaskContext, TickId, WorkerId};

    // Streams
    pub use rill_stream::{
        EventStream, HeapAllocator, LaneLayout, LaneRead, LaneWrite, PooledAllocator,
        StreamConfig, StreamError,
    };

    // Containers and bus
    pub use rill_events::{
        BusKey, ContainerConfig, EventBus, EventContainer, EventError, EventReaders,
        ProducerSession,
    };
}
