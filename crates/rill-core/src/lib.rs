//! Core types and traits for the Rill event stream framework.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the identifiers shared by every other Rill crate and the
//! [`Scheduler`] contract through which the stream and event layers
//! express completion ordering without ever blocking.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod id;
pub mod scheduler;

pub use id::{ContainerId, StreamId, SubscriberId, TaskId, TickId, WorkerId};
pub use scheduler::{ParallelWork, Scheduler, TaskContext};
