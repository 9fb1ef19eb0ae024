//! Tick-scoped coordination of Rill event streams.
//!
//! [`EventContainer`] manages the streams of one event type across a tick:
//! producer sessions, the reader snapshot, completion tokens, and deferred
//! streams created out of phase. [`EventBus`] lets independent subsystems
//! read the same stream without copying it and drops it only after every
//! holder has released it.
//!
//! Neither type runs work or blocks per tick. Ordering is expressed purely
//! as [`Scheduler`](rill_core::Scheduler) tokens; only
//! [`EventContainer::shutdown`] waits.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod container;
pub mod error;
pub mod readers;

pub use bus::{BusKey, Delivery, EventBus};
pub use config::ContainerConfig;
pub use container::{ContainerMode, EventContainer, ProducerSession};
pub use error::EventError;
pub use readers::EventReaders;

/// Whether tick protocol checks are compiled in.
///
/// When true, the following misuses are reported as errors:
/// - taking readers or ending the tick with producer sessions open
/// - completing a non-deferred producer after readers were handed out
/// - adding a consumer token outside read mode
/// - releasing a bus stream the subscriber does not hold
pub const CHECKED: bool = cfg!(any(feature = "checked", debug_assertions));
