//! Test utilities and mock collaborators for Rill development.
//!
//! Provides instrumented implementations of the collaborator traits
//! ([`BlockAllocator`](rill_stream::BlockAllocator) and
//! [`Scheduler`](rill_core::Scheduler)) plus record fixtures:
//!
//! - [`CountingAllocator`] counts block allocations and releases.
//! - [`ManualScheduler`] completes tasks only when the test says so.
//! - [`PoolScheduler`] runs work on a real worker-thread pool.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod alloc;
pub mod fixtures;
pub mod manual;
pub mod pool;

pub use alloc::CountingAllocator;
pub use manual::{ManualScheduler, ManualToken};
pub use pool::{PoolScheduler, PoolToken};

use std::sync::Once;

/// Route `tracing` output through the test harness writer.
///
/// Honours `RUST_LOG`; silent otherwise. Safe to call from every test.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
