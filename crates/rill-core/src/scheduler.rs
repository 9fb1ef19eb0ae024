//! The task scheduler contract.
//!
//! Rill never runs work itself. Producers and consumers are scheduled by an
//! external task graph that hands back completion tokens; the stream and
//! event layers only store and combine those tokens so that memory is
//! released after the work that touches it has finished.

use std::sync::Arc;

use crate::id::WorkerId;

/// Per-invocation context handed to parallel work by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
    /// Which of the `partitions` requested by
    /// [`Scheduler::run_parallel`] this invocation handles.
    pub partition: usize,
    /// The hardware worker thread running this invocation.
    pub worker: WorkerId,
}

/// Work run once per partition by [`Scheduler::run_parallel`].
pub type ParallelWork = Arc<dyn Fn(TaskContext) + Send + Sync>;

/// A cooperative parallel task scheduler.
///
/// Tokens represent "this unit of work has finished". They compose via
/// [`combine`](Scheduler::combine), which must be associative: combining
/// `[a, combine([b, c])]` waits for exactly the same work as
/// `[combine([a, b]), c]`.
///
/// Implementations must never run work registered with
/// [`schedule_after`](Scheduler::schedule_after) before every task the
/// token covers has completed.
pub trait Scheduler: Send + Sync + 'static {
    /// Opaque completion token.
    type Token: Clone + Send + Sync + 'static;

    /// Number of hardware worker threads. Thread-indexed streams allocate
    /// one lane per worker.
    fn worker_count(&self) -> usize;

    /// A token that is already complete.
    fn completed(&self) -> Self::Token;

    /// Run `work` once for every partition in `0..partitions`.
    fn run_parallel(&self, partitions: usize, work: ParallelWork) -> Self::Token;

    /// A token that completes once every token in `tokens` has completed.
    ///
    /// Combining an empty slice yields a completed token.
    fn combine(&self, tokens: &[Self::Token]) -> Self::Token;

    /// Run `work` once `after` has completed. Returns a token for `work`.
    fn schedule_after(&self, after: &Self::Token, work: Box<dyn FnOnce() + Send>)
        -> Self::Token;

    /// Block the calling thread until `token` has completed.
    ///
    /// Only used for synchronous drains at shutdown, never per tick.
    fn wait(&self, token: &Self::Token);
}
