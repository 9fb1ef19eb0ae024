//! A real worker-thread pool implementing [`Scheduler`].
//!
//! Jobs travel over an unbounded crossbeam channel to `N` named worker
//! threads. Tokens are countdown latches; `combine` and `schedule_after`
//! are continuations registered on latches, so nothing in the pool ever
//! polls. Only [`Scheduler::wait`] blocks.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use rill_core::{ParallelWork, Scheduler, TaskContext, WorkerId};

type Job = Box<dyn FnOnce(WorkerId) + Send>;
type Continuation = Box<dyn FnOnce() + Send>;

struct LatchState {
    pending: usize,
    continuations: Vec<Continuation>,
}

struct Latch {
    state: Mutex<LatchState>,
    done: Condvar,
}

impl Latch {
    fn new(pending: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LatchState {
                pending,
                continuations: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count_down(&self) {
        let ready = {
            let mut state = self.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.pending > 0 {
                return;
            }
            self.done.notify_all();
            std::mem::take(&mut state.continuations)
        };
        for continuation in ready {
            continuation();
        }
    }

    /// Run `f` once the latch opens; inline if it already has.
    fn on_complete(&self, f: Continuation) {
        let mut state = self.lock();
        if state.pending == 0 {
            drop(state);
            f();
        } else {
            state.continuations.push(f);
        }
    }

    fn wait(&self) {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self.done.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn is_open(&self) -> bool {
        self.lock().pending == 0
    }
}

/// Completion token of a [`PoolScheduler`].
#[derive(Clone)]
pub struct PoolToken(Arc<Latch>);

impl PoolToken {
    /// Whether the work behind this token has finished.
    pub fn is_complete(&self) -> bool {
        self.0.is_open()
    }
}

impl std::fmt::Debug for PoolToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolToken")
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn worker_loop(jobs: Receiver<Job>, worker: WorkerId) {
    while let Ok(job) = jobs.recv() {
        job(worker);
    }
    // Channel closed: the pool is shutting down.
}

/// Fixed-size worker pool.
///
/// Dropping the pool closes the job channel and joins the workers after
/// they finish queued jobs. Do not call [`Scheduler::wait`] from inside a
/// job: with every worker waiting, nothing is left to run the awaited work.
pub struct PoolScheduler {
    jobs: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl PoolScheduler {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..worker_count)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("rill-worker-{i}"))
                    .spawn(move || worker_loop(rx, WorkerId(i as u32)))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        Self { jobs: tx, workers }
    }

    fn submit(jobs: &Sender<Job>, job: Job) {
        // A disconnected channel means the pool is dropping; run inline.
        if let Err(crossbeam_channel::SendError(job)) = jobs.send(job) {
            job(WorkerId(0));
        }
    }
}

impl Scheduler for PoolScheduler {
    type Token = PoolToken;

    fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn completed(&self) -> PoolToken {
        PoolToken(Latch::new(0))
    }

    fn run_parallel(&self, partitions: usize, work: ParallelWork) -> PoolToken {
        let latch = Latch::new(partitions);
        let jobs = self.jobs.clone();
        for partition in 0..partitions {
            let work = Arc::clone(&work);
            let latch = Arc::clone(&latch);
            Self::submit(
                &jobs,
                Box::new(move |worker: WorkerId| {
                    work(TaskContext { partition, worker });
                    latch.count_down();
                }),
            );
        }
        PoolToken(latch)
    }

    fn combine(&self, tokens: &[PoolToken]) -> PoolToken {
        let latch = Latch::new(tokens.len());
        for token in tokens {
            let latch = Arc::clone(&latch);
            token.0.on_complete(Box::new(move || latch.count_down()));
        }
        PoolToken(latch)
    }

    fn schedule_after(&self, after: &PoolToken, work: Box<dyn FnOnce() + Send>) -> PoolToken {
        let latch = Latch::new(1);
        let done = Arc::clone(&latch);
        let jobs = self.jobs.clone();
        after.0.on_complete(Box::new(move || {
            Self::submit(
                &jobs,
                Box::new(move |_: WorkerId| {
                    work();
                    done.count_down();
                }),
            );
        }));
        PoolToken(latch)
    }

    fn wait(&self, token: &PoolToken) {
        token.0.wait();
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        // Swap in a dead sender so the workers see the channel close.
        let (dead, _) = crossbeam_channel::unbounded();
        drop(std::mem::replace(&mut self.jobs, dead));
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_parallel_covers_every_partition() {
        let pool = PoolScheduler::new(4);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let token = pool.run_parallel(
            64,
            Arc::new(move |ctx: TaskContext| {
                assert!(ctx.worker.index() < 4);
                h.fetch_add(ctx.partition + 1, Ordering::SeqCst);
            }),
        );
        pool.wait(&token);
        assert_eq!(hits.load(Ordering::SeqCst), (1..=64).sum::<usize>());
        assert!(token.is_complete());
    }

    #[test]
    fn schedule_after_runs_after_combined_tokens() {
        let pool = PoolScheduler::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        let tokens: Vec<PoolToken> = (0..3)
            .map(|_| {
                let c = Arc::clone(&count);
                pool.run_parallel(
                    8,
                    Arc::new(move |_: TaskContext| {
                        c.fetch_add(1, Ordering::SeqCst);
                    }),
                )
            })
            .collect();
        let all = pool.combine(&tokens);
        let observed = Arc::new(AtomicUsize::new(0));
        let (c, o) = (Arc::clone(&count), Arc::clone(&observed));
        let after = pool.schedule_after(
            &all,
            Box::new(move || o.store(c.load(Ordering::SeqCst), Ordering::SeqCst)),
        );
        pool.wait(&after);
        assert_eq!(observed.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn empty_combine_is_complete() {
        let pool = PoolScheduler::new(1);
        assert!(pool.combine(&[]).is_complete());
        assert!(pool.completed().is_complete());
        assert!(pool.run_parallel(0, Arc::new(|_: TaskContext| {})).is_complete());
    }
}
