//! A deterministic scheduler whose tasks complete on demand.
//!
//! Tokens are sets of task ids and [`combine`](Scheduler::combine) is set
//! union, so tests can assert exactly which work a teardown was ordered
//! after. Work registered with `run_parallel` or [`ManualScheduler::pending`]
//! stays pending until the test calls [`ManualScheduler::complete`];
//! continuations from `schedule_after` run on the calling thread as soon as
//! everything they wait for has completed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rill_core::{ParallelWork, Scheduler, TaskContext, TaskId, WorkerId};

/// Completion token of a [`ManualScheduler`]: the tasks it waits for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManualToken(Arc<BTreeSet<TaskId>>);

impl ManualToken {
    fn single(id: TaskId) -> Self {
        Self(Arc::new(BTreeSet::from([id])))
    }

    /// Task ids this token directly waits for.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.0.contains(&id)
    }

    /// Whether the token waits for nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

enum Work {
    Marker,
    Parallel {
        partitions: usize,
        work: ParallelWork,
    },
    After(Box<dyn FnOnce() + Send>),
}

struct Task {
    deps: ManualToken,
    work: Option<Work>,
    done: bool,
    continuation: bool,
}

#[derive(Default)]
struct State {
    next: u64,
    tasks: BTreeMap<TaskId, Task>,
}

impl State {
    fn insert(&mut self, deps: ManualToken, work: Work, continuation: bool) -> TaskId {
        let id = TaskId(self.next);
        self.next += 1;
        self.tasks.insert(
            id,
            Task {
                deps,
                work: Some(work),
                done: false,
                continuation,
            },
        );
        id
    }

    fn is_done(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_none_or(|t| t.done)
    }

    fn closure(&self, token: &ManualToken) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<TaskId> = token.tasks().collect();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                if let Some(task) = self.tasks.get(&id) {
                    stack.extend(task.deps.tasks());
                }
            }
        }
        seen
    }
}

/// Scheduler for deterministic tests.
pub struct ManualScheduler {
    workers: usize,
    state: Mutex<State>,
}

impl ManualScheduler {
    /// A scheduler that reports `workers` hardware threads.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A fresh task with no work that completes when the test says so.
    ///
    /// Stands in for a producer or consumer job in container tests.
    pub fn pending(&self) -> ManualToken {
        let id = self.state().insert(ManualToken::default(), Work::Marker, false);
        ManualToken::single(id)
    }

    /// Complete every task `token` waits for, directly or transitively,
    /// running its work. Continuations that become ready run afterwards.
    pub fn complete(&self, token: &ManualToken) {
        let ready: Vec<Work> = {
            let mut state = self.state();
            let closure = state.closure(token);
            closure
                .into_iter()
                .filter_map(|id| {
                    let task = state.tasks.get_mut(&id)?;
                    if task.done || task.continuation {
                        return None;
                    }
                    task.done = true;
                    task.work.take()
                })
                .collect()
        };
        for work in ready {
            self.run(work);
        }
        self.settle();
    }

    /// Complete every task registered so far.
    pub fn complete_all(&self) {
        let all = {
            let state = self.state();
            ManualToken(Arc::new(state.tasks.keys().copied().collect()))
        };
        self.complete(&all);
    }

    /// Whether every task `token` waits for has completed.
    pub fn is_complete(&self, token: &ManualToken) -> bool {
        let state = self.state();
        token.tasks().all(|id| state.is_done(id))
    }

    /// Every task `token` is ordered after, including its own.
    pub fn dependencies(&self, token: &ManualToken) -> BTreeSet<TaskId> {
        self.state().closure(token)
    }

    /// Whether `token` cannot complete before everything `other` waits for.
    pub fn covers(&self, token: &ManualToken, other: &ManualToken) -> bool {
        let closure = self.dependencies(token);
        other.tasks().all(|id| closure.contains(&id))
    }

    /// Tasks not yet completed.
    pub fn pending_count(&self) -> usize {
        self.state().tasks.values().filter(|t| !t.done).count()
    }

    fn run(&self, work: Work) {
        match work {
            Work::Marker => {}
            Work::Parallel { partitions, work } => {
                for partition in 0..partitions {
                    work(TaskContext {
                        partition,
                        worker: WorkerId((partition % self.workers) as u32),
                    });
                }
            }
            Work::After(work) => work(),
        }
    }

    /// Run continuations whose dependencies have all completed.
    fn settle(&self) {
        loop {
            let next = {
                let mut state = self.state();
                let ready = state
                    .tasks
                    .iter()
                    .find(|(_, t)| {
                        t.continuation && !t.done && t.deps.tasks().all(|d| state.is_done(d))
                    })
                    .map(|(id, _)| *id);
                ready.and_then(|id| {
                    let task = state.tasks.get_mut(&id)?;
                    task.done = true;
                    task.work.take()
                })
            };
            match next {
                Some(work) => self.run(work),
                None => break,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    type Token = ManualToken;

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn completed(&self) -> ManualToken {
        ManualToken::default()
    }

    fn run_parallel(&self, partitions: usize, work: ParallelWork) -> ManualToken {
        let id = self.state().insert(
            ManualToken::default(),
            Work::Parallel { partitions, work },
            false,
        );
        ManualToken::single(id)
    }

    fn combine(&self, tokens: &[ManualToken]) -> ManualToken {
        let union: BTreeSet<TaskId> = tokens.iter().flat_map(|t| t.tasks()).collect();
        ManualToken(Arc::new(union))
    }

    fn schedule_after(&self, after: &ManualToken, work: Box<dyn FnOnce() + Send>) -> ManualToken {
        let id = self.state().insert(after.clone(), Work::After(work), true);
        self.settle();
        ManualToken::single(id)
    }

    /// Drives `token` to completion on the calling thread.
    fn wait(&self, token: &ManualToken) {
        self.complete(token);
    }
}
