use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::error::{SgError, TaskFailure};
use crate::host::HostContext;
use crate::sync::{lock, read, write};
use crate::task::{Task, TaskId};
use crate::types::{FailurePolicy, Phase};
use crate::{log_debug, log_warn};

/// Collects task failures for one pass according to the failure policy.
struct Pass {
    phase: Phase,
    policy: FailurePolicy,
    failures: Vec<TaskFailure>,
}

impl Pass {
    fn new(phase: Phase, policy: FailurePolicy) -> Self {
        Self {
            phase,
            policy,
            failures: Vec::new(),
        }
    }

    /// Runs one already-claimed task. Returns `Err` only when the pass must stop.
    fn run<C: HostContext>(&mut self, task: &Task<C>, ctx: &C) -> Result<(), SgError> {
        let Err(source) = task.invoke(ctx) else {
            return Ok(());
        };
        match self.policy {
            FailurePolicy::Abort => Err(SgError::TaskFailed {
                phase: self.phase,
                task: task.id(),
                source,
            }),
            FailurePolicy::Isolate => {
                log_warn!(
                    "{} failed during {} for {:?}: {}",
                    task.display_name(),
                    self.phase,
                    ctx,
                    source
                );
                self.failures.push(TaskFailure {
                    task: task.id(),
                    label: task.label().map(str::to_string),
                    message: source.to_string(),
                });
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<(), SgError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(SgError::TasksFailed {
                phase: self.phase,
                failures: self.failures,
            })
        }
    }
}

struct PendingQueue<C> {
    order: VecDeque<Task<C>>,
    queued: HashSet<TaskId>,
}

/// Bookkeeping for one phase of one scope.
///
/// `occurred` flips to true exactly once. Tasks registered before that wait
/// in `pending`; tasks registered afterwards run immediately on the caller's
/// thread. Every invocation is preceded by an exclusive claim in `executed`,
/// so a task races between `fire` and a late `register` at most once.
pub struct PhaseSubset<C> {
    phase: Phase,
    policy: FailurePolicy,
    occurred: AtomicBool,
    pending: Mutex<PendingQueue<C>>,
    executed: Mutex<HashSet<TaskId>>,
}

impl<C: HostContext> PhaseSubset<C> {
    pub fn new(phase: Phase, policy: FailurePolicy) -> Self {
        Self {
            phase,
            policy,
            occurred: AtomicBool::new(false),
            pending: Mutex::new(PendingQueue {
                order: VecDeque::new(),
                queued: HashSet::new(),
            }),
            executed: Mutex::new(HashSet::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_occurred(&self) -> bool {
        self.occurred.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).order.len()
    }

    /// Number of tasks that have been claimed for execution. Never decreases.
    pub fn executed_count(&self) -> usize {
        lock(&self.executed).len()
    }

    /// Queue `task`, or run it now on this thread if the phase already fired.
    ///
    /// `ctx` is the scope's host context, passed to the task when it runs.
    pub fn register(&self, task: Task<C>, ctx: &C) -> Result<(), SgError> {
        if self.has_occurred() {
            return self.run_late(task, ctx);
        }

        let task_id = task.id();
        {
            let mut pending = lock(&self.pending);
            if pending.queued.insert(task_id) {
                pending.order.push_back(task);
            }
        }

        // fire() may have flipped the flag and finished draining between the
        // check above and the push. Take back only this task; every other
        // queued task belongs to the firing pass.
        if self.has_occurred() {
            if let Some(task) = self.unqueue(task_id) {
                return self.run_late(task, ctx);
            }
        }
        Ok(())
    }

    /// Mark the phase as occurred and run every queued task in order.
    ///
    /// Returns `Ok(false)` without running anything when the phase had
    /// already fired.
    pub fn fire(&self, ctx: &C) -> Result<bool, SgError> {
        if self
            .occurred
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        log_debug!(
            "Firing {} for {:?} ({} pending)",
            self.phase,
            ctx,
            self.pending_len()
        );
        self.drain(ctx)?;
        Ok(true)
    }

    /// Drop every queued task without running it. Returns how many were
    /// dropped.
    pub fn discard_pending(&self) -> usize {
        let mut pending = lock(&self.pending);
        pending.queued.clear();
        let dropped = pending.order.len();
        pending.order.clear();
        dropped
    }

    fn claim(&self, id: TaskId) -> bool {
        lock(&self.executed).insert(id)
    }

    fn pop(&self) -> Option<Task<C>> {
        let mut pending = lock(&self.pending);
        let task = pending.order.pop_front()?;
        pending.queued.remove(&task.id());
        Some(task)
    }

    fn unqueue(&self, id: TaskId) -> Option<Task<C>> {
        let mut pending = lock(&self.pending);
        if !pending.queued.remove(&id) {
            return None;
        }
        let index = pending.order.iter().position(|task| task.id() == id)?;
        pending.order.remove(index)
    }

    fn drain(&self, ctx: &C) -> Result<(), SgError> {
        let mut pass = Pass::new(self.phase, self.policy);
        while let Some(task) = self.pop() {
            if self.claim(task.id()) {
                pass.run(&task, ctx)?;
            }
        }
        pass.finish()
    }

    fn run_late(&self, task: Task<C>, ctx: &C) -> Result<(), SgError> {
        if !self.claim(task.id()) {
            return Ok(());
        }
        log_debug!(
            "{} already fired for {:?}; running {} immediately",
            self.phase,
            ctx,
            task.display_name()
        );
        let mut pass = Pass::new(self.phase, self.policy);
        pass.run(&task, ctx)?;
        pass.finish()
    }
}

/// One phase of the registry shared by every scope.
///
/// Unlike [`PhaseSubset`], tasks are kept after firing because each scope
/// that reaches the phase runs them. Claims are tracked per scope: a task
/// runs at most once for every (scope, phase).
pub struct BroadcastSubset<C> {
    phase: Phase,
    policy: FailurePolicy,
    occurred: AtomicBool,
    tasks: RwLock<Vec<Task<C>>>,
    claims: Mutex<HashMap<C, HashSet<TaskId>>>,
}

impl<C: HostContext> BroadcastSubset<C> {
    pub fn new(phase: Phase, policy: FailurePolicy) -> Self {
        Self {
            phase,
            policy,
            occurred: AtomicBool::new(false),
            tasks: RwLock::new(Vec::new()),
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True once any scope has fired this phase.
    pub fn has_occurred(&self) -> bool {
        self.occurred.load(Ordering::SeqCst)
    }

    /// True when `ctx` has fired this phase and has not been forgotten.
    pub fn has_fired_for(&self, ctx: &C) -> bool {
        lock(&self.claims).contains_key(ctx)
    }

    pub fn task_count(&self) -> usize {
        read(&self.tasks).len()
    }

    /// Total (scope, task) executions claimed across scopes that have not
    /// been forgotten. Unlike [`PhaseSubset::executed_count`] this shrinks
    /// when [`Self::forget`] drops a scope.
    pub fn executed_count(&self) -> usize {
        lock(&self.claims).values().map(HashSet::len).sum()
    }

    /// Keep `task` for every future scope, and run it now for each scope that
    /// has already fired this phase.
    pub fn register(&self, task: Task<C>) -> Result<(), SgError> {
        {
            let mut tasks = write(&self.tasks);
            if !tasks.iter().any(|t| t.id() == task.id()) {
                tasks.push(task.clone());
            }
        }

        let fired: Vec<C> = lock(&self.claims).keys().cloned().collect();
        if fired.is_empty() {
            return Ok(());
        }

        let mut pass = Pass::new(self.phase, self.policy);
        for ctx in &fired {
            if self.claim(ctx, task.id()) {
                log_debug!(
                    "{} already fired for {:?}; running shared {} immediately",
                    self.phase,
                    ctx,
                    task.display_name()
                );
                pass.run(&task, ctx)?;
            }
        }
        pass.finish()
    }

    /// Run every shared task once for `ctx`. Returns `Ok(false)` if this
    /// phase was already fired for `ctx`.
    pub fn fire(&self, ctx: &C) -> Result<bool, SgError> {
        {
            let mut claims = lock(&self.claims);
            if claims.contains_key(ctx) {
                return Ok(false);
            }
            claims.insert(ctx.clone(), HashSet::new());
        }
        self.occurred.store(true, Ordering::SeqCst);

        let snapshot: Vec<Task<C>> = read(&self.tasks).clone();
        log_debug!(
            "Firing shared {} for {:?} ({} tasks)",
            self.phase,
            ctx,
            snapshot.len()
        );

        let mut pass = Pass::new(self.phase, self.policy);
        for task in &snapshot {
            if self.claim(ctx, task.id()) {
                pass.run(task, ctx)?;
            }
        }
        pass.finish()?;
        Ok(true)
    }

    /// Drop the claims held for `ctx`. Later late registrations skip it.
    pub fn forget(&self, ctx: &C) {
        lock(&self.claims).remove(ctx);
    }

    fn claim(&self, ctx: &C, id: TaskId) -> bool {
        match lock(&self.claims).get_mut(ctx) {
            Some(claimed) => claimed.insert(id),
            None => false,
        }
    }
}
