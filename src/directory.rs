use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::DirectoryConfig;
use crate::error::SgError;
use crate::host::HostContext;
use crate::registry::TaskRegistry;
use crate::scope::Scope;
use crate::task::Task;
use crate::types::{FailurePolicy, Phase};
use crate::{log_debug, log_warn};

/// Point-in-time view of one known scope.
#[derive(Debug, Clone)]
pub struct ScopeInfo<C> {
    pub handle: C,
    /// Hops to the top of the hierarchy; `None` if the walk hit the bound.
    pub depth: Option<usize>,
    pub registered_at: DateTime<Utc>,
    pub fired: Vec<Phase>,
}

/// Every scope known to the process, plus the registry shared by all scopes.
///
/// Scopes are created on first touch and evicted after their close phase
/// (see [`DirectoryConfig::evict_on_close`]). Phase notifications run the
/// scope's own tasks to completion before the shared tasks.
///
/// An evicted scope leaves a closed record behind: its queues are emptied,
/// but its fired phases and executed task ids stay, so late registrations
/// against the closed handle still run at most once.
pub struct ScopeDirectory<C: HostContext> {
    scopes: DashMap<C, Arc<Scope<C>>>,
    closed: DashMap<C, Arc<Scope<C>>>,
    global: TaskRegistry<C>,
    next_sequence: AtomicU64,
    config: DirectoryConfig,
}

impl<C: HostContext> Default for ScopeDirectory<C> {
    fn default() -> Self {
        Self::with_config(DirectoryConfig::default())
    }
}

impl<C: HostContext> std::fmt::Debug for ScopeDirectory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeDirectory")
            .field("scopes", &self.scopes.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<C: HostContext> ScopeDirectory<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DirectoryConfig) -> Self {
        Self {
            scopes: DashMap::new(),
            closed: DashMap::new(),
            global: TaskRegistry::global(config.failure_policy),
            next_sequence: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Registry shared by every scope.
    pub fn global(&self) -> &TaskRegistry<C> {
        &self.global
    }

    // --- Scope lookup ---

    /// Returns the scope for `handle`, creating it on first touch. Concurrent
    /// first touches of one handle all get the same scope.
    pub fn resolve_scope(&self, handle: &C) -> Arc<Scope<C>> {
        let entry = self
            .scopes
            .entry(handle.clone())
            .or_insert_with(|| self.new_scope(handle));
        Arc::clone(entry.value())
    }

    /// Host hook for a newly available context. Like [`Self::resolve_scope`],
    /// and also reopens a handle that was closed before.
    pub fn register_scope(&self, handle: &C) -> Arc<Scope<C>> {
        if self.closed.remove(handle).is_some() {
            log_debug!("Reopened closed scope {:?}", handle);
        }
        self.resolve_scope(handle)
    }

    fn new_scope(&self, handle: &C) -> Arc<Scope<C>> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        log_debug!("Registered scope {:?} (#{})", handle, sequence);
        Arc::new(Scope::new(
            handle.clone(),
            sequence,
            self.config.failure_policy,
        ))
    }

    /// The live scope for `handle`, or its closed record. A handle that is
    /// neither gets a new scope. The check runs under the map entry lock, so
    /// it cannot interleave with an eviction of the same handle.
    fn scope_or_closed(&self, handle: &C) -> (Arc<Scope<C>>, bool) {
        match self.scopes.entry(handle.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => match self.closed.get(handle) {
                Some(closed) => (Arc::clone(closed.value()), true),
                None => (Arc::clone(entry.insert(self.new_scope(handle)).value()), false),
            },
        }
    }

    /// True if `handle` was closed and evicted, and not registered again.
    pub fn is_closed(&self, handle: &C) -> bool {
        self.closed.contains_key(handle)
    }

    /// Forget the closed record of a handle the host will never use again.
    /// Later registrations for it start a fresh scope.
    pub fn release_closed(&self, handle: &C) -> bool {
        self.closed.remove(handle).is_some()
    }

    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    /// Returns the scope for `handle` without creating it.
    pub fn lookup(&self, handle: &C) -> Option<Arc<Scope<C>>> {
        self.scopes.get(handle).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, handle: &C) -> bool {
        self.scopes.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    fn sorted_scopes(&self) -> Vec<Arc<Scope<C>>> {
        let mut scopes: Vec<Arc<Scope<C>>> = self
            .scopes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        scopes.sort_by_key(|scope| scope.sequence());
        scopes
    }

    /// Every known scope, in registration order.
    pub fn scopes(&self) -> Vec<C> {
        self.sorted_scopes()
            .iter()
            .map(|scope| scope.handle().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<ScopeInfo<C>> {
        self.sorted_scopes()
            .iter()
            .map(|scope| ScopeInfo {
                handle: scope.handle().clone(),
                depth: scope.depth(self.config.max_hierarchy_depth).ok(),
                registered_at: scope.registered_at(),
                fired: scope.fired_phases(),
            })
            .collect()
    }

    // --- Host notifications ---

    /// Dispatch a phase the host reported for `handle`.
    ///
    /// Runs the scope's own tasks, then the shared tasks for that scope.
    /// Under `FailurePolicy::Abort` a failing scope task skips the shared
    /// pass. A close notification evicts the scope afterwards, even when a
    /// task failed. Notifications for a closed handle are ignored until the
    /// host registers it again.
    pub fn on_phase(&self, handle: &C, phase: Phase) -> Result<(), SgError> {
        let (scope, closed) = self.scope_or_closed(handle);
        if closed {
            log_warn!("Ignoring {} for closed scope {:?}", phase, handle);
            return Ok(());
        }

        let local = scope.tasks().fire_phase(phase, handle);
        let shared = match (&local, self.config.failure_policy) {
            (Err(_), FailurePolicy::Abort) => Ok(false),
            _ => self.global.fire_phase(phase, handle),
        };

        if phase == Phase::Close && self.config.evict_on_close {
            self.evict(handle, &scope);
        }

        merge_results(local, shared)
    }

    fn evict(&self, handle: &C, scope: &Arc<Scope<C>>) {
        // Record first: a registration that finds the live entry gone must
        // find the closed record.
        self.closed.insert(handle.clone(), Arc::clone(scope));
        if self.scopes.remove(handle).is_some() {
            let dropped = scope.tasks().discard_pending();
            log_debug!(
                "Evicted closed scope {:?} ({} never-run tasks dropped)",
                handle,
                dropped
            );
        }
        self.global.forget_scope(handle);
    }

    // --- Task registration ---

    /// Register a task for `phase` in every scope.
    pub fn add_task(&self, phase: Phase, task: Task<C>) -> Result<(), SgError> {
        self.global.register_task(phase, task)
    }

    /// Register a task for `phase` in the scope of `handle`.
    ///
    /// For a closed handle the task runs now if the scope reached `phase`
    /// before closing, and fails with `ScopeClosed` otherwise.
    pub fn add_task_in(&self, handle: &C, phase: Phase, task: Task<C>) -> Result<(), SgError> {
        let (scope, closed) = self.scope_or_closed(handle);
        if closed && !scope.has_occurred(phase) {
            return Err(SgError::ScopeClosed { phase });
        }
        scope.tasks().register_task(phase, task)
    }

    pub fn on_refresh(&self, task: Task<C>) -> Result<(), SgError> {
        self.add_task(Phase::Refresh, task)
    }

    pub fn on_start(&self, task: Task<C>) -> Result<(), SgError> {
        self.add_task(Phase::Start, task)
    }

    pub fn on_stop(&self, task: Task<C>) -> Result<(), SgError> {
        self.add_task(Phase::Stop, task)
    }

    pub fn on_close(&self, task: Task<C>) -> Result<(), SgError> {
        self.add_task(Phase::Close, task)
    }

    pub fn on_refresh_in(&self, handle: &C, task: Task<C>) -> Result<(), SgError> {
        self.add_task_in(handle, Phase::Refresh, task)
    }

    pub fn on_start_in(&self, handle: &C, task: Task<C>) -> Result<(), SgError> {
        self.add_task_in(handle, Phase::Start, task)
    }

    pub fn on_stop_in(&self, handle: &C, task: Task<C>) -> Result<(), SgError> {
        self.add_task_in(handle, Phase::Stop, task)
    }

    pub fn on_close_in(&self, handle: &C, task: Task<C>) -> Result<(), SgError> {
        self.add_task_in(handle, Phase::Close, task)
    }

    // --- Queries ---

    /// True once any scope has fired `phase`.
    pub fn is_occurred(&self, phase: Phase) -> bool {
        self.global.has_occurred(phase)
    }

    /// True if the scope of `handle` has fired `phase`, including scopes that
    /// have since closed. Unknown handles report false and are not
    /// registered by this call.
    pub fn is_occurred_in(&self, handle: &C, phase: Phase) -> bool {
        self.lookup(handle)
            .or_else(|| self.closed.get(handle).map(|entry| Arc::clone(entry.value())))
            .map(|scope| scope.has_occurred(phase))
            .unwrap_or(false)
    }

    /// Resolve the top of the scope hierarchy.
    ///
    /// The scope with the longest parent chain decides: its walk passes
    /// through every level, so its top is the shared root. Equal depths keep
    /// the scope registered first.
    pub fn get_root(&self) -> Result<C, SgError> {
        let mut best: Option<(usize, C)> = None;
        for scope in self.sorted_scopes() {
            let (depth, ancestor) = scope.ancestor_chain(self.config.max_hierarchy_depth)?;
            let deeper = best.as_ref().map_or(true, |(max, _)| depth > *max);
            if deeper {
                best = Some((depth, ancestor));
            }
        }
        best.map(|(_, root)| root).ok_or(SgError::NoRootResolved)
    }

    /// [`Self::get_root`], treating every error as "no root".
    pub fn root(&self) -> Option<C> {
        self.get_root().ok()
    }
}

/// Combine the scope-local and shared pass outcomes. Aggregated failures
/// from both passes are concatenated; otherwise the first error wins.
fn merge_results(
    local: Result<bool, SgError>,
    shared: Result<bool, SgError>,
) -> Result<(), SgError> {
    match (local, shared) {
        (Ok(_), Ok(_)) => Ok(()),
        (
            Err(SgError::TasksFailed {
                phase,
                mut failures,
            }),
            Err(SgError::TasksFailed {
                failures: shared_failures,
                ..
            }),
        ) => {
            failures.extend(shared_failures);
            Err(SgError::TasksFailed { phase, failures })
        }
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}
