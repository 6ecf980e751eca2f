use crate::error::SgError;
use crate::host::HostContext;
use crate::subset::{BroadcastSubset, PhaseSubset};
use crate::task::Task;
use crate::types::{FailurePolicy, Phase};

/// Per-phase task tables, either bound to one scope or shared by all scopes.
///
/// Phases never interact: every operation delegates to the table of the
/// phase it names.
pub enum TaskRegistry<C> {
    /// Tasks for a single scope. Each phase fires once and drains its queue.
    Scoped {
        handle: C,
        phases: [PhaseSubset<C>; 4],
    },
    /// Tasks for every scope. Each phase fires once per scope.
    Global { phases: [BroadcastSubset<C>; 4] },
}

impl<C: HostContext> TaskRegistry<C> {
    pub fn scoped(handle: C, policy: FailurePolicy) -> Self {
        TaskRegistry::Scoped {
            handle,
            phases: Phase::ALL.map(|phase| PhaseSubset::new(phase, policy)),
        }
    }

    pub fn global(policy: FailurePolicy) -> Self {
        TaskRegistry::Global {
            phases: Phase::ALL.map(|phase| BroadcastSubset::new(phase, policy)),
        }
    }

    /// Context this registry is bound to, or `None` for the shared registry.
    pub fn bound_handle(&self) -> Option<&C> {
        match self {
            TaskRegistry::Scoped { handle, .. } => Some(handle),
            TaskRegistry::Global { .. } => None,
        }
    }

    pub fn register_task(&self, phase: Phase, task: Task<C>) -> Result<(), SgError> {
        match self {
            TaskRegistry::Scoped { handle, phases } => phases[phase.index()].register(task, handle),
            TaskRegistry::Global { phases } => phases[phase.index()].register(task),
        }
    }

    /// Fire `phase`, passing `ctx` to the tasks.
    ///
    /// For a scoped registry `ctx` is ignored in favour of the bound handle.
    /// Returns whether this call did the firing (false if it already had).
    pub fn fire_phase(&self, phase: Phase, ctx: &C) -> Result<bool, SgError> {
        match self {
            TaskRegistry::Scoped { handle, phases } => phases[phase.index()].fire(handle),
            TaskRegistry::Global { phases } => phases[phase.index()].fire(ctx),
        }
    }

    /// For the shared registry, true once any scope fired `phase`.
    pub fn has_occurred(&self, phase: Phase) -> bool {
        match self {
            TaskRegistry::Scoped { phases, .. } => phases[phase.index()].has_occurred(),
            TaskRegistry::Global { phases } => phases[phase.index()].has_occurred(),
        }
    }

    /// Queued tasks for a scoped registry; retained tasks for the shared one.
    pub fn pending_len(&self, phase: Phase) -> usize {
        match self {
            TaskRegistry::Scoped { phases, .. } => phases[phase.index()].pending_len(),
            TaskRegistry::Global { phases } => phases[phase.index()].task_count(),
        }
    }

    /// Tasks claimed for `phase`. Never decreases for a scoped registry; the
    /// global count is summed over live scopes and drops on [`Self::forget_scope`].
    pub fn executed_count(&self, phase: Phase) -> usize {
        match self {
            TaskRegistry::Scoped { phases, .. } => phases[phase.index()].executed_count(),
            TaskRegistry::Global { phases } => phases[phase.index()].executed_count(),
        }
    }

    /// Drop queued tasks that will never run. The shared registry keeps its
    /// tasks for other scopes, so this only affects a scoped registry.
    pub fn discard_pending(&self) -> usize {
        match self {
            TaskRegistry::Scoped { phases, .. } => {
                phases.iter().map(PhaseSubset::discard_pending).sum()
            }
            TaskRegistry::Global { .. } => 0,
        }
    }

    /// Release every per-scope claim the shared registry holds for `ctx`.
    pub fn forget_scope(&self, ctx: &C) {
        if let TaskRegistry::Global { phases } = self {
            for subset in phases {
                subset.forget(ctx);
            }
        }
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for TaskRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRegistry::Scoped { handle, .. } => {
                f.debug_struct("TaskRegistry::Scoped").field("handle", handle).finish()
            }
            TaskRegistry::Global { .. } => f.debug_struct("TaskRegistry::Global").finish(),
        }
    }
}
