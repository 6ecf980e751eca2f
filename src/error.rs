use crate::task::{TaskError, TaskId};
use crate::types::Phase;

/// One task failure collected while a pass kept running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: TaskId,
    pub label: Option<String>,
    pub message: String,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({}): {}", self.task, label, self.message),
            None => write!(f, "{}: {}", self.task, self.message),
        }
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error enum for the scope registry.
///
/// Categories:
/// - Input: a required value was blank, nothing was mutated
/// - Hierarchy: the host's parent links could not produce a root
/// - Lifecycle: the scope is closed and can no longer reach a phase
/// - Task: caller code failed while a phase was being dispatched
/// - Setup: process-wide state was configured out of order
#[derive(Debug, thiserror::Error)]
pub enum SgError {
    // Input
    #[error("Missing required value: {0}")]
    NullHandle(&'static str),

    // Hierarchy
    #[error("Parent chain exceeded {limit} hops (walked {hops}); the host hierarchy is probably cyclic")]
    HierarchyCycle { hops: usize, limit: usize },

    #[error("No root scope resolved: no scope has been registered")]
    NoRootResolved,

    // Lifecycle
    #[error("Scope is closed and never reached {phase}; the task would never run")]
    ScopeClosed { phase: Phase },

    // Task
    #[error("Task {task} failed during {phase}: {source}")]
    TaskFailed {
        phase: Phase,
        task: TaskId,
        #[source]
        source: TaskError,
    },

    #[error("{} task(s) failed during {phase}: {}", .failures.len(), join_failures(.failures))]
    TasksFailed {
        phase: Phase,
        failures: Vec<TaskFailure>,
    },

    #[error("Deferred value failed to initialize: {0}")]
    DeferredInit(String),

    // Setup
    #[error("Scope directory is already initialized; configure it before first use")]
    AlreadyConfigured,
}

impl SgError {
    /// Returns true if the error was raised by caller task code.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, SgError::TaskFailed { .. } | SgError::TasksFailed { .. })
    }

    /// Returns true if the error comes from walking the host hierarchy.
    pub fn is_hierarchy_error(&self) -> bool {
        matches!(
            self,
            SgError::HierarchyCycle { .. } | SgError::NoRootResolved
        )
    }

    /// Phase the error concerns, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SgError::TaskFailed { phase, .. }
            | SgError::TasksFailed { phase, .. }
            | SgError::ScopeClosed { phase } => Some(*phase),
            _ => None,
        }
    }
}

/// Bridge for the config and CLI layers, which report errors as strings.
impl From<SgError> for String {
    fn from(err: SgError) -> String {
        err.to_string()
    }
}
