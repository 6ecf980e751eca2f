use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error type a task may return. Boxed so task bodies can use `?` freely.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

type TaskFn<C> = dyn Fn(&C) -> Result<(), TaskError> + Send + Sync;

/// Process-unique identity of a task. Clones of a [`Task`] share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Callback registered against a phase, receiving the scope's host context.
///
/// A task runs at most once per (scope, phase). Registering the same task
/// (or a clone of it) several times never makes it run more than once.
///
/// Tasks run synchronously on whichever thread triggers them: the host's
/// dispatch thread when a phase fires, or the registering thread when the
/// phase has already fired. A task that never returns blocks that thread;
/// the registry has no timeouts.
pub struct Task<C> {
    id: TaskId,
    label: Option<Arc<str>>,
    run: Arc<TaskFn<C>>,
}

impl<C> Task<C> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&C) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            id: TaskId::next(),
            label: None,
            run: Arc::new(f),
        }
    }

    /// Like [`Task::new`], with a label that shows up in logs and errors.
    pub fn named<F>(label: &str, f: F) -> Self
    where
        F: Fn(&C) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            label: Some(Arc::from(label)),
            ..Self::new(f)
        }
    }

    /// Wrap a callback that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        Self::new(move |ctx| {
            f(ctx);
            Ok(())
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn invoke(&self, ctx: &C) -> Result<(), TaskError> {
        (self.run)(ctx)
    }

    /// Label for log lines: the given label or the id.
    pub(crate) fn display_name(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", self.id, label),
            None => self.id.to_string(),
        }
    }
}

impl<C> Clone for Task<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<C> std::fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}
