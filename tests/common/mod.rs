#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use scope_golem::{ContextHandle, Task};

/// Shared log of task runs, in the order they happened.
///
/// Each entry is `"{label}@{context name}"`.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task that appends `"{label}@{ctx}"` when it runs.
    pub fn task(&self, label: &str) -> Task<ContextHandle> {
        let entries = Arc::clone(&self.entries);
        let label = label.to_string();
        Task::named(&label.clone(), move |ctx: &ContextHandle| {
            entries.lock().unwrap().push(format!("{}@{}", label, ctx.name()));
            Ok(())
        })
    }

    /// A task that records itself, then fails.
    pub fn failing_task(&self, label: &str) -> Task<ContextHandle> {
        let entries = Arc::clone(&self.entries);
        let label = label.to_string();
        Task::named(&label.clone(), move |ctx: &ContextHandle| {
            entries.lock().unwrap().push(format!("{}@{}", label, ctx.name()));
            Err(format!("{} exploded", label).into())
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Labels only, dropping the context suffix.
    pub fn labels(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.split('@').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// A task that bumps `counter` every time it runs.
pub fn counting_task(counter: &Arc<AtomicUsize>) -> Task<ContextHandle> {
    let counter = Arc::clone(counter);
    Task::infallible(move |_: &ContextHandle| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Builds `root <- mid <- leaf` and returns all three.
pub fn three_level_tree() -> (ContextHandle, ContextHandle, ContextHandle) {
    let root = ContextHandle::root("root");
    let mid = root.child("mid");
    let leaf = mid.child("leaf");
    (root, mid, leaf)
}
