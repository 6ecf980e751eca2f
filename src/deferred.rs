use std::ops::Deref;
use std::sync::{Mutex, OnceLock};

use crate::directory::ScopeDirectory;
use crate::error::SgError;
use crate::host::HostContext;
use crate::sync::lock;
use crate::task::TaskError;

type Init<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send>;

/// Value computed on first access and cached for every later access.
///
/// The initializer runs at most once. Concurrent first accesses wait for it.
/// A failed initialization is cached as well: every `get` after it returns
/// the same `DeferredInit` error.
pub struct Deferred<T> {
    init: Mutex<Option<Init<T>>>,
    value: OnceLock<Result<T, String>>,
}

impl<T> Deferred<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        Self {
            init: Mutex::new(Some(Box::new(f))),
            value: OnceLock::new(),
        }
    }

    /// A value that needs no initialization.
    pub fn ready(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(value));
        Self {
            init: Mutex::new(None),
            value: cell,
        }
    }

    /// Look up a value from the root context of `directory` on first access.
    ///
    /// `directory` is anything that derefs to the directory: an `Arc`, or the
    /// `&'static` reference from [`crate::holder::directory`].
    pub fn from_root<C, D, F>(directory: D, f: F) -> Self
    where
        C: HostContext,
        D: Deref<Target = ScopeDirectory<C>> + Send + 'static,
        F: FnOnce(&C) -> Result<T, TaskError> + Send + 'static,
    {
        Self::new(move || {
            let root = directory.get_root()?;
            f(&root)
        })
    }

    pub fn get(&self) -> Result<&T, SgError> {
        let outcome = self.value.get_or_init(|| {
            let init = lock(&self.init).take();
            match init {
                Some(init) => init().map_err(|e| e.to_string()),
                // Taken by an earlier attempt that panicked
                None => Err("initializer did not complete".to_string()),
            }
        });
        outcome
            .as_ref()
            .map_err(|message| SgError::DeferredInit(message.clone()))
    }

    /// True once initialization has finished, successfully or not.
    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("value", &self.value.get())
            .finish()
    }
}
