//! Process-wide scope directory over [`ContextHandle`].
//!
//! The directory lives for the whole process. Hosts call [`register`] when a
//! context becomes available and [`notify`] for each lifecycle transition;
//! everything else may call the `on_*` functions from any thread.

use std::sync::OnceLock;

use crate::config::DirectoryConfig;
use crate::deferred::Deferred;
use crate::directory::ScopeDirectory;
use crate::error::SgError;
use crate::host::ContextHandle;
use crate::task::{Task, TaskError};
use crate::types::Phase;

static DIRECTORY: OnceLock<ScopeDirectory<ContextHandle>> = OnceLock::new();

/// The process-wide directory, created with default settings on first use
/// unless [`configure`] ran before.
pub fn directory() -> &'static ScopeDirectory<ContextHandle> {
    DIRECTORY.get_or_init(ScopeDirectory::new)
}

/// Install settings for the process-wide directory. Must run before
/// anything touches [`directory`].
pub fn configure(config: DirectoryConfig) -> Result<(), SgError> {
    DIRECTORY
        .set(ScopeDirectory::with_config(config))
        .map_err(|_| SgError::AlreadyConfigured)
}

pub fn register(ctx: &ContextHandle) {
    directory().register_scope(ctx);
}

pub fn notify(ctx: &ContextHandle, phase: Phase) -> Result<(), SgError> {
    directory().on_phase(ctx, phase)
}

pub fn root() -> Option<ContextHandle> {
    directory().root()
}

pub fn scopes() -> Vec<ContextHandle> {
    directory().scopes()
}

pub fn is_occurred(phase: Phase) -> bool {
    directory().is_occurred(phase)
}

pub fn is_occurred_in(ctx: &ContextHandle, phase: Phase) -> bool {
    directory().is_occurred_in(ctx, phase)
}

/// Value looked up from the root context the first time it is needed.
pub fn deferred<T, F>(f: F) -> Deferred<T>
where
    F: FnOnce(&ContextHandle) -> Result<T, TaskError> + Send + 'static,
{
    Deferred::from_root(directory(), f)
}

pub fn on_refresh(task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_refresh(task)
}

pub fn on_start(task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_start(task)
}

pub fn on_stop(task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_stop(task)
}

pub fn on_close(task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_close(task)
}

pub fn on_refresh_in(ctx: &ContextHandle, task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_refresh_in(ctx, task)
}

pub fn on_start_in(ctx: &ContextHandle, task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_start_in(ctx, task)
}

pub fn on_stop_in(ctx: &ContextHandle, task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_stop_in(ctx, task)
}

pub fn on_close_in(ctx: &ContextHandle, task: Task<ContextHandle>) -> Result<(), SgError> {
    directory().on_close_in(ctx, task)
}
