pub mod config;
pub mod deferred;
pub mod directory;
pub mod error;
pub mod holder;
pub mod host;
pub mod log;
pub mod registry;
pub mod scenario;
pub mod scope;
pub mod subset;
mod sync;
pub mod task;
pub mod types;

pub use deferred::Deferred;
pub use directory::{ScopeDirectory, ScopeInfo};
pub use error::SgError;
pub use host::{ContextHandle, HostContext};
pub use registry::TaskRegistry;
pub use scope::Scope;
pub use task::{Task, TaskError, TaskId};
pub use types::Phase;
