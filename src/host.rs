use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::SgError;
use crate::sync::{read, write};

/// Boundary to the hosting container.
///
/// A value of this type identifies one managed scope: two scopes are the
/// same scope iff their contexts compare equal. `parent` exposes the host's
/// hierarchy and is consulted every time the root is resolved, so it may
/// change while the host is still wiring itself up.
pub trait HostContext: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static {
    fn parent(&self) -> Option<Self>;
}

struct ContextNode {
    id: u64,
    name: String,
    parent: RwLock<Option<ContextHandle>>,
}

/// Cheaply clonable host context with a re-pointable parent link.
///
/// Identity is a process-unique id assigned at creation, so two handles
/// with the same name are still different scopes.
#[derive(Clone)]
pub struct ContextHandle {
    node: Arc<ContextNode>,
}

impl ContextHandle {
    fn create(name: &str, parent: Option<ContextHandle>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            node: Arc::new(ContextNode {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                parent: RwLock::new(parent),
            }),
        }
    }

    /// A context with no parent.
    pub fn root(name: &str) -> Self {
        Self::create(name, None)
    }

    /// A context whose parent is `self`.
    pub fn child(&self, name: &str) -> Self {
        Self::create(name, Some(self.clone()))
    }

    /// Like [`ContextHandle::root`], rejecting a blank name.
    pub fn try_root(name: &str) -> Result<Self, SgError> {
        if name.trim().is_empty() {
            return Err(SgError::NullHandle("context name"));
        }
        Ok(Self::root(name))
    }

    /// Like [`ContextHandle::child`], rejecting a blank name.
    pub fn try_child(&self, name: &str) -> Result<Self, SgError> {
        if name.trim().is_empty() {
            return Err(SgError::NullHandle("context name"));
        }
        Ok(self.child(name))
    }

    pub fn id(&self) -> u64 {
        self.node.id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Re-point this context at a new parent.
    pub fn set_parent(&self, parent: &ContextHandle) {
        *write(&self.node.parent) = Some(parent.clone());
    }

    /// Remove the parent link, making this context a root.
    pub fn detach(&self) {
        *write(&self.node.parent) = None;
    }
}

impl HostContext for ContextHandle {
    fn parent(&self) -> Option<Self> {
        read(&self.node.parent).clone()
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for ContextHandle {}

impl Hash for ContextHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.id.hash(state);
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.node.name, self.node.id)
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.node.name)
    }
}
