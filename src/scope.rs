use chrono::{DateTime, Utc};

use crate::error::SgError;
use crate::host::HostContext;
use crate::registry::TaskRegistry;
use crate::types::{FailurePolicy, Phase};

/// Default bound on parent-chain walks.
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 1000;

/// One managed scope: a host context plus its own task registry.
#[derive(Debug)]
pub struct Scope<C> {
    handle: C,
    tasks: TaskRegistry<C>,
    sequence: u64,
    registered_at: DateTime<Utc>,
}

impl<C: HostContext> Scope<C> {
    /// `sequence` orders scopes by registration; lower registered first.
    pub fn new(handle: C, sequence: u64, policy: FailurePolicy) -> Self {
        Self {
            tasks: TaskRegistry::scoped(handle.clone(), policy),
            handle,
            sequence,
            registered_at: Utc::now(),
        }
    }

    pub fn handle(&self) -> &C {
        &self.handle
    }

    pub fn tasks(&self) -> &TaskRegistry<C> {
        &self.tasks
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn has_occurred(&self, phase: Phase) -> bool {
        self.tasks.has_occurred(phase)
    }

    /// Phases that have fired for this scope, in declaration order.
    pub fn fired_phases(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|phase| self.has_occurred(*phase))
            .collect()
    }

    /// Walk parent links from this scope's context to the top.
    ///
    /// Returns the number of hops and the context without a parent. Not
    /// cached: the host may re-parent contexts until it is ready. Fails with
    /// `HierarchyCycle` once more than `max_hops` hops were taken.
    pub fn ancestor_chain(&self, max_hops: usize) -> Result<(usize, C), SgError> {
        let mut hops = 0;
        let mut current = self.handle.clone();
        while let Some(parent) = current.parent() {
            hops += 1;
            if hops > max_hops {
                return Err(SgError::HierarchyCycle {
                    hops,
                    limit: max_hops,
                });
            }
            current = parent;
        }
        Ok((hops, current))
    }

    pub fn depth(&self, max_hops: usize) -> Result<usize, SgError> {
        self.ancestor_chain(max_hops).map(|(depth, _)| depth)
    }
}
