//! Scripted host for exercising a [`ScopeDirectory`] outside a real container.
//!
//! A scenario names a context tree and a list of steps: phase notifications
//! (one at a time or several on separate threads) and task registrations.
//! Replaying it records which task ran for which scope.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::config::DirectoryConfig;
use crate::directory::ScopeDirectory;
use crate::host::ContextHandle;
use crate::sync::lock;
use crate::task::Task;
use crate::types::Phase;
use crate::{log_debug, log_info, log_warn};

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Scenario {
    pub contexts: Vec<ContextDef>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ContextDef {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Deliver one phase notification.
    Notify(NotifyStep),
    /// Deliver several notifications, each on its own thread.
    Parallel(Vec<NotifyStep>),
    /// Register a task, globally when `scope` is omitted.
    Register(TaskDef),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct NotifyStep {
    pub scope: String,
    pub phase: Phase,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct TaskDef {
    pub label: String,
    pub phase: Phase,
    #[serde(default)]
    pub scope: Option<String>,
    /// Make the task return an error when it runs.
    #[serde(default)]
    pub fail: bool,
}

/// One task invocation observed during a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub label: String,
    pub phase: Phase,
    pub scope: String,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub executions: Vec<Execution>,
    pub errors: Vec<String>,
    pub root: Option<String>,
    pub remaining_scopes: Vec<String>,
}

pub fn parse_scenario(contents: &str) -> Result<Scenario, String> {
    toml::from_str(contents).map_err(|e| format!("Failed to parse scenario: {}", e))
}

pub fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_scenario(&contents).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Build the context tree. Parents must be declared before their children.
fn build_contexts(defs: &[ContextDef]) -> Result<HashMap<String, ContextHandle>, String> {
    let mut contexts: HashMap<String, ContextHandle> = HashMap::new();
    for def in defs {
        if contexts.contains_key(&def.name) {
            return Err(format!("Duplicate context name '{}'", def.name));
        }
        let handle = match &def.parent {
            None => ContextHandle::try_root(&def.name)?,
            Some(parent) => contexts
                .get(parent)
                .ok_or_else(|| {
                    format!(
                        "Context '{}' names unknown parent '{}' (parents must come first)",
                        def.name, parent
                    )
                })?
                .try_child(&def.name)?,
        };
        contexts.insert(def.name.clone(), handle);
    }
    Ok(contexts)
}

fn context<'a>(
    contexts: &'a HashMap<String, ContextHandle>,
    name: &str,
) -> Result<&'a ContextHandle, String> {
    contexts
        .get(name)
        .ok_or_else(|| format!("Unknown context '{}'", name))
}

fn recording_task(def: &TaskDef, log: &Arc<Mutex<Vec<Execution>>>) -> Task<ContextHandle> {
    let label = def.label.clone();
    let phase = def.phase;
    let fail = def.fail;
    let log = Arc::clone(log);
    Task::named(&def.label, move |ctx: &ContextHandle| {
        lock(&log).push(Execution {
            label: label.clone(),
            phase,
            scope: ctx.name().to_string(),
        });
        if fail {
            return Err(format!("task '{}' failed on purpose", label).into());
        }
        Ok(())
    })
}

/// Replay `scenario` against a fresh directory.
///
/// Task failures are collected into the report rather than stopping the
/// replay; structural problems in the scenario (unknown names) are errors.
pub fn replay(scenario: &Scenario, config: DirectoryConfig) -> Result<ReplayReport, String> {
    let contexts = build_contexts(&scenario.contexts)?;
    let directory: ScopeDirectory<ContextHandle> = ScopeDirectory::with_config(config);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut errors = Vec::new();

    for def in &scenario.contexts {
        directory.register_scope(context(&contexts, &def.name)?);
    }

    for (index, step) in scenario.steps.iter().enumerate() {
        log_debug!("Step {}: {:?}", index + 1, step);
        match step {
            Step::Notify(notify) => {
                let ctx = context(&contexts, &notify.scope)?;
                if let Err(e) = directory.on_phase(ctx, notify.phase) {
                    errors.push(e.to_string());
                }
            }
            Step::Parallel(batch) => {
                let targets = batch
                    .iter()
                    .map(|notify| -> Result<_, String> {
                        Ok((context(&contexts, &notify.scope)?, notify.phase))
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                let shared = &directory;
                let outcomes: Vec<_> = std::thread::scope(|s| {
                    let workers: Vec<_> = targets
                        .iter()
                        .map(|&(ctx, phase)| s.spawn(move || shared.on_phase(ctx, phase)))
                        .collect();
                    workers.into_iter().map(|worker| worker.join()).collect()
                });
                for outcome in outcomes {
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => errors.push(e.to_string()),
                        Err(_) => errors.push("notification thread panicked".to_string()),
                    }
                }
            }
            Step::Register(task) => {
                let registered = match &task.scope {
                    Some(scope) => directory.add_task_in(
                        context(&contexts, scope)?,
                        task.phase,
                        recording_task(task, &log),
                    ),
                    None => directory.add_task(task.phase, recording_task(task, &log)),
                };
                if let Err(e) = registered {
                    errors.push(e.to_string());
                }
            }
        }
    }

    for error in &errors {
        log_warn!("{}", error);
    }

    let report = ReplayReport {
        executions: lock(&log).clone(),
        root: directory.root().map(|root| root.name().to_string()),
        remaining_scopes: directory
            .scopes()
            .iter()
            .map(|ctx| ctx.name().to_string())
            .collect(),
        errors,
    };
    log_info!(
        "Replayed {} steps: {} task runs, {} errors",
        scenario.steps.len(),
        report.executions.len(),
        report.errors.len()
    );
    Ok(report)
}
