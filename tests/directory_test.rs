mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use scope_golem::config::DirectoryConfig;
use scope_golem::error::SgError;
use scope_golem::types::{FailurePolicy, Phase};
use scope_golem::{ContextHandle, ScopeDirectory, Task};

use common::{counting_task, three_level_tree, Recorder};

fn directory() -> ScopeDirectory<ContextHandle> {
    ScopeDirectory::new()
}

// =============================================================================
// Scope resolution
// =============================================================================

#[test]
fn resolve_returns_the_same_scope_for_a_handle() {
    let dir = directory();
    let ctx = ContextHandle::root("app");

    let first = dir.resolve_scope(&ctx);
    let second = dir.resolve_scope(&ctx);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(dir.len(), 1);
}

#[test]
fn concurrent_first_touch_creates_one_scope() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let barrier = Barrier::new(8);

    let (dir_ref, ctx_ref, barrier_ref) = (&dir, &ctx, &barrier);
    let scopes: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    barrier_ref.wait();
                    dir_ref.resolve_scope(ctx_ref)
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for scope in &scopes[1..] {
        assert!(Arc::ptr_eq(&scopes[0], scope));
    }
    assert_eq!(dir.len(), 1);
}

#[test]
fn scopes_are_listed_in_registration_order() {
    let dir = directory();
    let a = ContextHandle::root("a");
    let b = ContextHandle::root("b");
    let c = ContextHandle::root("c");

    dir.register_scope(&b);
    dir.register_scope(&a);
    dir.register_scope(&c);
    dir.register_scope(&b);

    assert_eq!(dir.scopes(), vec![b, a, c]);
}

#[test]
fn lookup_does_not_create() {
    let dir = directory();
    let ctx = ContextHandle::root("app");

    assert!(dir.lookup(&ctx).is_none());
    assert!(!dir.is_occurred_in(&ctx, Phase::Start));
    assert!(dir.is_empty());
}

// =============================================================================
// Phase dispatch
// =============================================================================

#[test]
fn stop_tasks_run_in_order_and_late_task_runs_immediately() {
    let dir = directory();
    let s1 = ContextHandle::root("s1");
    let rec = Recorder::new();

    dir.register_scope(&s1);
    dir.on_stop_in(&s1, rec.task("t1")).unwrap();
    dir.on_stop_in(&s1, rec.task("t2")).unwrap();
    dir.on_stop_in(&s1, rec.task("t3")).unwrap();

    dir.on_phase(&s1, Phase::Stop).unwrap();
    assert_eq!(rec.labels(), vec!["t1", "t2", "t3"]);

    dir.on_stop_in(&s1, rec.task("t4")).unwrap();
    assert_eq!(rec.labels(), vec!["t1", "t2", "t3", "t4"]);
    assert!(dir.is_occurred_in(&s1, Phase::Stop));
}

#[test]
fn scope_tasks_finish_before_global_tasks() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_start(rec.task("global-1")).unwrap();
    dir.on_start_in(&ctx, rec.task("local-1")).unwrap();
    dir.on_start(rec.task("global-2")).unwrap();
    dir.on_start_in(&ctx, rec.task("local-2")).unwrap();

    dir.on_phase(&ctx, Phase::Start).unwrap();

    assert_eq!(
        rec.labels(),
        vec!["local-1", "local-2", "global-1", "global-2"]
    );
    assert!(dir.is_occurred(Phase::Start));
    assert!(!dir.is_occurred(Phase::Stop));
}

#[test]
fn global_tasks_only_run_for_the_notified_scope() {
    let dir = directory();
    let a = ContextHandle::root("a");
    let b = ContextHandle::root("b");
    let rec = Recorder::new();

    dir.on_refresh(rec.task("g")).unwrap();
    dir.on_phase(&a, Phase::Refresh).unwrap();

    assert_eq!(rec.entries(), vec!["g@a"]);
    assert!(dir.is_occurred_in(&a, Phase::Refresh));
    assert!(!dir.is_occurred_in(&b, Phase::Refresh));

    dir.on_phase(&b, Phase::Refresh).unwrap();
    assert_eq!(rec.entries(), vec!["g@a", "g@b"]);
}

#[test]
fn late_global_task_runs_for_scopes_that_already_fired() {
    let dir = directory();
    let a = ContextHandle::root("a");
    let b = ContextHandle::root("b");
    let rec = Recorder::new();

    dir.register_scope(&b);
    dir.on_phase(&a, Phase::Start).unwrap();
    dir.on_start(rec.task("late")).unwrap();

    assert_eq!(rec.entries(), vec!["late@a"]);

    dir.on_phase(&b, Phase::Start).unwrap();
    assert_eq!(rec.entries(), vec!["late@a", "late@b"]);
}

#[test]
fn repeated_notification_does_not_rerun_tasks() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let counter = Arc::new(AtomicUsize::new(0));

    dir.on_start_in(&ctx, counting_task(&counter)).unwrap();
    dir.on_start(counting_task(&counter)).unwrap();

    dir.on_phase(&ctx, Phase::Start).unwrap();
    dir.on_phase(&ctx, Phase::Start).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn every_register_overload_targets_its_phase() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_refresh_in(&ctx, rec.task("refresh-local")).unwrap();
    dir.on_start_in(&ctx, rec.task("start-local")).unwrap();
    dir.on_stop_in(&ctx, rec.task("stop-local")).unwrap();
    dir.on_close_in(&ctx, rec.task("close-local")).unwrap();
    dir.on_refresh(rec.task("refresh-global")).unwrap();
    dir.on_start(rec.task("start-global")).unwrap();
    dir.on_stop(rec.task("stop-global")).unwrap();
    dir.on_close(rec.task("close-global")).unwrap();

    for phase in Phase::ALL {
        dir.on_phase(&ctx, phase).unwrap();
    }

    assert_eq!(
        rec.labels(),
        vec![
            "refresh-local",
            "refresh-global",
            "start-local",
            "start-global",
            "stop-local",
            "stop-global",
            "close-local",
            "close-global",
        ]
    );
}

#[test]
fn task_can_register_more_work_while_its_phase_fires() {
    let dir = Arc::new(directory());
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    let follow_up = rec.task("follow-up");
    let chained = {
        let dir = Arc::clone(&dir);
        Task::new(move |ctx: &ContextHandle| {
            dir.on_close_in(ctx, follow_up.clone())?;
            Ok(())
        })
    };
    dir.on_close(chained).unwrap();

    let nested_global = rec.task("nested-global");
    let adds_global = {
        let dir = Arc::clone(&dir);
        Task::new(move |_: &ContextHandle| {
            dir.on_start(nested_global.clone())?;
            Ok(())
        })
    };
    dir.on_start_in(&ctx, adds_global).unwrap();

    dir.on_phase(&ctx, Phase::Start).unwrap();
    assert_eq!(rec.labels(), vec!["nested-global"]);

    dir.on_phase(&ctx, Phase::Close).unwrap();
    assert_eq!(rec.labels(), vec!["nested-global", "follow-up"]);
}

// =============================================================================
// Close eviction
// =============================================================================

#[test]
fn close_evicts_the_scope() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_close_in(&ctx, rec.task("bye")).unwrap();
    dir.on_phase(&ctx, Phase::Close).unwrap();

    assert_eq!(rec.labels(), vec!["bye"]);
    assert!(!dir.contains(&ctx));
    assert!(dir.is_closed(&ctx));
    assert!(dir.is_occurred_in(&ctx, Phase::Close));
}

#[test]
fn late_tasks_for_a_closed_scope_run_immediately() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_phase(&ctx, Phase::Stop).unwrap();
    dir.on_phase(&ctx, Phase::Close).unwrap();

    dir.on_close_in(&ctx, rec.task("late-close")).unwrap();
    dir.on_stop_in(&ctx, rec.task("late-stop")).unwrap();

    assert_eq!(rec.entries(), vec!["late-close@app", "late-stop@app"]);
    assert!(!dir.contains(&ctx), "closed scope is not recreated");
    assert_eq!(dir.len(), 0);
}

#[test]
fn closed_scope_still_runs_a_task_at_most_once() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&counter);

    dir.on_close_in(&ctx, task.clone()).unwrap();
    dir.on_phase(&ctx, Phase::Close).unwrap();
    dir.on_close_in(&ctx, task).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn closed_scope_rejects_phases_it_never_reached() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_start_in(&ctx, rec.task("never")).unwrap();
    dir.on_phase(&ctx, Phase::Close).unwrap();

    let err = dir.on_start_in(&ctx, rec.task("too-late")).unwrap_err();
    assert!(matches!(err, SgError::ScopeClosed { phase: Phase::Start }));
    assert_eq!(dir.len(), 0);

    // Host notifications for the closed handle are ignored
    dir.on_phase(&ctx, Phase::Start).unwrap();
    assert!(rec.entries().is_empty());
    assert!(!dir.is_occurred_in(&ctx, Phase::Start));
}

#[test]
fn registering_a_closed_handle_reopens_it() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_phase(&ctx, Phase::Close).unwrap();
    dir.register_scope(&ctx);
    assert!(!dir.is_closed(&ctx));
    assert!(!dir.is_occurred_in(&ctx, Phase::Close));

    dir.on_close_in(&ctx, rec.task("second-life")).unwrap();
    assert!(rec.entries().is_empty(), "queued until the new close");
    dir.on_phase(&ctx, Phase::Close).unwrap();
    assert_eq!(rec.labels(), vec!["second-life"]);
}

#[test]
fn released_closed_handle_starts_fresh() {
    let dir = directory();
    let ctx = ContextHandle::root("app");

    dir.on_phase(&ctx, Phase::Close).unwrap();
    assert_eq!(dir.closed_len(), 1);
    assert!(dir.release_closed(&ctx));
    assert_eq!(dir.closed_len(), 0);
    assert!(!dir.is_occurred_in(&ctx, Phase::Close));
}

#[test]
fn eviction_can_be_disabled() {
    let dir: ScopeDirectory<ContextHandle> =
        ScopeDirectory::with_config(DirectoryConfig::default().with_evict_on_close(false));
    let ctx = ContextHandle::root("app");

    dir.on_phase(&ctx, Phase::Close).unwrap();

    assert!(dir.contains(&ctx));
    assert!(dir.is_occurred_in(&ctx, Phase::Close));
}

#[test]
fn evicted_scope_no_longer_receives_late_global_tasks() {
    let dir = directory();
    let a = ContextHandle::root("a");
    let rec = Recorder::new();

    dir.on_phase(&a, Phase::Close).unwrap();
    dir.on_close(rec.task("late-close")).unwrap();

    assert!(rec.entries().is_empty());
}

#[test]
fn concurrent_closes_run_global_tasks_once_per_scope() {
    let dir = directory();
    let s1 = ContextHandle::root("s1");
    let s2 = ContextHandle::root("s2");
    let rec = Recorder::new();

    dir.register_scope(&s1);
    dir.register_scope(&s2);
    dir.on_close(rec.task("shutdown")).unwrap();

    let barrier = Barrier::new(2);
    thread::scope(|s| {
        for ctx in [&s1, &s2] {
            let dir = &dir;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                dir.on_phase(ctx, Phase::Close).unwrap();
            });
        }
    });

    let seen: HashSet<String> = rec.entries().into_iter().collect();
    assert_eq!(rec.len(), 2);
    assert!(seen.contains("shutdown@s1"));
    assert!(seen.contains("shutdown@s2"));
    assert!(!dir.contains(&s1));
    assert!(!dir.contains(&s2));
    assert!(dir.is_empty());
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn abort_failure_in_scope_task_skips_global_pass() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_stop_in(&ctx, rec.failing_task("local")).unwrap();
    dir.on_stop(rec.task("global")).unwrap();

    let err = dir.on_phase(&ctx, Phase::Stop).unwrap_err();
    assert!(matches!(err, SgError::TaskFailed { phase: Phase::Stop, .. }));
    assert_eq!(rec.labels(), vec!["local"]);
    assert!(dir.is_occurred_in(&ctx, Phase::Stop));
}

#[test]
fn abort_failure_on_close_still_evicts() {
    let dir = directory();
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_close_in(&ctx, rec.failing_task("local")).unwrap();

    assert!(dir.on_phase(&ctx, Phase::Close).is_err());
    assert!(!dir.contains(&ctx));
}

#[test]
fn isolate_collects_failures_from_both_passes() {
    let dir: ScopeDirectory<ContextHandle> = ScopeDirectory::with_config(
        DirectoryConfig::default().with_failure_policy(FailurePolicy::Isolate),
    );
    let ctx = ContextHandle::root("app");
    let rec = Recorder::new();

    dir.on_stop_in(&ctx, rec.failing_task("local-bad")).unwrap();
    dir.on_stop_in(&ctx, rec.task("local-ok")).unwrap();
    dir.on_stop(rec.failing_task("global-bad")).unwrap();
    dir.on_stop(rec.task("global-ok")).unwrap();

    let err = dir.on_phase(&ctx, Phase::Stop).unwrap_err();
    match err {
        SgError::TasksFailed { failures, .. } => {
            let labels: Vec<_> = failures.iter().filter_map(|f| f.label.clone()).collect();
            assert_eq!(labels, vec!["local-bad", "global-bad"]);
        }
        other => panic!("expected TasksFailed, got {:?}", other),
    }
    assert_eq!(
        rec.labels(),
        vec!["local-bad", "local-ok", "global-bad", "global-ok"]
    );
}

// =============================================================================
// Root resolution
// =============================================================================

#[test]
fn root_is_none_before_any_scope() {
    let dir = directory();
    assert!(matches!(dir.get_root(), Err(SgError::NoRootResolved)));
    assert!(dir.root().is_none());
}

#[test]
fn root_is_parent_whichever_registers_first() {
    let a = ContextHandle::root("a");
    let b = a.child("b");

    let parent_first = directory();
    parent_first.register_scope(&a);
    parent_first.register_scope(&b);
    assert_eq!(parent_first.get_root().unwrap(), a);

    let child_first = directory();
    child_first.register_scope(&b);
    child_first.register_scope(&a);
    assert_eq!(child_first.get_root().unwrap(), a);
}

#[test]
fn root_found_through_unregistered_ancestors() {
    let (root, _, leaf) = three_level_tree();
    let dir = directory();
    dir.register_scope(&leaf);
    assert_eq!(dir.root(), Some(root));
}

#[test]
fn equal_depths_keep_the_first_registered_scope() {
    let left = ContextHandle::root("left-root");
    let right = ContextHandle::root("right-root");
    let left_child = left.child("left-child");
    let right_child = right.child("right-child");

    let dir = directory();
    dir.register_scope(&right_child);
    dir.register_scope(&left_child);

    let root = dir.get_root().unwrap();
    assert_eq!(root, right);
    // Stable across calls
    assert_eq!(dir.get_root().unwrap(), root);
}

#[test]
fn root_follows_host_reparenting() {
    let a = ContextHandle::root("a");
    let b = a.child("b");
    let dir = directory();
    dir.register_scope(&b);
    assert_eq!(dir.root(), Some(a.clone()));

    let top = ContextHandle::root("top");
    a.set_parent(&top);
    assert_eq!(dir.root(), Some(top));
}

#[test]
fn cyclic_hierarchy_is_reported_by_get_root() {
    let dir: ScopeDirectory<ContextHandle> =
        ScopeDirectory::with_config(DirectoryConfig::default().with_max_hierarchy_depth(16));
    let a = ContextHandle::root("a");
    let b = a.child("b");
    a.set_parent(&b);
    dir.register_scope(&a);

    let err = dir.get_root().unwrap_err();
    assert!(matches!(err, SgError::HierarchyCycle { limit: 16, .. }));
    assert!(dir.root().is_none());
    assert_eq!(dir.snapshot()[0].depth, None);

    a.detach();
}

#[test]
fn snapshot_reports_depth_and_fired_phases() {
    let (root, _, leaf) = three_level_tree();
    let dir = directory();
    dir.register_scope(&root);
    dir.on_phase(&leaf, Phase::Refresh).unwrap();
    dir.on_phase(&leaf, Phase::Start).unwrap();

    let snapshot = dir.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].handle, root);
    assert_eq!(snapshot[0].depth, Some(0));
    assert!(snapshot[0].fired.is_empty());
    assert_eq!(snapshot[1].handle, leaf);
    assert_eq!(snapshot[1].depth, Some(2));
    assert_eq!(snapshot[1].fired, vec![Phase::Refresh, Phase::Start]);
    assert!(snapshot[0].registered_at <= snapshot[1].registered_at);
}
