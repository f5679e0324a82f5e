//! Single-shard lifecycle scenarios driven through a standalone manager.
//!
//! With no shard dispatcher attached, every cross-shard operation
//! degenerates to a local call; semantics must be unchanged.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use taskshard::{
    Config, Progress, Task, TaskError, TaskFn, TaskImpl, TaskInfo, TaskManager, TaskSpec,
    TaskState,
};

fn manager(ttl_secs: u32) -> Arc<TaskManager> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    TaskManager::new(0, Config::fixed(ttl_secs))
}

/// Parks until the task's abort signal fires, then reports the abort.
fn parked() -> Arc<dyn TaskImpl> {
    TaskFn::arc("parked", |task: Arc<Task>| async move {
        task.abort_signal().aborted().await;
        Err(TaskError::Aborted)
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test]
async fn clean_run_reaches_done() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let task = module
        .make_and_start_task(
            TaskFn::arc("noop", |_| async { Ok(()) }),
            TaskSpec::new().scope("node").entity("bootstrap"),
            None,
        )
        .await
        .unwrap();

    task.done().await.unwrap();

    let status = task.status();
    assert_eq!(status.state, TaskState::Done);
    assert!(status.error.is_empty());
    assert!(task.is_complete());
    assert!(task.is_done());

    let start = status.start_time.expect("start_time set after start");
    let end = status.end_time.expect("end_time set in terminal state");
    assert!(end >= start);

    // TTL has not elapsed: the task still lingers in both indices.
    assert!(tm.find_task(task.id()).is_some());
    assert_eq!(module.task_count(), 1);
}

#[tokio::test]
async fn zero_ttl_unregisters_after_terminal_transition() {
    let tm = manager(0);
    let module = tm.make_module("maintenance");

    let task = module
        .make_and_start_task(TaskFn::arc("noop", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await
        .unwrap();
    let id = task.id();
    task.done().await.unwrap();

    let probe = Arc::clone(&tm);
    wait_until(move || probe.find_task(id).is_none()).await;
    assert_eq!(module.task_count(), 0);
}

#[tokio::test]
async fn second_start_is_an_internal_error() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let task = module
        .make_task(parked(), TaskSpec::new(), None)
        .await
        .unwrap();
    task.start().unwrap();
    assert!(matches!(task.start(), Err(TaskError::Internal { .. })));

    task.abort_signal()
        .request_abort(taskshard::AbortReason::Requested);
    let _ = task.done().await;
}

#[tokio::test]
async fn binary_progress_follows_the_state() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let release = Arc::new(Notify::new());
    let task = module
        .make_and_start_task(
            TaskFn::arc("gated", {
                let release = Arc::clone(&release);
                move |_| async move {
                    release.notified().await;
                    Ok(())
                }
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(task.get_progress().await.unwrap(), Progress::new(0.0, 1.0));

    release.notify_one();
    task.done().await.unwrap();
    assert_eq!(task.get_progress().await.unwrap(), Progress::new(1.0, 1.0));
}

#[tokio::test]
async fn abort_fails_the_task_with_the_abort_error() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let task = module
        .make_and_start_task(
            TaskFn::new("poller", |task: Arc<Task>| async move {
                loop {
                    if task.abort_requested() {
                        return Err(TaskError::Aborted);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .abortable(true)
            .build(),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    task.abort().await.unwrap();
    // Idempotent: a second abort changes nothing.
    task.abort().await.unwrap();

    assert_eq!(task.done().await, Err(TaskError::Aborted));
    let status = task.status();
    assert_eq!(status.state, TaskState::Failed);
    assert!(status.error.contains("abort"), "error: {}", status.error);
    assert!(task.abort_requested());
}

#[tokio::test]
async fn abort_on_non_abortable_task_is_refused() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let release = Arc::new(Notify::new());
    let task = module
        .make_and_start_task(
            TaskFn::arc("stubborn", {
                let release = Arc::clone(&release);
                move |_| async move {
                    release.notified().await;
                    Ok(())
                }
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(
        task.abort().await,
        Err(TaskError::NotAbortable { .. })
    ));
    assert!(!task.abort_requested());

    release.notify_one();
    task.done().await.unwrap();
}

#[tokio::test]
async fn abort_after_clean_body_still_fails_the_task() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    // The body ignores the signal and returns Ok; the post-run check must
    // still record the abort.
    let release = Arc::new(Notify::new());
    let task = module
        .make_and_start_task(
            TaskFn::new("oblivious", {
                let release = Arc::clone(&release);
                move |_| async move {
                    release.notified().await;
                    Ok(())
                }
            })
            .abortable(true)
            .build(),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    task.abort().await.unwrap();
    release.notify_one();
    assert_eq!(task.done().await, Err(TaskError::Aborted));
    assert_eq!(task.status().state, TaskState::Failed);
}

#[tokio::test]
async fn scoped_deadline_expires_the_task() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let task = module
        .make_and_start_task(
            TaskFn::arc("slow", |task: Arc<Task>| async move {
                task.abort_signal().aborted().await;
                task.abort_signal().check()
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    let _deadline = task
        .abort_signal()
        .expire_after(Duration::from_millis(20));

    assert_eq!(task.done().await, Err(TaskError::Timeout));
    let status = task.status();
    assert_eq!(status.state, TaskState::Failed);
    assert!(status.error.contains("deadline"), "error: {}", status.error);
}

#[tokio::test]
async fn done_supports_multiple_waiters() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let release = Arc::new(Notify::new());
    let task = module
        .make_and_start_task(
            TaskFn::arc("gated", {
                let release = Arc::clone(&release);
                move |_| async move {
                    release.notified().await;
                    Ok(())
                }
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    let first = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { task.done().await })
    };
    let second = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { task.done().await })
    };

    release.notify_one();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn root_tasks_draw_fresh_sequence_numbers() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let first = module
        .make_task(TaskFn::arc("noop", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await
        .unwrap();
    let second = module
        .make_task(TaskFn::arc("noop", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await
        .unwrap();

    // Not yet running: numbers are assigned at Running entry.
    assert_eq!(first.sequence_number(), 0);
    assert_eq!(second.sequence_number(), 0);

    first.start().unwrap();
    second.start().unwrap();
    assert_eq!(first.sequence_number(), 1);
    assert_eq!(second.sequence_number(), 2);

    first.done().await.unwrap();
    second.done().await.unwrap();
}

#[tokio::test]
async fn prebuilt_subtree_shares_one_sequence_number() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    // Link the child while the parent is still Created: the link reserves
    // the parent's workflow number instead of snapshotting an unassigned
    // one.
    let parent = module
        .make_task(TaskFn::arc("noop", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await
        .unwrap();
    let child = module
        .make_task(
            TaskFn::arc("noop", |_| async { Ok(()) }),
            TaskSpec::new(),
            Some(TaskInfo::new(parent.id(), parent.shard())),
        )
        .await
        .unwrap();

    parent.start().unwrap();
    child.start().unwrap();

    assert_ne!(parent.sequence_number(), 0);
    assert_eq!(child.sequence_number(), parent.sequence_number());

    child.done().await.unwrap();
    parent.done().await.unwrap();
}

#[tokio::test]
async fn child_started_before_its_parent_still_inherits_the_number() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let parent = module
        .make_task(TaskFn::arc("noop", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await
        .unwrap();
    let child = module
        .make_task(
            TaskFn::arc("noop", |_| async { Ok(()) }),
            TaskSpec::new(),
            Some(TaskInfo::new(parent.id(), parent.shard())),
        )
        .await
        .unwrap();

    // Reverse order: the reservation made at link time holds either way.
    child.start().unwrap();
    child.done().await.unwrap();
    parent.start().unwrap();
    parent.done().await.unwrap();

    assert_ne!(child.sequence_number(), 0);
    assert_eq!(parent.sequence_number(), child.sequence_number());
    assert!(parent.children().all_finished().await);
}

#[tokio::test]
async fn children_fold_into_parent_and_failures_surface() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let stash: Arc<Mutex<Vec<Arc<Task>>>> = Arc::new(Mutex::new(Vec::new()));
    let parent = module
        .make_and_start_task(
            TaskFn::arc("parent", {
                let stash = Arc::clone(&stash);
                move |task: Arc<Task>| async move {
                    let module = Arc::clone(task.module());
                    let parent_info = Some(TaskInfo::new(task.id(), task.shard()));

                    let healthy = module
                        .make_and_start_task(
                            TaskFn::arc("healthy-child", |_| async { Ok(()) }),
                            TaskSpec::new(),
                            parent_info,
                        )
                        .await?;
                    let broken = module
                        .make_and_start_task(
                            TaskFn::arc("broken-child", |_| async {
                                Err(TaskError::failed("disk full"))
                            }),
                            TaskSpec::new(),
                            parent_info,
                        )
                        .await?;

                    stash.lock().unwrap().push(Arc::clone(&healthy));
                    stash.lock().unwrap().push(Arc::clone(&broken));

                    let _ = healthy.done().await;
                    let _ = broken.done().await;
                    Ok(())
                }
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    parent.done().await.unwrap();
    assert_eq!(parent.status().state, TaskState::Done);

    assert_eq!(parent.children().size().await, 2);
    assert!(parent.children().all_finished().await);

    let failed = parent.get_failed_children().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].type_name, "broken-child");
    assert_eq!(failed[0].status.state, TaskState::Failed);
    assert!(failed[0].status.error.contains("disk full"));
    assert_eq!(failed[0].parent_id, Some(parent.id()));

    // Children inherit the parent's sequence number.
    let children = stash.lock().unwrap().clone();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.sequence_number(), parent.sequence_number());
        assert!(child.is_internal());
    }

    // Enumeration sees only retired entries once everything folded.
    let live_seen = Arc::new(Mutex::new(0usize));
    let retired_seen = Arc::new(Mutex::new(0usize));
    parent
        .children()
        .for_each(
            {
                let live_seen = Arc::clone(&live_seen);
                move |_child| {
                    *live_seen.lock().unwrap() += 1;
                    Box::pin(async { Ok(()) })
                }
            },
            {
                let retired_seen = Arc::clone(&retired_seen);
                move |_child| {
                    *retired_seen.lock().unwrap() += 1;
                    Box::pin(async { Ok(()) })
                }
            },
        )
        .await
        .unwrap();
    assert_eq!(*live_seen.lock().unwrap(), 0);
    assert_eq!(*retired_seen.lock().unwrap(), 2);
}

struct ScaledParent;

#[async_trait::async_trait]
impl TaskImpl for ScaledParent {
    fn type_name(&self) -> &str {
        "scaled-parent"
    }

    fn expected_children_number(&self) -> Option<f64> {
        Some(2.0)
    }

    async fn expected_total_workload(&self) -> Option<f64> {
        Some(10.0)
    }

    async fn run(&self, task: Arc<Task>) -> Result<(), TaskError> {
        let module = Arc::clone(task.module());
        let parent_info = Some(TaskInfo::new(task.id(), task.shard()));
        for _ in 0..2 {
            let child = module
                .make_and_start_task(
                    TaskFn::arc("unit", |_| async { Ok(()) }),
                    TaskSpec::new(),
                    parent_info,
                )
                .await?;
            let _ = child.done().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn progress_aggregates_children_once_all_are_accounted_for() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let parent = module
        .make_and_start_task(Arc::new(ScaledParent), TaskSpec::new(), None)
        .await
        .unwrap();
    parent.done().await.unwrap();

    // Both expected children retired: their summed progress is reported
    // as-is, without consulting the workload hint.
    assert_eq!(parent.children().size().await, 2);
    assert_eq!(parent.get_progress().await.unwrap(), Progress::new(2.0, 2.0));
}

#[tokio::test]
async fn child_progress_with_foreign_units_is_skipped() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let stash: Arc<Mutex<Option<Arc<Task>>>> = Arc::new(Mutex::new(None));
    let parent = module
        .make_and_start_task(
            TaskFn::new("mixed-units", {
                let stash = Arc::clone(&stash);
                move |task: Arc<Task>| async move {
                    let module = Arc::clone(task.module());
                    let child = module
                        .make_and_start_task(
                            TaskFn::arc("byte-counter", |task: Arc<Task>| async move {
                                task.abort_signal().aborted().await;
                                Err(TaskError::Aborted)
                            }),
                            TaskSpec::new().progress_units("bytes"),
                            Some(TaskInfo::new(task.id(), task.shard())),
                        )
                        .await?;
                    *stash.lock().unwrap() = Some(child);
                    task.abort_signal().aborted().await;
                    Err(TaskError::Aborted)
                }
            })
            .abortable(true)
            .build(),
            TaskSpec::new().progress_units("rows"),
            None,
        )
        .await
        .unwrap();

    {
        let stash = Arc::clone(&stash);
        wait_until(move || stash.lock().unwrap().is_some()).await;
    }

    // The live child counts in "bytes": invisible to a "rows" aggregation,
    // binary under its own units.
    assert_eq!(
        parent.children().get_progress("rows").await.unwrap(),
        Progress::new(0.0, 0.0)
    );
    assert_eq!(
        parent.children().get_progress("bytes").await.unwrap(),
        Progress::new(0.0, 1.0)
    );

    parent.abort().await.unwrap();
    assert_eq!(parent.done().await, Err(TaskError::Aborted));
}

#[tokio::test]
async fn child_of_a_retired_parent_finishes_without_error() {
    let tm = manager(0);
    let module = tm.make_module("maintenance");

    let release = Arc::new(Notify::new());
    let stash: Arc<Mutex<Option<Arc<Task>>>> = Arc::new(Mutex::new(None));

    let parent = module
        .make_and_start_task(
            TaskFn::arc("absent-parent", {
                let release = Arc::clone(&release);
                let stash = Arc::clone(&stash);
                move |task: Arc<Task>| async move {
                    let module = Arc::clone(task.module());
                    let child = module
                        .make_and_start_task(
                            TaskFn::arc("straggler", {
                                let release = Arc::clone(&release);
                                move |_| async move {
                                    release.notified().await;
                                    Ok(())
                                }
                            }),
                            TaskSpec::new(),
                            Some(TaskInfo::new(task.id(), task.shard())),
                        )
                        .await?;
                    *stash.lock().unwrap() = Some(child);
                    // Return without awaiting the child.
                    Ok(())
                }
            }),
            TaskSpec::new(),
            None,
        )
        .await
        .unwrap();

    parent.done().await.unwrap();
    let parent_id = parent.id();
    let probe = Arc::clone(&tm);
    wait_until(move || probe.find_task(parent_id).is_none()).await;

    // The parent is gone; the child's fold becomes a no-op.
    let child = stash.lock().unwrap().take().unwrap();
    release.notify_one();
    assert_eq!(child.done().await, Ok(()));
    assert_eq!(child.status().state, TaskState::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn module_stop_drains_all_tasks() {
    let tm = manager(60);
    let module = tm.make_module("bulk");

    let mut waiters = Vec::new();
    for _ in 0..100 {
        let task = module
            .make_and_start_task(parked(), TaskSpec::new(), None)
            .await
            .unwrap();
        waiters.push(tokio::spawn(async move {
            let outcome = task.done().await;
            let state = task.status().state;
            (outcome, state)
        }));
    }
    assert_eq!(module.task_count(), 100);

    module.stop().await;

    assert_eq!(module.gate().holder_count(), 0);
    assert_eq!(module.task_count(), 0);
    assert!(tm.get_all_tasks().is_empty());
    assert!(tm.find_module("bulk").is_err());

    for waiter in waiters {
        let (outcome, state) = waiter.await.unwrap();
        assert_eq!(outcome, Err(TaskError::Aborted));
        assert_eq!(state, TaskState::Failed);
    }
}

#[tokio::test]
async fn stopping_module_refuses_new_tasks() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");
    module.stop().await;

    let refused = module
        .make_task(TaskFn::arc("late", |_| async { Ok(()) }), TaskSpec::new(), None)
        .await;
    assert!(matches!(refused, Err(TaskError::Shutdown)));
}

#[tokio::test]
async fn manager_stop_stops_every_module() {
    let tm = manager(60);
    let first = tm.make_module("first");
    let second = tm.make_module("second");

    let task = first
        .make_and_start_task(parked(), TaskSpec::new(), None)
        .await
        .unwrap();
    drop(task);

    tm.stop().await;
    assert!(tm.find_module("first").is_err());
    assert!(tm.find_module("second").is_err());
    assert!(tm.get_all_tasks().is_empty());
    assert_eq!(first.task_count(), 0);
    assert_eq!(second.task_count(), 0);
}

#[tokio::test]
async fn status_marshals_to_json() {
    let tm = manager(60);
    let module = tm.make_module("maintenance");

    let task = module
        .make_and_start_task(
            TaskFn::arc("noop", |_| async { Ok(()) }),
            TaskSpec::new()
                .scope("table")
                .keyspace("ks")
                .table("events")
                .progress_units("bytes"),
            None,
        )
        .await
        .unwrap();
    task.done().await.unwrap();

    let encoded = serde_json::to_value(task.status()).unwrap();
    assert_eq!(encoded["state"], "done");
    assert_eq!(encoded["keyspace"], "ks");
    assert_eq!(encoded["table"], "events");
    assert_eq!(encoded["progress_units"], "bytes");
    assert_eq!(encoded["id"], serde_json::json!(task.id()));
}
