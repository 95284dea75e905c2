#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::controller::TaskController;
    use crate::error::SchedulerError;
    use crate::executor::Executor;
    use crate::task::{FnTask, Task, TaskPriority, TaskStatus};
    use crate::threadpool::{PoolSource, ThreadPoolTask};

    fn controller(threads: usize) -> Arc<TaskController> {
        Arc::new(TaskController::with_threads(threads).unwrap())
    }

    fn counting_tasks(n: usize, counter: &Arc<AtomicUsize>) -> Vec<Arc<dyn Task>> {
        (0..n)
            .map(|i| {
                let counter = Arc::clone(counter);
                Arc::new(FnTask::new(format!("count {i}"), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })) as Arc<dyn Task>
            })
            .collect()
    }

    fn noop(priority: TaskPriority) -> Arc<dyn Task> {
        Arc::new(FnTask::new("noop", |_| Ok(())).with_priority(priority))
    }

    /// Tasks that record the name of the thread they ran on.
    fn naming_tasks(n: usize, names: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn Task>> {
        (0..n)
            .map(|i| {
                let names = Arc::clone(names);
                Arc::new(FnTask::new(format!("name {i}"), move |_| {
                    let name = thread::current().name().unwrap_or_default().to_string();
                    names.lock().push(name);
                    Ok(())
                })) as Arc<dyn Task>
            })
            .collect()
    }

    #[test]
    fn empty_batch_finishes_without_submitting() {
        let controller = controller(1);
        let batch = ThreadPoolTask::fixed(Arc::clone(&controller), "empty", 2, Vec::new()).unwrap();

        assert_eq!(batch.finished_percentage(), 1.0);
        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        assert_eq!(batch.finished_percentage(), 1.0);
        assert_eq!(batch.total_count(), 0);
        assert_eq!(controller.metrics().tasks_submitted, 0);
    }

    #[test]
    fn priority_comes_from_first_task() {
        let controller = controller(1);
        let leading_high = ThreadPoolTask::virtual_threads(
            Arc::clone(&controller),
            "high first",
            vec![noop(TaskPriority::High), noop(TaskPriority::Normal)],
        );
        assert_eq!(leading_high.priority(), TaskPriority::High);

        let trailing_high = ThreadPoolTask::virtual_threads(
            Arc::clone(&controller),
            "high last",
            vec![noop(TaskPriority::Normal), noop(TaskPriority::High)],
        );
        assert_eq!(trailing_high.priority(), TaskPriority::Normal);

        let empty = ThreadPoolTask::virtual_threads(controller, "empty", Vec::new());
        assert_eq!(empty.priority(), TaskPriority::Normal);
    }

    #[test]
    fn fixed_zero_threads_rejected() {
        let err = ThreadPoolTask::fixed(controller(1), "no workers", 0, vec![noop(TaskPriority::Normal)])
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidThreadCount(0)));
    }

    #[test]
    fn cancel_before_run_runs_nothing() {
        let controller = controller(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let batch =
            ThreadPoolTask::fixed(Arc::clone(&controller), "canceled", 2, counting_tasks(4, &counter))
                .unwrap();

        batch.cancel();
        assert!(batch.run().is_ok());

        assert_eq!(batch.status(), TaskStatus::Canceled);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(batch.sub_tasks().iter().all(|t| t.status() == TaskStatus::Canceled));
        assert_eq!(batch.finished_percentage(), 1.0);
        assert_eq!(controller.metrics().tasks_submitted, 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let batch = ThreadPoolTask::virtual_threads(controller(1), "twice", vec![noop(TaskPriority::Normal)]);
        let transitions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&transitions);
        batch.core().add_status_listener(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        batch.cancel();
        batch.cancel();
        assert_eq!(batch.status(), TaskStatus::Canceled);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fixed_batch_runs_every_task() {
        let controller = controller(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let batch =
            ThreadPoolTask::fixed(Arc::clone(&controller), "fixed", 3, counting_tasks(12, &counter))
                .unwrap();

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        assert_eq!(counter.load(Ordering::SeqCst), 12);
        assert!(batch.sub_tasks().iter().all(|t| t.status() == TaskStatus::Finished));
        assert_eq!(batch.finished_percentage(), 1.0);
        assert_eq!(controller.metrics().tasks_submitted, 12);
        assert!(matches!(batch.source(), PoolSource::Fixed { threads: 3 }));
    }

    #[test]
    fn progress_never_decreases() {
        let controller = controller(1);
        let tasks: Vec<Arc<dyn Task>> = (0..8)
            .map(|i| {
                Arc::new(FnTask::new(format!("sleep {i}"), |_| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                })) as Arc<dyn Task>
            })
            .collect();
        let batch = Arc::new(ThreadPoolTask::fixed(Arc::clone(&controller), "monotonic", 2, tasks).unwrap());

        let runner = {
            let batch = Arc::clone(&batch);
            thread::spawn(move || batch.run())
        };

        let mut last = 0.0;
        while !batch.status().is_terminal() {
            let now = batch.finished_percentage();
            assert!((0.0..=1.0).contains(&now));
            assert!(now >= last, "progress went from {last} to {now}");
            last = now;
            thread::sleep(Duration::from_millis(1));
        }
        assert!(runner.join().unwrap().is_ok());
        assert_eq!(batch.finished_percentage(), 1.0);
    }

    #[test]
    fn provided_pool_survives_without_auto_shutdown() {
        let controller = controller(1);
        let shared = Arc::new(Executor::bounded("shared", 2).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let batch = ThreadPoolTask::provided(
            Arc::clone(&controller),
            "shared pool",
            Arc::clone(&shared),
            false,
            counting_tasks(5, &counter),
        );

        assert!(batch.run().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(!shared.is_shutdown());
        assert!(shared.submit(|| {}).unwrap().wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn provided_pool_shut_down_with_auto_shutdown() {
        let controller = controller(1);
        let shared = Arc::new(Executor::bounded("one-shot", 2).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let batch = ThreadPoolTask::provided(
            controller,
            "one-shot pool",
            Arc::clone(&shared),
            true,
            counting_tasks(5, &counter),
        );

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(shared.is_shutdown());
    }

    #[test]
    fn virtual_batch_gives_each_task_a_thread() {
        let controller = controller(1);
        let names = Arc::new(Mutex::new(Vec::new()));
        let batch = ThreadPoolTask::virtual_threads(controller, "virtual", naming_tasks(4, &names));
        let prefix = format!("{}-virtual-v", batch.pool_label());

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        let mut names = names.lock().clone();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| n.starts_with(&prefix)), "{names:?}");
    }

    #[test]
    fn concurrent_fixed_batches_use_distinct_thread_names() {
        let controller = controller(1);
        let first_names = Arc::new(Mutex::new(Vec::new()));
        let second_names = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(
            ThreadPoolTask::fixed(Arc::clone(&controller), "same", 2, naming_tasks(4, &first_names))
                .unwrap(),
        );
        let second = Arc::new(
            ThreadPoolTask::fixed(Arc::clone(&controller), "same", 2, naming_tasks(4, &second_names))
                .unwrap(),
        );
        assert_ne!(first.pool_label(), second.pool_label());

        let runners: Vec<_> = [&first, &second]
            .into_iter()
            .map(|batch| {
                let batch = Arc::clone(batch);
                thread::spawn(move || batch.run())
            })
            .collect();
        for runner in runners {
            assert!(runner.join().unwrap().is_ok());
        }

        for (batch, names) in [(&first, &first_names), (&second, &second_names)] {
            let prefix = format!("{}-fixed-", batch.pool_label());
            let names = names.lock();
            assert_eq!(names.len(), 4);
            assert!(names.iter().all(|n| n.starts_with(&prefix)), "{names:?}");
        }
    }

    #[test]
    fn high_sub_task_runs_on_high_priority_pool() {
        let controller = controller(1);
        let batch = ThreadPoolTask::fixed(
            Arc::clone(&controller),
            "mixed",
            1,
            vec![noop(TaskPriority::Normal), noop(TaskPriority::High)],
        )
        .unwrap();

        assert!(batch.run().is_ok());
        assert!(batch.sub_tasks().iter().all(|t| t.status() == TaskStatus::Finished));
        // The completed counter settles just after the task status does.
        for _ in 0..500 {
            if controller.high_priority_executor().completed_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(controller.high_priority_executor().completed_count(), 1);
        assert_eq!(controller.executor().completed_count(), 0);
    }

    #[test]
    fn failed_sub_task_does_not_fail_batch() {
        let controller = controller(1);
        let tasks: Vec<Arc<dyn Task>> = vec![
            noop(TaskPriority::Normal),
            Arc::new(FnTask::new("broken", |_| panic!("bad peak list"))),
            noop(TaskPriority::Normal),
        ];
        let batch = ThreadPoolTask::fixed(Arc::clone(&controller), "one bad", 2, tasks).unwrap();

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        let statuses: Vec<_> = batch.sub_tasks().iter().map(|t| t.status()).collect();
        assert_eq!(statuses, [TaskStatus::Finished, TaskStatus::Error, TaskStatus::Finished]);
        assert!(batch.sub_tasks()[1].error_message().unwrap().contains("bad peak list"));
    }

    #[test]
    fn closed_provided_pool_cancels_every_sub_task() {
        let controller = controller(1);
        let closed = Arc::new(Executor::bounded("closed", 1).unwrap());
        closed.shutdown();
        let counter = Arc::new(AtomicUsize::new(0));
        let batch = ThreadPoolTask::provided(
            Arc::clone(&controller),
            "closed pool",
            closed,
            false,
            counting_tasks(3, &counter),
        );

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        assert!(batch.sub_tasks().iter().all(|t| t.status() == TaskStatus::Canceled));
        assert!(batch.sub_tasks().iter().all(|t| t.handle().is_none()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(batch.finished_count(), 0);

        let metrics = controller.metrics();
        assert_eq!(metrics.tasks_rejected, 3);
        assert_eq!(metrics.tasks_submitted, 0);
    }

    #[test]
    fn high_sub_task_rejected_by_closed_high_priority_pool() {
        let controller = controller(1);
        controller.high_priority_executor().shutdown();
        let batch = ThreadPoolTask::fixed(
            Arc::clone(&controller),
            "high refused",
            1,
            vec![noop(TaskPriority::High), noop(TaskPriority::Normal)],
        )
        .unwrap();

        assert!(batch.run().is_ok());
        assert_eq!(batch.status(), TaskStatus::Finished);
        let statuses: Vec<_> = batch.sub_tasks().iter().map(|t| t.status()).collect();
        assert_eq!(statuses, [TaskStatus::Canceled, TaskStatus::Finished]);

        let metrics = controller.metrics();
        assert_eq!(metrics.tasks_rejected, 1);
        assert_eq!(metrics.tasks_submitted, 1);
    }
}
