//! taskpool-runner: runs a batch of synthetic tasks and reports progress.
//!
//! Useful for eyeballing pool behaviour: how many tasks run at once, how
//! a failure or a high-priority task is handled, and what the controller
//! snapshot looks like afterwards.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskpool_core::{load_dotenv, Config};
use taskpool_scheduler::{AllTasksFinished, FnTask, Task, TaskController, TaskError, TaskPriority, ThreadPoolTask};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    /// The controller's shared normal-priority pool.
    Provided,
    /// A private pool of `--batch-threads` workers.
    Fixed,
    /// One small-stack thread per task.
    Virtual,
}

/// Run a batch of sleeping tasks through a task pool.
#[derive(Parser, Debug)]
#[command(name = "taskpool-runner", version, about)]
struct Cli {
    /// Where the batch gets its threads from.
    #[arg(long, value_enum, default_value_t = Variant::Provided)]
    variant: Variant,

    /// Number of tasks in the batch.
    #[arg(long, short = 'n', default_value_t = 16)]
    tasks: usize,

    /// How long each task sleeps, in milliseconds.
    #[arg(long, default_value_t = 200)]
    task_ms: u64,

    /// Worker count for the `fixed` variant.
    #[arg(long, default_value_t = 2)]
    batch_threads: usize,

    /// Size of the shared pool; overrides TASKPOOL_THREADS.
    #[arg(long, env = "TASKPOOL_RUNNER_THREADS")]
    threads: Option<usize>,

    /// Index of a task that fails instead of finishing.
    #[arg(long)]
    fail_index: Option<usize>,

    /// Index of a task submitted at high priority.
    #[arg(long)]
    high_index: Option<usize>,

    /// Progress log interval, in milliseconds.
    #[arg(long, default_value_t = 500)]
    progress_ms: u64,
}

// ── Tasks ───────────────────────────────────────────────────────────

/// A task that sleeps in small steps, reporting progress and honouring cancel.
fn sleeping_task(index: usize, total: Duration, fails: bool, priority: TaskPriority) -> Arc<dyn Task> {
    let steps = 10u32;
    let step = total / steps;
    let task = FnTask::new(format!("sleeper #{index}"), move |me| {
        for i in 0..steps {
            if me.is_canceled() {
                return Err(TaskError::Canceled);
            }
            thread::sleep(step);
            me.set_progress(f64::from(i + 1) / f64::from(steps));
        }
        if fails {
            return Err(TaskError::failed(format!("sleeper #{index} was told to fail")));
        }
        Ok(())
    });
    Arc::new(task.with_priority(priority))
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    load_dotenv();
    let mut config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    let cli = Cli::parse();
    if let Some(threads) = cli.threads {
        config.pool.worker_threads = threads;
    }
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let controller = Arc::new(TaskController::new(config.pool.clone())?);

    let tasks: Vec<Arc<dyn Task>> = (0..cli.tasks)
        .map(|i| {
            let priority = if cli.high_index == Some(i) {
                TaskPriority::High
            } else {
                TaskPriority::Normal
            };
            sleeping_task(i, Duration::from_millis(cli.task_ms), cli.fail_index == Some(i), priority)
        })
        .collect();

    let description = format!("{} sleepers ({:?})", cli.tasks, cli.variant);
    let batch = Arc::new(match cli.variant {
        Variant::Provided => controller.create_default_task_manager_pool(description, tasks),
        Variant::Fixed => {
            ThreadPoolTask::fixed(Arc::clone(&controller), description, cli.batch_threads, tasks)?
        }
        Variant::Virtual => ThreadPoolTask::virtual_threads(Arc::clone(&controller), description, tasks),
    });

    let sub_tasks: Vec<Arc<dyn Task>> = batch.sub_tasks().iter().map(|t| Arc::clone(t.task())).collect();
    AllTasksFinished::new()
        .cancel_on_error(false)
        .on_finish(|| info!("every sleeper finished"))
        .on_error(|message| warn!(%message, "at least one sleeper failed"))
        .on_cancel(|| info!("sleepers were canceled"))
        .register(&sub_tasks);

    info!(variant = ?cli.variant, tasks = cli.tasks, "running batch");

    let runner = {
        let controller = Arc::clone(&controller);
        let batch = Arc::clone(&batch);
        thread::Builder::new()
            .name("batch-driver".into())
            .spawn(move || controller.run_task_on_this_thread_blocking(batch))
            .context("failed to spawn batch driver thread")?
    };

    let interval = Duration::from_millis(cli.progress_ms.max(1));
    while !runner.is_finished() {
        info!(
            progress = %format!("{:.0}%", batch.finished_percentage() * 100.0),
            finished = batch.finished_count(),
            total = batch.total_count(),
            tracked = controller.tracked_tasks().len(),
            "batch progress"
        );
        thread::sleep(interval);
    }

    let wrapped = runner
        .join()
        .map_err(|_| anyhow::anyhow!("batch driver thread panicked"))?;
    info!(status = %wrapped.status(), "batch done");

    for sub in batch.sub_tasks() {
        if let Some(message) = sub.error_message() {
            info!(task = %sub.description(), error = %message, "sub-task failed");
        }
    }

    let snapshot = serde_json::to_string_pretty(&controller.snapshot())?;
    println!("{snapshot}");

    controller.shutdown();
    Ok(())
}
