//! Background worker for tasks that outlive the request that queued them.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, with periodic tick
//! callbacks, and the `TaskRunner` that executes queued [`Task`]s against a
//! worker context derived from the task's origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tenantbus_core::{Context, Facilities, Origin, Result, Services};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::bus::Bus;
use super::operation::Operation;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via a bounded mpsc channel.
///
/// The spawned loop runs one task at a time, calls `on_tick` at the configured
/// interval, and exits when `shutdown` is cancelled or the channel closes.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker. Cancelling `shutdown` (or calling [`stop`](Self::stop))
    /// ends the loop after the current task.
    pub fn start(
        mut runnable: R,
        tick_interval_ms: u64,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let stop = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(std::time::Duration::from_millis(
                tick_interval_ms.max(1),
            ));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown,
            handle: Some(handle),
        }
    }

    /// Queue a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) if !self.shutdown.is_cancelled() => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            _ => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker, cancelling the task in flight, and wait for the loop to exit.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Work executed by a [`TaskRunner`] on a worker context.
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>, bus: &Bus, ctx: &Context) -> Result<()>;
}

/// A named job plus the identity of the request that queued it.
pub struct Task {
    pub name: String,
    pub origin: Option<Origin>,
    job: Box<dyn Job>,
}

impl Task {
    /// Build a task. With `origin`, the worker context inherits its user,
    /// tenant, request marker and session/user/tenant log properties.
    pub fn new(name: impl Into<String>, origin: Option<&Context>, job: impl Job) -> Self {
        Self {
            name: name.into(),
            origin: origin.map(Context::origin),
            job: Box::new(job),
        }
    }

    /// A task that dispatches one operation and discards its output.
    pub fn dispatch<O: Operation>(name: impl Into<String>, origin: Option<&Context>, op: O) -> Self {
        Self::new(name, origin, DispatchJob(op))
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

struct DispatchJob<O>(O);

#[async_trait]
impl<O: Operation> Job for DispatchJob<O> {
    async fn run(self: Box<Self>, bus: &Bus, ctx: &Context) -> Result<()> {
        bus.dispatch(ctx, self.0).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

/// Counters kept by a [`TaskRunner`].
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

/// Runs each task on a context derived from the task's origin.
///
/// Task contexts hang off the runner's own cancellation token, never off the
/// origin request's, so a finished or aborted request does not cancel work it
/// queued.
pub struct TaskRunner {
    worker_id: String,
    bus: Bus,
    facilities: Arc<Facilities>,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
}

impl TaskRunner {
    #[must_use]
    pub fn new(
        worker_id: impl Into<String>,
        bus: Bus,
        facilities: Arc<Facilities>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            bus,
            facilities,
            cancel,
            stats: Arc::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl BackgroundRunnable for TaskRunner {
    type Task = Task;

    async fn run(&mut self, task: Task) {
        let mut ctx = Context::derive_with(
            task.origin.as_ref(),
            &self.worker_id,
            &task.name,
            self.cancel.child_token(),
        );
        ctx.attach_services(Services::new(self.facilities.clone()));

        let span = ctx.span();
        let result = task.job.run(&self.bus, &ctx).instrument(span.clone()).await;
        let stats = &self.stats;
        stats.processed.fetch_add(1, Ordering::Relaxed);
        span.in_scope(|| match result {
            Ok(()) => tracing::debug!("task completed"),
            Err(err) if err.is_cancelled() => {
                stats.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::info!("task cancelled");
            }
            Err(err) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                // Handler errors were logged by `fail`; job errors were not.
                if err.location().is_none() {
                    ctx.log_failure(&err.traced());
                }
            }
        });
    }

    async fn on_tick(&mut self) {
        tracing::debug!(
            worker_id = self.worker_id.as_str(),
            processed = self.stats.processed.load(Ordering::Relaxed),
            failed = self.stats.failed.load(Ordering::Relaxed),
            "worker heartbeat"
        );
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        tracing::info!(worker_id = self.worker_id.as_str(), "worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
