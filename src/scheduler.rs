//! Timeout-bounded worker pool.
//!
//! A fixed number of workers pull [`WorkItem`]s from a shared queue. Each
//! worker is built once by a [`WorkerFactory`] and owns its context (store
//! connection, caches) for the rest of the run. Every task runs under its
//! own deadline; a timeout or failure ends that task only, never the worker
//! or the pool.
//!
//! ```text
//!   Idle ──run()──▶ Running ──interrupt──▶ Draining ──grace──▶ Terminated
//!                      └──────────── queue empty ──────────────────┘
//! ```
//!
//! Outcomes are consumed in completion order. Progress is reported once per
//! completed chunk.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::progress::{LogProgress, ProgressEvent, ProgressReporter};

/// One filename to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub filename: String,
    pub forced: bool,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>, forced: bool) -> Self {
        Self {
            filename: filename.into(),
            forced,
        }
    }
}

/// Final state of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Timeout,
    Failed(String),
    /// Never dispatched, or aborted while the pool was draining.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// Per-task view handed to [`Worker::process`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Time left before the task is abandoned.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_zero()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Executes tasks with a context that lives as long as the worker.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Process one item. Implementations must reach an `.await` at every I/O
    /// boundary so the deadline can take effect.
    async fn process(&mut self, item: &WorkItem, task: &TaskContext) -> Result<()>;
}

/// Builds the per-worker context before the worker accepts tasks.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    type Worker: Worker;

    async fn create(&self, worker_id: usize) -> Result<Self::Worker>;
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub chunk_size: usize,
    pub task_timeout: Duration,
    pub grace_period: Duration,
}

/// Outcome of a full pool run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Every submitted item with its outcome, in completion order; items
    /// that never finished come last.
    pub outcomes: Vec<(String, TaskOutcome)>,
    pub state: SchedulerState,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn outcome(&self, filename: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(f, _)| f == filename)
            .map(|(_, o)| o)
    }

    /// Items that ran to an outcome (completed, timed out, or failed).
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != TaskOutcome::Cancelled)
            .count()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| *o == TaskOutcome::Completed)
    }

    pub fn timeouts(&self) -> usize {
        self.count(|o| *o == TaskOutcome::Timeout)
    }

    pub fn failures(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| *o == TaskOutcome::Cancelled)
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

struct Finished {
    filename: String,
    outcome: TaskOutcome,
}

/// Aborts the wrapped task when dropped, so aborting a worker also aborts
/// the task it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Scheduler {
    options: SchedulerOptions,
    state: SchedulerState,
    progress: Box<dyn ProgressReporter>,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options: SchedulerOptions {
                workers: options.workers.max(1),
                chunk_size: options.chunk_size.max(1),
                ..options
            },
            state: SchedulerState::Idle,
            progress: Box::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run every item through the pool.
    ///
    /// Returns once all workers have exited. When `shutdown` fires, no new
    /// tasks are dispatched; in-flight tasks get the grace period and are
    /// then aborted.
    pub async fn run<F: WorkerFactory>(
        &mut self,
        items: Vec<WorkItem>,
        factory: Arc<F>,
        shutdown: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let total = items.len() as u64;
        let submitted: Vec<String> = items.iter().map(|i| i.filename.clone()).collect();

        self.state = SchedulerState::Running;
        self.progress.report(ProgressEvent::Started {
            total,
            workers: self.options.workers,
        });

        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Finished>();

        let mut handles = Vec::with_capacity(self.options.workers);
        for worker_id in 0..self.options.workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                factory.clone(),
                queue.clone(),
                stop.clone(),
                tx.clone(),
                self.options.task_timeout,
            )));
        }
        drop(tx);

        let mut outcomes: Vec<(String, TaskOutcome)> = Vec::with_capacity(submitted.len());
        let mut finished: HashSet<String> = HashSet::new();
        let mut drain_deadline: Option<Instant> = None;
        let mut interrupted = false;

        loop {
            let deadline = drain_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(60 * 60 * 24 * 365));
            tokio::select! {
                message = rx.recv() => {
                    let Some(Finished { filename, outcome }) = message else {
                        break;
                    };
                    finished.insert(filename.clone());
                    outcomes.push((filename, outcome));
                    let n = outcomes.len() as u64;
                    if n % self.options.chunk_size as u64 == 0 {
                        self.progress.report(ProgressEvent::ChunkCompleted { n, total });
                    }
                }
                _ = shutdown.cancelled(), if drain_deadline.is_none() => {
                    interrupted = true;
                    self.state = SchedulerState::Draining;
                    stop.cancel();
                    self.progress.report(ProgressEvent::Draining {
                        n: outcomes.len() as u64,
                        total,
                    });
                    drain_deadline = Some(Instant::now() + self.options.grace_period);
                }
                _ = tokio::time::sleep_until(deadline), if drain_deadline.is_some() => {
                    warn!("Grace period expired; terminating remaining workers");
                    for handle in &handles {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        for handle in handles {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("Worker panicked outside a task: {}", err);
                } else {
                    debug!("Worker terminated: {}", err);
                }
            }
        }
        while let Ok(Finished { filename, outcome }) = rx.try_recv() {
            finished.insert(filename.clone());
            outcomes.push((filename, outcome));
        }

        for filename in submitted {
            if !finished.contains(&filename) {
                outcomes.push((filename, TaskOutcome::Cancelled));
            }
        }

        self.state = SchedulerState::Terminated;
        let report = RunReport {
            outcomes,
            state: self.state,
            interrupted,
            elapsed: started.elapsed(),
        };
        info!(
            "Worker pool finished: {} completed, {} timed out, {} failed, {} cancelled",
            report.completed(),
            report.timeouts(),
            report.failures(),
            report.cancelled()
        );
        report
    }
}

async fn worker_loop<F: WorkerFactory>(
    worker_id: usize,
    factory: Arc<F>,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    stop: CancellationToken,
    tx: mpsc::UnboundedSender<Finished>,
    timeout: Duration,
) {
    let mut worker = match factory.create(worker_id).await {
        Ok(worker) => Some(worker),
        Err(err) => {
            error!("Worker {} failed to initialize: {:#}", worker_id, err);
            return;
        }
    };

    loop {
        if stop.is_cancelled() {
            break;
        }
        let next = queue.lock().map(|mut q| q.pop_front()).unwrap_or(None);
        let Some(item) = next else {
            break;
        };

        let mut current = match worker.take() {
            Some(w) => w,
            None => match factory.create(worker_id).await {
                Ok(w) => w,
                Err(err) => {
                    error!("Worker {} failed to re-initialize: {:#}", worker_id, err);
                    // Put the item back for the remaining workers.
                    if let Ok(mut q) = queue.lock() {
                        q.push_front(item);
                    }
                    return;
                }
            },
        };

        let filename = item.filename.clone();
        let task = TaskContext::new(timeout);
        let task_cancel = task.cancel.clone();

        // The task runs on its own tokio task so a panic is contained there.
        let mut child = AbortOnDrop(tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, current.process(&item, &task)).await;
            (current, result)
        }));

        let outcome = match (&mut child.0).await {
            Ok((w, Ok(Ok(())))) => {
                worker = Some(w);
                TaskOutcome::Completed
            }
            Ok((w, Ok(Err(err)))) => {
                worker = Some(w);
                error!("Exception ({:#}) for filename {}", err, filename);
                TaskOutcome::Failed(format!("{:#}", err))
            }
            Ok((w, Err(_elapsed))) => {
                worker = Some(w);
                task_cancel.cancel();
                warn!(
                    "Processing {} exceeded the {:?} deadline and was abandoned",
                    filename, timeout
                );
                TaskOutcome::Timeout
            }
            Err(join_err) => {
                // Context is gone with the panicked task; rebuilt on next item.
                error!("Task for {} panicked: {}", filename, join_err);
                TaskOutcome::Failed(format!("panic: {}", join_err))
            }
        };

        if tx.send(Finished { filename, outcome }).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SleepyWorker {
        plan: Arc<dyn Fn(&str) -> Behaviour + Send + Sync>,
        processed: Arc<AtomicUsize>,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Sleep(u64),
        Fail,
        Panic,
    }

    #[async_trait]
    impl Worker for SleepyWorker {
        async fn process(&mut self, item: &WorkItem, _task: &TaskContext) -> Result<()> {
            match (self.plan)(&item.filename) {
                Behaviour::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Behaviour::Fail => bail!("analysis failed"),
                Behaviour::Panic => panic!("boom"),
            }
        }
    }

    struct Factory {
        plan: Arc<dyn Fn(&str) -> Behaviour + Send + Sync>,
        created: Arc<AtomicUsize>,
        processed: Arc<AtomicUsize>,
        failing_ids: Vec<usize>,
    }

    impl Factory {
        fn new(plan: impl Fn(&str) -> Behaviour + Send + Sync + 'static) -> Self {
            Self {
                plan: Arc::new(plan),
                created: Arc::new(AtomicUsize::new(0)),
                processed: Arc::new(AtomicUsize::new(0)),
                failing_ids: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl WorkerFactory for Factory {
        type Worker = SleepyWorker;

        async fn create(&self, worker_id: usize) -> Result<SleepyWorker> {
            if self.failing_ids.contains(&worker_id) {
                bail!("store unreachable");
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(SleepyWorker {
                plan: self.plan.clone(),
                processed: self.processed.clone(),
            })
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("task-{:02}", i), false))
            .collect()
    }

    fn options(workers: usize, timeout_ms: u64) -> SchedulerOptions {
        SchedulerOptions {
            workers,
            chunk_size: 3,
            task_timeout: Duration::from_millis(timeout_ms),
            grace_period: Duration::from_millis(100),
        }
    }

    struct Recorder(Arc<Mutex<Vec<ProgressEvent>>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn slow_task_times_out_without_blocking_others() {
        let factory = Arc::new(Factory::new(|name| {
            if name == "task-03" {
                Behaviour::Sleep(10_000)
            } else {
                Behaviour::Sleep(20)
            }
        }));
        let mut scheduler = Scheduler::new(options(2, 300));
        let report = scheduler
            .run(items(10), factory.clone(), CancellationToken::new())
            .await;

        assert_eq!(report.outcome("task-03"), Some(&TaskOutcome::Timeout));
        assert_eq!(report.completed(), 9);
        assert_eq!(report.processed(), 10);
        assert_eq!(report.state, SchedulerState::Terminated);
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert!(report.elapsed < Duration::from_secs(3));
        // Workers survive the timeout: only the initial two were built.
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interrupt_drains_and_terminates() {
        let factory = Arc::new(Factory::new(|name| match name {
            "task-00" | "task-01" => Behaviour::Sleep(10),
            _ => Behaviour::Sleep(10_000),
        }));
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let mut scheduler = Scheduler::new(options(4, 60_000));
        let report = scheduler.run(items(10), factory, shutdown).await;

        assert!(report.interrupted);
        assert_eq!(report.state, SchedulerState::Terminated);
        assert_eq!(report.completed(), 2);
        assert_eq!(report.cancelled(), 8);
        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.outcome("task-00"), Some(&TaskOutcome::Completed));
        assert!(report.elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failures_and_panics_are_contained() {
        let factory = Arc::new(Factory::new(|name| match name {
            "task-02" => Behaviour::Fail,
            "task-04" => Behaviour::Panic,
            _ => Behaviour::Sleep(5),
        }));
        let mut scheduler = Scheduler::new(options(2, 5_000));
        let report = scheduler
            .run(items(10), factory.clone(), CancellationToken::new())
            .await;

        assert_eq!(report.completed(), 8);
        assert_eq!(report.failures(), 2);
        assert!(matches!(
            report.outcome("task-02"),
            Some(TaskOutcome::Failed(reason)) if reason.contains("analysis failed")
        ));
        assert_eq!(factory.processed.load(Ordering::SeqCst), 8);
        // The panicking worker's context was rebuilt once.
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn results_arrive_in_completion_order() {
        let factory = Arc::new(Factory::new(|name| match name {
            "task-00" => Behaviour::Sleep(300),
            _ => Behaviour::Sleep(5),
        }));
        let mut scheduler = Scheduler::new(options(2, 5_000));
        let report = scheduler
            .run(items(4), factory, CancellationToken::new())
            .await;

        assert_eq!(report.completed(), 4);
        assert_eq!(report.outcomes.last().unwrap().0, "task-00");
    }

    #[tokio::test]
    async fn failed_initialization_leaves_work_to_others() {
        let mut factory = Factory::new(|_| Behaviour::Sleep(5));
        factory.failing_ids = vec![0];
        let mut scheduler = Scheduler::new(options(2, 5_000));
        let report = scheduler
            .run(items(5), Arc::new(factory), CancellationToken::new())
            .await;
        assert_eq!(report.completed(), 5);
    }

    #[tokio::test]
    async fn no_workers_means_everything_cancelled() {
        let mut factory = Factory::new(|_| Behaviour::Sleep(5));
        factory.failing_ids = vec![0, 1];
        let mut scheduler = Scheduler::new(options(2, 5_000));
        let report = scheduler
            .run(items(3), Arc::new(factory), CancellationToken::new())
            .await;
        assert_eq!(report.cancelled(), 3);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.state, SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn progress_reported_per_chunk() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(Factory::new(|_| Behaviour::Sleep(1)));
        let mut scheduler =
            Scheduler::new(options(2, 5_000)).with_progress(Box::new(Recorder(events.clone())));
        scheduler
            .run(items(10), factory, CancellationToken::new())
            .await;

        let events = events.lock().unwrap();
        let chunks: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ChunkCompleted { n, .. } => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec![3, 6, 9]);
        assert_eq!(
            events[0],
            ProgressEvent::Started {
                total: 10,
                workers: 2
            }
        );
    }

    #[test]
    fn task_context_deadline() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let task = TaskContext::new(Duration::from_secs(60));
            assert!(!task.is_cancelled());
            assert!(task.remaining() > Duration::from_secs(59));
            task.cancel_token().cancel();
            assert!(task.is_cancelled());
        });
    }
}
