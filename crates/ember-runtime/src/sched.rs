//! Task scheduler over a multi-threaded tokio runtime.
//!
//! Tasks are futures producing a `Value`. Each one is wrapped so that its
//! lifecycle is observable through a [`TaskHandle`] and its result is
//! published exactly once, whether it completes, fails, panics, or is
//! dropped by a shutdown.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use ember_value::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;

use crate::config::RuntimeConfig;
use crate::diag::diag;
use crate::metrics::{hit, Metrics};

pub type TaskResult = Result<Value, TaskError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scheduler is shut down")]
pub struct ShutDown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Completed,
            _ => TaskState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Ready => 0,
            TaskState::Running => 1,
            TaskState::Suspended => 2,
            TaskState::Completed => 3,
            TaskState::Failed => 4,
        }
    }

    pub fn is_settled(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

struct TaskShared {
    id: u64,
    state: AtomicU8,
    outcome: watch::Sender<Option<TaskResult>>,
    observed: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl TaskShared {
    fn set_state(&self, s: TaskState) {
        self.state.store(s.as_u8(), Ordering::Release);
    }
}

/// Shared view of a spawned task. Cloning is cheap; dropping every handle
/// does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.shared.outcome.borrow().is_some()
    }

    /// The result if the task has settled.
    pub fn try_join(&self) -> Option<TaskResult> {
        let out = self.shared.outcome.borrow().clone();
        if out.is_some() {
            self.shared.observed.store(true, Ordering::Relaxed);
        }
        out
    }

    /// Suspends until the task settles.
    pub async fn join(&self) -> TaskResult {
        self.shared.observed.store(true, Ordering::Relaxed);
        let mut rx = self.shared.outcome.subscribe();
        let settled = rx.wait_for(|o| o.is_some()).await;
        match settled {
            Ok(out) => out.clone().unwrap_or(Err(TaskError::Cancelled)),
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    pub fn abort(&self) {
        let abort = self.shared.abort.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(a) = abort.as_ref() {
            a.abort();
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

struct TaskFuture<F> {
    fut: Pin<Box<F>>,
    shared: Arc<TaskShared>,
    metrics: Arc<Metrics>,
    settled: bool,
}

impl<F> TaskFuture<F> {
    fn settle(&mut self, result: TaskResult) {
        self.settled = true;
        match &result {
            Ok(_) => {
                self.shared.set_state(TaskState::Completed);
                hit(&self.metrics.tasks_completed);
            }
            Err(e) => {
                self.shared.set_state(TaskState::Failed);
                hit(&self.metrics.tasks_failed);
                if !self.shared.observed.load(Ordering::Relaxed) && *e != TaskError::Cancelled {
                    diag!("task {} {e}", self.shared.id);
                }
            }
        }
        self.shared.outcome.send_replace(Some(result));
    }
}

impl<F: Future<Output = TaskResult>> Future for TaskFuture<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.settled {
            return Poll::Ready(());
        }
        this.shared.set_state(TaskState::Running);
        let fut = &mut this.fut;
        match catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(cx))) {
            Ok(Poll::Pending) => {
                this.shared.set_state(TaskState::Suspended);
                Poll::Pending
            }
            Ok(Poll::Ready(result)) => {
                this.settle(result);
                Poll::Ready(())
            }
            Err(payload) => {
                this.settle(Err(TaskError::Panicked(panic_message(payload.as_ref()))));
                Poll::Ready(())
            }
        }
    }
}

impl<F> Drop for TaskFuture<F> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(TaskError::Cancelled));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct Scheduler {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: Handle,
    metrics: Arc<Metrics>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(cfg: &RuntimeConfig) -> std::io::Result<Scheduler> {
        Scheduler::with_metrics(cfg, Arc::new(Metrics::default()))
    }

    pub fn with_metrics(cfg: &RuntimeConfig, metrics: Arc<Metrics>) -> std::io::Result<Scheduler> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(cfg.workers.max(1))
            .thread_name("ember-worker")
            .enable_all()
            .build()?;
        let handle = rt.handle().clone();
        Ok(Scheduler {
            runtime: Mutex::new(Some(rt)),
            handle,
            metrics,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn spawn<F>(&self, fut: F) -> TaskHandle
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let (outcome, _) = watch::channel(None);
        let shared = Arc::new(TaskShared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(TaskState::Ready.as_u8()),
            outcome,
            observed: AtomicBool::new(false),
            abort: Mutex::new(None),
        });
        hit(&self.metrics.tasks_spawned);
        let task = TaskFuture {
            fut: Box::pin(fut),
            shared: shared.clone(),
            metrics: self.metrics.clone(),
            settled: false,
        };
        let join = self.handle.spawn(task);
        *shared.abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(join.abort_handle());
        TaskHandle { shared }
    }

    /// Blocks the calling thread until the task settles. After shutdown a
    /// task that never settled reports `Cancelled`.
    pub fn block_on(&self, task: &TaskHandle) -> TaskResult {
        if let Some(out) = task.try_join() {
            return out;
        }
        let task = task.clone();
        self.block_on_future(async move { task.join().await })
            .unwrap_or(Err(TaskError::Cancelled))
    }

    /// Drives `fut` to completion from synchronous code. Inside one of our
    /// workers the thread leaves the pool for the duration, so the
    /// remaining workers keep running other tasks. Refused once the
    /// scheduler is shut down.
    pub fn block_on_future<F>(&self, fut: F) -> Result<F::Output, ShutDown>
    where
        F: Future + Send,
        F::Output: Send,
    {
        if self.is_shut_down() {
            return Err(ShutDown);
        }
        let out = match Handle::try_current() {
            Err(_) => self.handle.block_on(fut),
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::CurrentThread => std::thread::scope(|s| {
                    let h = &self.handle;
                    match s.spawn(move || h.block_on(fut)).join() {
                        Ok(out) => out,
                        Err(payload) => std::panic::resume_unwind(payload),
                    }
                }),
                _ => tokio::task::block_in_place(|| self.handle.block_on(fut)),
            },
        };
        Ok(out)
    }

    /// Stops the workers. Tasks that have not settled are dropped and their
    /// handles resolve to `Cancelled`. Returns false if already shut down.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let rt = self.runtime.lock().unwrap_or_else(|e| e.into_inner()).take();
        match rt {
            Some(rt) => {
                rt.shutdown_timeout(timeout);
                true
            }
            None => false,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let rt = self.runtime.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rt) = rt {
            rt.shutdown_background();
        }
    }
}

pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

pub async fn yield_now() {
    tokio::task::yield_now().await
}

/// One-shot event. Once fired it stays fired.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Signal {
        Signal::default()
    }

    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Signaled,
}

pub async fn sleep_or_signal(duration: Duration, signal: &Signal) -> Wake {
    tokio::select! {
        biased;
        _ = signal.wait() => Wake::Signaled,
        _ = sleep(duration) => Wake::Elapsed,
    }
}
