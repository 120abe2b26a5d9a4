//! Fixed-size pool of execution slots for handler work.
//!
//! Each slot is a worker task pulling from one shared FIFO backlog, on a
//! runtime with one thread per slot. With a single slot tasks run strictly in
//! submission order, one at a time.

use crate::error::WorkerError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

type Job = BoxFuture<'static, ()>;

/// The task panicked instead of producing a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task panicked: {0}")]
pub struct TaskPanicked(pub String);

/// Why a [`TaskHandle`] produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error(transparent)]
    Panicked(#[from] TaskPanicked),
    /// The pool shut down without draining before the task ran.
    #[error("task was cancelled before completion")]
    Cancelled,
}

/// Completion handle returned by [`WorkerPool::submit`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskPanicked>>,
}

impl<T> TaskHandle<T> {
    pub async fn join(self) -> Result<T, TaskError> {
        match self.rx.await {
            Ok(outcome) => outcome.map_err(TaskError::from),
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    /// Blocks the current thread until the task finishes. Must not be called
    /// from inside an async runtime.
    pub fn wait(self) -> Result<T, TaskError> {
        match self.rx.blocking_recv() {
            Ok(outcome) => outcome.map_err(TaskError::from),
            Err(_) => Err(TaskError::Cancelled),
        }
    }
}

pub struct WorkerPool {
    size: usize,
    runtime: Runtime,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub const DEFAULT_SIZE: usize = 10;

    /// Starts `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self, WorkerError> {
        let size = size.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name("relay-worker")
            .enable_all()
            .build()
            .map_err(WorkerError::Runtime)?;

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let backlog = Arc::new(Mutex::new(rx));
        let workers = (0..size)
            .map(|slot| runtime.spawn(worker_loop(slot, backlog.clone())))
            .collect();

        log::debug!("Worker pool started with {} slot(s)", size);
        Ok(Self {
            size,
            runtime,
            jobs: Some(tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        self.jobs.is_none()
    }

    /// Queues `task`. Never blocks; when every slot is busy the task waits in
    /// the backlog.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit_with_callback(task, move |outcome| {
            // The caller may have dropped the handle.
            let _ = tx.send(outcome);
        })?;
        Ok(TaskHandle { rx })
    }

    /// Queues `task` and runs `on_complete` on the worker right after it
    /// finishes, whether it returned or panicked.
    pub fn submit_with_callback<F, T, C>(&self, task: F, on_complete: C) -> Result<(), WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(Result<T, TaskPanicked>) + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(WorkerError::PoolShutDown)?;
        let job = async move {
            let outcome = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .map_err(|panic| TaskPanicked(panic_message(panic.as_ref())));
            on_complete(outcome);
        }
        .boxed();
        jobs.send(job).map_err(|_| WorkerError::PoolShutDown)
    }

    /// Stops accepting tasks. With `drain`, blocks until every queued task
    /// (and its completion callback) has run; otherwise aborts the workers
    /// and drops whatever is still queued.
    ///
    /// Must not be called from inside an async runtime.
    pub fn shutdown(&mut self, drain: bool) {
        if self.is_shut_down() {
            return;
        }
        let workers = self.close_submissions();
        if drain {
            log::debug!("Draining worker pool...");
            self.runtime.block_on(async {
                for worker in workers {
                    if let Err(e) = worker.await {
                        log::error!("Worker exited abnormally: {}", e);
                    }
                }
            });
        } else {
            for worker in workers {
                worker.abort();
            }
        }
        log::debug!("Worker pool shut down");
    }
}

impl WorkerPool {
    /// Stops accepting tasks and hands back the worker tasks, which finish
    /// once the backlog is empty. Lets a caller drain the pool from its own
    /// runtime while it keeps serving requests from the workers.
    pub(crate) fn close_submissions(&mut self) -> Vec<JoinHandle<()>> {
        self.jobs = None;
        std::mem::take(&mut self.workers)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(slot: usize, backlog: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        // Hold the lock only while waiting for the next job
        let job = { backlog.lock().await.recv().await };
        match job {
            Some(job) => job.await,
            None => break,
        }
    }
    log::trace!("Worker slot {} stopped", slot);
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
