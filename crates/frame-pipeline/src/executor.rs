//! Scoped task runner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Task<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Runs tasks one at a time against a context owned by a single worker task.
///
/// After [`shutdown`](Self::shutdown) no task body runs, including tasks
/// that were already queued: the flag is checked when a task is submitted
/// and again right before its body executes.
pub struct ScopedTaskRunner<C> {
    tasks: mpsc::UnboundedSender<Task<C>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl<C> Clone for ScopedTaskRunner<C> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            shutdown: Arc::clone(&self.shutdown),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<C: Send + 'static> ScopedTaskRunner<C> {
    /// Start the worker on the current runtime
    pub fn spawn(context: C) -> (Self, JoinHandle<C>) {
        Self::spawn_on(&Handle::current(), context)
    }

    /// Start the worker on `handle`. The join handle yields the context once
    /// the runner is shut down.
    pub fn spawn_on(handle: &Handle, context: C) -> (Self, JoinHandle<C>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let worker = handle.spawn(run_worker(context, rx, Arc::clone(&wake)));

        let runner = Self {
            tasks: tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake,
        };
        (runner, worker)
    }

    /// Queue `task`. Returns false if the runner was already shut down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        if self.is_shutdown() {
            trace!("Runner shut down, task discarded at submit");
            return false;
        }

        let shutdown = Arc::clone(&self.shutdown);
        let guarded: Task<C> = Box::new(move |context| {
            if shutdown.load(Ordering::Acquire) {
                trace!("Runner shut down, queued task discarded");
                return;
            }
            task(context)
        });
        self.tasks.send(guarded).is_ok()
    }

    /// Suppress every task not yet started. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!("Scoped task runner shut down");
            self.wake.notify_one();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

async fn run_worker<C>(
    mut context: C,
    mut tasks: mpsc::UnboundedReceiver<Task<C>>,
    wake: Arc<Notify>,
) -> C {
    loop {
        tokio::select! {
            biased;
            _ = wake.notified() => break,
            task = tasks.recv() => match task {
                Some(task) => task(&mut context),
                None => break,
            },
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_tasks_in_order() {
        let (runner, worker) = ScopedTaskRunner::spawn(Vec::new());
        let (done_tx, done_rx) = oneshot::channel();

        for i in 0..3 {
            assert!(runner.submit(move |log: &mut Vec<u32>| log.push(i)));
        }
        runner.submit(move |_: &mut Vec<u32>| {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        runner.shutdown();
        assert_eq!(worker.await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (runner, worker) = ScopedTaskRunner::spawn(0u32);

        runner.shutdown();
        assert!(!runner.submit(|count: &mut u32| *count += 1));
        assert!(runner.is_shutdown());
        assert_eq!(worker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queued_task_suppressed_by_shutdown() {
        // Single-threaded runtime: the worker cannot run before we yield
        let (runner, worker) = ScopedTaskRunner::spawn(0u32);

        assert!(runner.submit(|count: &mut u32| *count += 1));
        runner.shutdown();

        assert_eq!(worker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_from_inside_task_stops_the_rest() {
        let (runner, worker) = ScopedTaskRunner::spawn(Vec::new());

        let inner = runner.clone();
        runner.submit(move |log: &mut Vec<&'static str>| {
            log.push("first");
            inner.shutdown();
        });
        runner.submit(|log: &mut Vec<&'static str>| log.push("second"));

        assert_eq!(worker.await.unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (runner, worker) = ScopedTaskRunner::spawn(());
        runner.shutdown();
        runner.shutdown();
        assert!(worker.await.is_ok());
    }
}
