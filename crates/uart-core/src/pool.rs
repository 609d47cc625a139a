//! Bounded pool of executors for fire-and-forget work.
//!
//! Tasks are queued on a bounded channel whose capacity equals the number of
//! executors. When the queue is full, [`WorkerPool::submit`] waits for a slot
//! instead of dropping the task; [`WorkerPool::try_submit`] fails fast instead.
//!
//! ## Shutdown
//!
//! [`WorkerPool::stop`] is best effort: each executor finishes the task it is
//! running and exits. Tasks still queued at that point are dropped without
//! running, and any further submission fails with [`PoolError::Stopped`].
//!
//! ## Panics
//!
//! A panicking task is caught and logged. The executor that ran it keeps
//! pulling tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

/// A queued unit of work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<Task>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Stopped,
    #[error("worker pool queue is full")]
    Full,
}

/// Fixed number of executors draining a shared bounded queue.
pub struct WorkerPool {
    size: usize,
    task_tx: mpsc::Sender<Task>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `size` executors on the current runtime. A size of zero is raised to one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (task_tx, task_rx) = mpsc::channel::<Task>(size);
        let task_rx: SharedReceiver = Arc::new(AsyncMutex::new(task_rx));
        let (stop_tx, stop_rx) = watch::channel(false);

        let workers = (0..size)
            .map(|id| tokio::spawn(run_worker(id, task_rx.clone(), stop_rx.clone())))
            .collect();

        tracing::debug!(size, "worker pool started");

        Self {
            size,
            task_tx,
            stop_tx,
            workers: Mutex::new(workers),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Queue a task, waiting for a free slot if the queue is full.
    ///
    /// Fails with [`PoolError::Stopped`] if the pool is stopped before the task
    /// is queued, including while this call is waiting for a slot.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            return Err(PoolError::Stopped);
        }

        let task: Task = Box::pin(task);
        tokio::select! {
            biased;
            _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => Err(PoolError::Stopped),
            sent = self.task_tx.send(task) => sent.map_err(|_| PoolError::Stopped),
        }
    }

    /// Queue a task only if a slot is free right now.
    ///
    /// Fails with [`PoolError::Full`] instead of waiting when the queue is at
    /// capacity.
    pub fn try_submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }

        let task: Task = Box::pin(task);
        self.task_tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Full,
            mpsc::error::TrySendError::Closed(_) => PoolError::Stopped,
        })
    }

    /// Signal every executor to exit after its current task.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            tracing::debug!(size = self.size, "worker pool stopping");
        }
    }

    /// Stop the pool and wait for every executor to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker ended abnormally");
            }
        }
    }
}

async fn run_worker(id: usize, task_rx: SharedReceiver, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let task = tokio::select! {
            biased;
            _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => break,
            task = async { task_rx.lock().await.recv().await } => task,
        };

        // Channel closed: every sender is gone.
        let Some(task) = task else { break };

        // Stop may have landed while this worker was waiting on the queue.
        if *stop_rx.borrow() {
            break;
        }

        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            tracing::error!(
                worker = id,
                panic = %panic_message(panic.as_ref()),
                "task panicked, worker continues"
            );
        }
    }

    tracing::trace!(worker = id, "worker exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Poll;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_test::assert_pending;

    /// Occupies the pool's only executor until the returned sender fires.
    async fn block_executor(pool: &WorkerPool) -> oneshot::Sender<()> {
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = gate_rx.await;
        })
        .await
        .unwrap();
        started_rx.await.unwrap();
        gate_tx
    }

    #[tokio::test]
    async fn test_size_is_coerced_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_every_task_runs_exactly_once() {
        let pool = WorkerPool::new(3);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for i in 0..50 {
            let done_tx = done_tx.clone();
            pool.submit(async move {
                tokio::task::yield_now().await;
                let _ = done_tx.send(i);
            })
            .await
            .unwrap();
        }
        drop(done_tx);

        let mut seen: HashMap<i32, usize> = HashMap::new();
        while let Some(i) = timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("tasks should finish")
        {
            *seen.entry(i).or_default() += 1;
        }

        assert_eq!(seen.len(), 50);
        assert!(seen.values().all(|count| *count == 1));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_blocks_when_queue_full() {
        let pool = WorkerPool::new(1);
        let gate = block_executor(&pool).await;
        let (ran_tx, mut ran_rx) = mpsc::unbounded_channel();

        // Fills the single queue slot.
        let tx = ran_tx.clone();
        pool.submit(async move {
            let _ = tx.send("queued");
        })
        .await
        .unwrap();

        let tx = ran_tx.clone();
        let mut blocked = tokio_test::task::spawn(pool.submit(async move {
            let _ = tx.send("blocked");
        }));
        assert_pending!(blocked.poll());

        gate.send(()).unwrap();

        let submitted = timeout(Duration::from_secs(5), async {
            loop {
                if let Poll::Ready(result) = blocked.poll() {
                    break result;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("submit should unblock once a slot frees");
        assert_eq!(submitted, Ok(()));
        drop(blocked);

        let first = timeout(Duration::from_secs(5), ran_rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(5), ran_rx.recv()).await.unwrap();
        assert_eq!(first, Some("queued"));
        assert_eq!(second, Some("blocked"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_submit_rejects_when_queue_full() {
        let pool = WorkerPool::new(1);
        let gate = block_executor(&pool).await;

        assert_eq!(pool.try_submit(async {}), Ok(()));
        assert_eq!(pool.try_submit(async {}), Err(PoolError::Full));

        gate.send(()).unwrap();
        pool.stop();
        assert_eq!(pool.try_submit(async {}), Err(PoolError::Stopped));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_executor() {
        let pool = WorkerPool::new(1);

        pool.submit(async { panic!("task blew up") }).await.unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(42);
        })
        .await
        .unwrap();

        let value = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(value, 42);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let pool = WorkerPool::new(2);
        pool.stop();

        assert!(pool.is_stopped());
        assert_eq!(pool.submit(async {}).await, Err(PoolError::Stopped));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_tasks_are_abandoned_on_stop() {
        let pool = WorkerPool::new(1);
        let gate = block_executor(&pool).await;
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        pool.submit(async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();

        pool.stop();
        gate.send(()).unwrap();
        timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("executors should exit");

        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_waiting_submitter_is_released_by_stop() {
        let pool = Arc::new(WorkerPool::new(1));
        let gate = block_executor(&pool).await;
        pool.submit(async {}).await.unwrap();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        pool.stop();
        let result = timeout(Duration::from_secs(5), waiting).await.unwrap().unwrap();
        assert_eq!(result, Err(PoolError::Stopped));

        drop(gate);
        pool.shutdown().await;
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
