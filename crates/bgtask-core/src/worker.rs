//! Worker pool.
//!
//! A fixed number of tokio tasks each loop forever: take one descriptor from
//! the [`WorkQueue`], resolve its name, invoke it, repeat. A failing task is
//! logged and dropped; the worker moves straight on to the next one. There
//! is no retry and no result channel.

use crate::error::TaskError;
use crate::ipc::TaskDescriptor;
use crate::queue::WorkQueue;
use crate::resolver::{CallableResolver, TaskArgs};
use crate::Result;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Where a worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Resolving,
    Invoking,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Resolving,
            2 => WorkerState::Invoking,
            _ => WorkerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Resolving => 1,
            WorkerState::Invoking => 2,
        }
    }
}

/// Counters shared by all workers of a pool.
#[derive(Debug, Default)]
struct PoolCounters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
}

impl PoolStats {
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}

/// A fixed-size set of workers draining one queue.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    resolver: Arc<dyn CallableResolver>,
    size: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue>, resolver: Arc<dyn CallableResolver>, size: usize) -> Self {
        Self {
            queue,
            resolver,
            size,
        }
    }

    /// Spawn the workers on the current tokio runtime and return immediately.
    pub fn start(self) -> Result<WorkerPoolHandle> {
        if self.size == 0 {
            return Err(TaskError::Config {
                message: "worker pool needs at least one worker".to_string(),
            });
        }

        info!("Starting {} task workers", self.size);

        let counters = Arc::new(PoolCounters::default());
        let states: Arc<[AtomicU8]> = (0..self.size).map(|_| AtomicU8::new(0)).collect();

        let workers = (0..self.size)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: self.queue.clone(),
                    resolver: self.resolver.clone(),
                    counters: counters.clone(),
                    states: states.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Ok(WorkerPoolHandle {
            workers,
            counters,
            states,
        })
    }
}

/// Handle to running workers. Dropping it stops them.
pub struct WorkerPoolHandle {
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
    states: Arc<[AtomicU8]>,
}

impl WorkerPoolHandle {
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::SeqCst)))
            .collect()
    }

    /// Stop all workers. Tasks already handed to the blocking pool run to
    /// completion; anything still queued is abandoned.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl Drop for WorkerPoolHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    resolver: Arc<dyn CallableResolver>,
    counters: Arc<PoolCounters>,
    states: Arc<[AtomicU8]>,
}

impl Worker {
    async fn run(self) {
        debug!("Worker[{}] listening", self.id);

        loop {
            let descriptor = self.queue.dequeue().await;
            let name = descriptor.name.clone();
            let started = Instant::now();

            match self.process(descriptor).await {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "Worker[{}] processed task {} in {:?}",
                        self.id,
                        name,
                        started.elapsed()
                    );
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    error!("Worker[{}] task {} failed: {}", self.id, name, e);
                }
            }

            self.set_state(WorkerState::Idle);
        }
    }

    async fn process(&self, descriptor: TaskDescriptor) -> Result<()> {
        let TaskDescriptor { name, args, kwargs } = descriptor;
        debug!("Worker[{}] processing task {}", self.id, name);

        self.set_state(WorkerState::Resolving);
        let callable = self
            .resolver
            .resolve(&name)
            .await
            .map_err(|source| TaskError::ResolutionFailure {
                name: name.clone(),
                source,
            })?;

        self.set_state(WorkerState::Invoking);
        callable.invoke(&name, TaskArgs::new(args, kwargs)).await
    }

    fn set_state(&self, state: WorkerState) {
        self.states[self.id].store(state.as_u8(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TaskRegistry;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn wait_for_finished(handle: &WorkerPoolHandle, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().finished() < n {
            assert!(Instant::now() < deadline, "timed out: {:?}", handle.stats());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn echo_registry(log: Arc<Mutex<Vec<String>>>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register_blocking("tasks.echo", move |a: TaskArgs| {
                log.lock().unwrap().push(a.arg(0)?);
                Ok(())
            })
            .unwrap();
        registry
            .register_async("tasks.fail", |_| async {
                Err(anyhow::anyhow!("intentional failure"))
            })
            .unwrap();
        registry
            .register_blocking("tasks.panic", |_| panic!("intentional panic"))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let pool = WorkerPool::new(
            Arc::new(WorkQueue::new()),
            Arc::new(TaskRegistry::new()),
            0,
        );
        assert!(matches!(pool.start(), Err(TaskError::Config { .. })));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_worker() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(WorkQueue::new());
        let handle = WorkerPool::new(queue.clone(), Arc::new(echo_registry(log.clone())), 1)
            .start()
            .unwrap();

        queue.enqueue(TaskDescriptor::new("tasks.fail"));
        queue.enqueue(TaskDescriptor::new("tasks.panic"));
        queue.enqueue(TaskDescriptor::new("tasks.missing"));
        queue.enqueue(TaskDescriptor::new("nodots"));
        queue.enqueue(TaskDescriptor::new("tasks.echo"));
        queue.enqueue(TaskDescriptor::new("tasks.echo").arg("after").unwrap());

        wait_for_finished(&handle, 6).await;

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(
            handle.stats(),
            PoolStats {
                completed: 1,
                failed: 5
            }
        );
    }

    #[tokio::test]
    async fn test_workers_report_idle_when_drained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(WorkQueue::new());
        let handle = WorkerPool::new(queue.clone(), Arc::new(echo_registry(log)), 3)
            .start()
            .unwrap();

        queue.enqueue(TaskDescriptor::new("tasks.echo").arg("x").unwrap());
        wait_for_finished(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.size(), 3);
        assert!(handle
            .worker_states()
            .iter()
            .all(|s| *s == WorkerState::Idle));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_task_does_not_starve_pool() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let fast_done = Arc::new(tokio::sync::Notify::new());

        let mut registry = TaskRegistry::new();
        registry
            .register_blocking("tasks.block", move |_| {
                let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(10));
                Ok(())
            })
            .unwrap();
        let notify = fast_done.clone();
        registry
            .register_async("tasks.fast", move |_| {
                let notify = notify.clone();
                async move {
                    notify.notify_one();
                    Ok(())
                }
            })
            .unwrap();

        let queue = Arc::new(WorkQueue::new());
        let handle = WorkerPool::new(queue.clone(), Arc::new(registry), 2)
            .start()
            .unwrap();

        queue.enqueue(TaskDescriptor::new("tasks.block"));
        queue.enqueue(TaskDescriptor::new("tasks.fast"));

        tokio::time::timeout(Duration::from_secs(2), fast_done.notified())
            .await
            .expect("fast task should finish while the blocking task is still running");
        assert!(handle.worker_states().contains(&WorkerState::Invoking));

        release_tx.send(()).unwrap();
        wait_for_finished(&handle, 2).await;
    }
}
