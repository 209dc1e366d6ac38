//! In-memory work queue between the ingress listener and the worker pool.
//!
//! An unbounded tokio channel provides FIFO order and non-blocking enqueue.
//! Consumers share the single receiver behind an async mutex, so exactly one
//! waiting worker is parked in `recv` at a time and each descriptor is handed
//! to exactly one of them.

use crate::ipc::TaskDescriptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Multi-producer, multi-consumer FIFO of task descriptors.
#[derive(Debug)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<TaskDescriptor>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskDescriptor>>,
    pending: AtomicUsize,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Append a descriptor. Never blocks.
    pub fn enqueue(&self, descriptor: TaskDescriptor) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        trace!("Enqueue {}", descriptor.name);
        // The queue owns a receiver for as long as it owns this sender.
        if self.tx.send(descriptor).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait for the next descriptor and take it.
    pub async fn dequeue(&self) -> TaskDescriptor {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(descriptor) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                descriptor
            }
            // `self.tx` keeps the channel open, so this never resolves.
            None => std::future::pending().await,
        }
    }

    /// Take the next descriptor if one is already waiting.
    pub fn try_dequeue(&self) -> Option<TaskDescriptor> {
        let mut rx = self.rx.try_lock().ok()?;
        let descriptor = rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(descriptor)
    }

    /// Number of descriptors enqueued but not yet taken by a worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
