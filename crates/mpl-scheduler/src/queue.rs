// SPDX-License-Identifier: MIT OR Apache-2.0
//! FIFO queue with position tracking.
//!
//! The channel feeds the worker; a mirrored order list under a mutex backs
//! the 1-based queue-position broadcasts.  The mirror is what positions are
//! computed from, so a job that was pulled (or canceled before dequeue) no
//! longer counts toward `queue_size`.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Unbounded FIFO of job ids.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    order: Mutex<VecDeque<String>>,
}

impl JobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a job id; returns the queue snapshot after the append.
    ///
    /// Idempotent: an id already queued is neither duplicated in the mirror
    /// nor re-sent to the worker, so `queue_size` reflects real membership.
    pub fn enqueue(&self, job_id: &str) -> Vec<String> {
        let (snapshot, fresh) = {
            let mut order = self.lock_order();
            let fresh = !order.iter().any(|id| id == job_id);
            if fresh {
                order.push_back(job_id.to_string());
            }
            (order.iter().cloned().collect(), fresh)
        };
        if fresh {
            let _ = self.tx.send(job_id.to_string());
        }
        snapshot
    }

    /// Wait for the next job id; `None` when the queue is closed.
    pub async fn pull(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    /// Drop a job id from the order mirror; returns the remaining snapshot.
    pub fn remove(&self, job_id: &str) -> Vec<String> {
        let mut order = self.lock_order();
        order.retain(|id| id != job_id);
        order.iter().cloned().collect()
    }

    /// Number of ids still queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_order().len()
    }

    /// Whether the queue mirror is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_order().is_empty()
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.order
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
