// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job event fan-out.
//!
//! Unlike a broadcast channel, subscribers are keyed by job id and each gets
//! its own unbounded queue, so one slow consumer never blocks the publisher
//! or its siblings.  The subscriber-set mutex is held only to snapshot the
//! set; pushes happen after it is released.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// One event on a job's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    /// Event name: `status`, `log`, `asset`, `done`, `failed`, or `snapshot`.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

struct SubscriberEntry {
    id: u64,
    tx: mpsc::UnboundedSender<JobEvent>,
}

/// A live subscription to one job's events.
pub struct Subscription {
    job_id: String,
    id: u64,
    /// Receiving end of the subscriber queue.
    pub rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl Subscription {
    /// The job this subscription listens to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Bus-assigned subscriber id, for [`EventBus::unsubscribe_id`].
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` when the bus has dropped the subscriber set.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

/// Per-process fan-out of per-job events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<SubscriberEntry>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber queue for a job.
    #[must_use]
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.lock();
        subscribers
            .entry(job_id.to_string())
            .or_default()
            .push(SubscriberEntry { id, tx });
        Subscription {
            job_id: job_id.to_string(),
            id,
            rx,
        }
    }

    /// Remove a subscriber; an emptied job key is deleted.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_id(&subscription.job_id, subscription.id);
    }

    /// Remove a subscriber by id (for handlers that split a subscription
    /// into its receiver and a disconnect guard).
    pub fn unsubscribe_id(&self, job_id: &str, id: u64) {
        let mut subscribers = self.lock();
        if let Some(entries) = subscribers.get_mut(job_id) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                subscribers.remove(job_id);
            }
        }
    }

    /// Push an event to every subscriber of a job, non-blockingly.
    ///
    /// The subscriber set is snapshotted under the lock and released before
    /// any push; a disconnected subscriber is pruned on the next publish.
    pub fn publish(&self, job_id: &str, event: impl Into<String>, data: Value) {
        let targets: Vec<(u64, mpsc::UnboundedSender<JobEvent>)> = {
            let subscribers = self.lock();
            match subscribers.get(job_id) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| (entry.id, entry.tx.clone()))
                    .collect(),
                None => return,
            }
        };
        let event = JobEvent {
            event: event.into(),
            data,
        };
        let mut dead = Vec::new();
        for (id, tx) in &targets {
            if tx.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.lock();
            if let Some(entries) = subscribers.get_mut(job_id) {
                entries.retain(|entry| !dead.contains(&entry.id));
                if entries.is_empty() {
                    subscribers.remove(job_id);
                }
            }
        }
    }

    /// Number of live subscribers for a job.
    #[must_use]
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.lock().get(job_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SubscriberEntry>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
