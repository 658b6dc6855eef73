// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reporter facade.
//!
//! A [`ProgressReporter`] is a short-lived handle bound to one job: it
//! mutates state through the store and publishes the matching events through
//! the bus, so callers never interleave those two steps inconsistently.

use crate::bus::EventBus;
use crate::store::{JobStore, JobUpdate};
use chrono::Utc;
use mpl_core::JobStatus;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// A stage identifier: either a lifecycle status or a free-form label
/// (adapters report sub-steps like `"prepare"` that are not statuses).
#[derive(Debug, Clone, Copy)]
pub enum StageLabel<'a> {
    /// A lifecycle status; updates `job.status` as well as `job.stage`.
    Status(JobStatus),
    /// A free-form label; only `job.stage` changes.
    Named(&'a str),
}

impl From<JobStatus> for StageLabel<'_> {
    fn from(status: JobStatus) -> Self {
        Self::Status(status)
    }
}

impl<'a> From<&'a str> for StageLabel<'a> {
    fn from(label: &'a str) -> Self {
        // A label that spells a status acts as one.
        label
            .parse::<JobStatus>()
            .map_or(Self::Named(label), Self::Status)
    }
}

/// Facade that mutates job state and emits the matching events.
pub struct ProgressReporter {
    job_id: String,
    store: Arc<JobStore>,
    bus: Arc<EventBus>,
}

impl ProgressReporter {
    /// Bind a reporter to `(job_id, store, bus)`.
    #[must_use]
    pub fn new(job_id: impl Into<String>, store: Arc<JobStore>, bus: Arc<EventBus>) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            bus,
        }
    }

    /// The job this reporter is bound to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Update stage/progress/message (and status, for status-shaped stages),
    /// then publish a `status` event carrying the job snapshot.
    ///
    /// Terminal transitions additionally publish `done` or `failed` with the
    /// same data.
    pub async fn stage<'a>(
        &self,
        stage: impl Into<StageLabel<'a>>,
        progress: f64,
        message: &str,
        payload: Option<Value>,
    ) {
        let mut update = JobUpdate::default()
            .progress(progress)
            .message(message.to_string());
        match stage.into() {
            StageLabel::Status(status) => {
                update = update.status(status);
            }
            StageLabel::Named(label) => {
                update = update.stage(label.to_string());
            }
        }
        let Some(job) = self.store.update(&self.job_id, update) else {
            return;
        };

        let mut data = snapshot_data(&job);
        if let Some(payload) = payload {
            data["payload"] = payload;
        }
        self.bus.publish(&self.job_id, "status", data.clone());
        match job.status {
            JobStatus::Done => self.bus.publish(&self.job_id, "done", data),
            JobStatus::Failed => self.bus.publish(&self.job_id, "failed", data),
            _ => {}
        }
    }

    /// Append a line to the job's log ring and publish a `log` event.
    pub async fn log(&self, line: &str) {
        let Some(job) = self.store.append_log(&self.job_id, line) else {
            return;
        };
        let mut data = snapshot_data(&job);
        data["line"] = Value::String(line.to_string());
        self.bus.publish(&self.job_id, "log", data);
    }

    /// Merge a value into the job's asset tree and publish an `asset` event.
    pub async fn asset(&self, kind: &str, value: Value, meta: Option<Map<String, Value>>) {
        let Some(job) = self
            .store
            .set_asset(&self.job_id, kind, value.clone(), meta.clone())
        else {
            return;
        };
        let mut data = snapshot_data(&job);
        data["kind"] = Value::String(kind.to_string());
        data["value"] = value;
        if let Some(meta) = meta {
            data["meta"] = Value::Object(meta);
        }
        self.bus.publish(&self.job_id, "asset", data);
    }
}

/// The snapshot carried by every event (also used for the initial `status`
/// a fresh subscriber receives).
#[must_use]
pub fn snapshot_data(job: &crate::job::Job) -> Value {
    let mut data = json!({
        "job_id": job.job_id,
        "status": job.status.as_str(),
        "stage": job.stage,
        "progress": job.progress,
        "message": job.message,
        "ts": Utc::now().to_rfc3339(),
        "artifacts_partial": job.artifacts_value(),
    });
    if let Some(position) = job.queue_position {
        data["queue_position"] = json!(position);
    }
    if let Some(size) = job.queue_size {
        data["queue_size"] = json!(size);
    }
    if let Some(url) = &job.manifest_url {
        data["manifest_url"] = Value::String(url.clone());
    }
    data
}
