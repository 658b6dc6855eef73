// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job registry.
//!
//! All mutation goes through one mutex, held only for the duration of the
//! in-memory update; the mutation path never suspends and never touches the
//! filesystem while holding the lock.

use crate::job::Job;
use crate::{LOGS_TAIL_LIMIT, MAX_LOG_LINES};
use chrono::Utc;
use mpl_core::{AssetRef, JobStatus, UirValidationError, stable_hash};
use mpl_fs::manifest::{manifest_url, write_manifest};
use mpl_fs::{RuntimePaths, ensure_job_dirs, write_uir};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Failure to create a job.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// The submitted UIR did not validate.
    #[error(transparent)]
    Validation(#[from] UirValidationError),
    /// The job directory or initial records could not be written.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Atomic multi-field update applied under the store lock.
///
/// `queue_position`/`queue_size` use a double `Option` so callers can
/// distinguish "leave as is" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    /// New status; triggers the transition bookkeeping.
    pub status: Option<JobStatus>,
    /// Explicit stage label; otherwise a new status mirrors into `stage`.
    pub stage: Option<String>,
    /// New progress; clamped to `[0, 1]`.
    pub progress: Option<f64>,
    /// New message.
    pub message: Option<String>,
    /// Queue position update.
    pub queue_position: Option<Option<usize>>,
    /// Queue size update.
    pub queue_size: Option<Option<usize>>,
    /// New manifest path.
    pub manifest_path: Option<PathBuf>,
    /// New manifest URL.
    pub manifest_url: Option<String>,
}

impl JobUpdate {
    /// Set the status.
    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set an explicit stage label.
    #[must_use]
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Set the progress.
    #[must_use]
    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set or clear the queue position/size pair.
    #[must_use]
    pub fn queue(mut self, position: Option<usize>, size: Option<usize>) -> Self {
        self.queue_position = Some(position);
        self.queue_size = Some(size);
        self
    }
}

/// In-memory registry of jobs.
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
    paths: RuntimePaths,
    max_log_lines: usize,
}

impl JobStore {
    /// Create a store rooted at the given runtime paths.
    #[must_use]
    pub fn new(paths: RuntimePaths) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            paths,
            max_log_lines: MAX_LOG_LINES,
        }
    }

    /// The runtime paths this store writes under.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Validate a submission, assign a job id, plan stages, create the job
    /// directory with `uir.json` and a skeletal manifest, and register the
    /// job as `QUEUED`.
    ///
    /// # Errors
    ///
    /// [`CreateError::Validation`] when the UIR is invalid,
    /// [`CreateError::Io`] when the job directory cannot be prepared.
    pub fn create(&self, payload: &Value) -> Result<Job, CreateError> {
        let mut uir = mpl_core::parse_uir(payload)?;

        let job_id = match uir.job_id() {
            Some(id) if !id.is_empty() && id != "pending" => id.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        };
        uir.job.id = Some(job_id.clone());
        if uir.job.created_at.is_none() {
            uir.job.created_at = Some(Utc::now().to_rfc3339());
        }

        let uir_hash = stable_hash(&uir).map_err(|e| CreateError::Io(e.into()))?;
        let stage_plan = mpl_planner::plan_stages(&uir);

        let job_dir = ensure_job_dirs(&self.paths.assets_dir, &job_id)?;
        write_uir(&job_dir, &uir)?;
        let manifest_path = write_manifest(&job_dir, &uir, JobStatus::Queued, &[], &[])?;

        let event_stream = uir
            .hooks
            .as_ref()
            .and_then(|h| h.event_stream)
            .unwrap_or(false);

        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            stage: JobStatus::Queued.as_str().to_string(),
            progress: 0.0,
            message: String::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            uir,
            uir_hash,
            manifest_path: Some(manifest_path),
            manifest_url: Some(manifest_url(&job_id)),
            stage_plan,
            logs: VecDeque::new(),
            assets: Map::new(),
            queue_position: None,
            queue_size: None,
            event_stream,
        };

        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        jobs.insert(job_id, job.clone());
        Ok(job)
    }

    /// Snapshot a job by id.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    /// Snapshot all jobs, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        jobs.values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect()
    }

    /// Apply an atomic multi-field update.
    ///
    /// Status transitions maintain the lifecycle bookkeeping: a new status
    /// mirrors into `stage` unless the update carries its own, `started_at`
    /// is set when leaving `QUEUED`, and `ended_at` is set exactly once on
    /// the first terminal status.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let job = jobs.get_mut(job_id)?;

        if let Some(status) = update.status {
            job.status = status;
            if update.stage.is_none() {
                job.stage = status.as_str().to_string();
            }
            if job.started_at.is_none() && status != JobStatus::Queued {
                job.started_at = Some(Utc::now());
            }
            if status.is_terminal() && job.ended_at.is_none() {
                job.ended_at = Some(Utc::now());
            }
        }
        if let Some(stage) = update.stage {
            job.stage = stage;
        }
        if let Some(progress) = update.progress {
            job.progress = progress.clamp(0.0, 1.0);
        }
        if let Some(message) = update.message {
            job.message = message;
        }
        if let Some(queue_position) = update.queue_position {
            job.queue_position = queue_position;
        }
        if let Some(queue_size) = update.queue_size {
            job.queue_size = queue_size;
        }
        if let Some(manifest_path) = update.manifest_path {
            job.manifest_path = Some(manifest_path);
        }
        if let Some(manifest_url) = update.manifest_url {
            job.manifest_url = Some(manifest_url);
        }
        Some(job.clone())
    }

    /// Append a log line, discarding the oldest beyond the ring capacity.
    pub fn append_log(&self, job_id: &str, line: impl Into<String>) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let job = jobs.get_mut(job_id)?;
        job.logs.push_back(line.into());
        while job.logs.len() > self.max_log_lines {
            job.logs.pop_front();
        }
        Some(job.clone())
    }

    /// Set a scoped (`"category.field"`) or flat asset value.
    ///
    /// Scoped writes merge into the category map (meta keys alongside);
    /// flat writes overwrite, wrapping scalars as `{value, …meta}` when meta
    /// is supplied.
    pub fn set_asset(
        &self,
        job_id: &str,
        kind: &str,
        value: Value,
        meta: Option<Map<String, Value>>,
    ) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let job = jobs.get_mut(job_id)?;
        assign_asset(&mut job.assets, kind, value, meta);
        Some(job.clone())
    }

    /// Append adapter artifacts to the job's `assets.artifacts` list.
    pub fn append_artifacts(&self, job_id: &str, artifacts: &[AssetRef]) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let job = jobs.get_mut(job_id)?;
        let list = job
            .assets
            .entry("artifacts".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = list {
            for artifact in artifacts {
                if let Ok(v) = serde_json::to_value(artifact) {
                    items.push(v);
                }
            }
        }
        Some(job.clone())
    }

    /// Force a job into `CANCELED` with the given message.
    pub fn cancel(&self, job_id: &str, message: impl Into<String>) -> Option<Job> {
        self.update(
            job_id,
            JobUpdate::default()
                .status(JobStatus::Canceled)
                .message(message),
        )
    }

    /// Whether the job is gone or already canceled.
    #[must_use]
    pub fn is_canceled(&self, job_id: &str) -> bool {
        self.get(job_id)
            .is_none_or(|job| job.status == JobStatus::Canceled)
    }

    /// Stable client-facing projection of a job (the GET snapshot).
    #[must_use]
    pub fn projection(&self, job_id: &str) -> Option<Value> {
        let job = self.get(job_id)?;
        let mut out = json!({
            "job_id": job.job_id,
            "status": job.status.as_str(),
            "stage": job.stage,
            "progress": job.progress,
            "message": job.message,
            "created_at": job.created_at.to_rfc3339(),
            "started_at": job.started_at.map(|t| t.to_rfc3339()),
            "ended_at": job.ended_at.map(|t| t.to_rfc3339()),
            "uir": job.uir,
            "uir_hash": job.uir_hash,
            "stage_plan": job.stage_plan,
            "manifest_path": job.manifest_path.as_ref().map(|p| p.display().to_string()),
            "manifest_url": job.manifest_url,
            "logs": job.logs.iter().cloned().collect::<Vec<_>>(),
            "logs_tail": job.logs_tail(LOGS_TAIL_LIMIT),
            "assets": Value::Object(job.assets.clone()),
            "artifacts_partial": job.artifacts_value(),
        });
        if let Some(position) = job.queue_position {
            out["queue_position"] = json!(position);
        }
        if let Some(size) = job.queue_size {
            out["queue_size"] = json!(size);
        }
        Some(out)
    }
}

fn assign_asset(
    assets: &mut Map<String, Value>,
    kind: &str,
    value: Value,
    meta: Option<Map<String, Value>>,
) {
    if let Some((category, field)) = kind.split_once('.') {
        let bucket = assets
            .entry(category.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !bucket.is_object() {
            *bucket = Value::Object(Map::new());
        }
        if let Value::Object(map) = bucket {
            map.insert(field.to_string(), value);
            if let Some(meta) = meta {
                map.extend(meta);
            }
        }
        return;
    }
    match meta {
        Some(meta) => {
            let mut entry = Map::new();
            entry.insert("value".to_string(), value);
            entry.extend(meta);
            assets.insert(kind.to_string(), Value::Object(entry));
        }
        None => {
            assets.insert(kind.to_string(), value);
        }
    }
}
