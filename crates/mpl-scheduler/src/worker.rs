// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker loop.
//!
//! Pulls job ids off the FIFO, walks each job's stage plan, and drives one
//! adapter per stage under the resource gates.  Cancellation is observed
//! between stages and at every bridged progress tick; semaphore permits are
//! scoped so every exit path releases them.

use crate::bands::{is_gpu_bound, map_progress, progress_band};
use crate::bridge::{BridgeMsg, BridgedReporter};
use crate::queue::JobQueue;
use mpl_adapter::{AdapterRegistry, default_provider};
use mpl_core::{JobStatus, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::ensure_job_dirs;
use mpl_fs::manifest::write_manifest;
use mpl_store::{EventBus, JobStore, JobUpdate, ProgressReporter};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// How one stage ended.
enum StageEnd {
    Continue,
    Canceled,
    Failed(AdapterError),
}

/// The staged scheduler: FIFO queue, gates, and the per-job loop.
pub struct Scheduler {
    store: Arc<JobStore>,
    bus: Arc<EventBus>,
    registry: Arc<AdapterRegistry>,
    queue: JobQueue,
    gpu: Arc<Semaphore>,
    provider_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Scheduler {
    /// Wire a scheduler over the shared store, bus, and registry.
    #[must_use]
    pub fn new(store: Arc<JobStore>, bus: Arc<EventBus>, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            store,
            bus,
            registry,
            queue: JobQueue::new(),
            gpu: Arc::new(Semaphore::new(1)),
            provider_gates: Mutex::new(HashMap::new()),
        }
    }

    /// The job store this scheduler runs against.
    #[must_use]
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// The event bus this scheduler publishes on.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Enqueue a created job and broadcast fresh queue positions.
    pub async fn submit(&self, job_id: &str) {
        let snapshot = self.queue.enqueue(job_id);
        self.sync_queue_positions(&snapshot).await;
    }

    /// The worker loop; runs until the queue is closed.
    pub async fn run(self: Arc<Self>) {
        while let Some(job_id) = self.queue.pull().await {
            let snapshot = self.queue.remove(&job_id);
            self.sync_queue_positions(&snapshot).await;
            self.run_job(&job_id).await;
        }
    }

    // -- Queue-position broadcasts --------------------------------------

    async fn sync_queue_positions(&self, snapshot: &[String]) {
        let total = snapshot.len();
        for (idx, queued_id) in snapshot.iter().enumerate() {
            let Some(job) = self.store.get(queued_id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }
            let position = idx + 1;
            self.store.update(
                queued_id,
                JobUpdate::default().queue(Some(position), Some(total)),
            );
            let reporter = self.reporter(queued_id);
            reporter
                .stage(
                    JobStatus::Queued,
                    job.progress,
                    &format!("queued ({position}/{total})"),
                    None,
                )
                .await;
        }
    }

    // -- Per-job loop ----------------------------------------------------

    async fn run_job(&self, job_id: &str) {
        let Some(job) = self.store.get(job_id) else {
            return;
        };
        let reporter = self.reporter(job_id);
        self.store
            .update(job_id, JobUpdate::default().queue(None, None));

        if job.status == JobStatus::Canceled {
            reporter
                .stage(JobStatus::Canceled, job.progress, "canceled before start", None)
                .await;
            self.checkpoint(job_id, JobStatus::Canceled, &[]);
            return;
        }

        if let Err(e) = ensure_job_dirs(&self.store.paths().assets_dir, job_id) {
            let err = AdapterError::new(ErrorCode::IoWrite, "failed to prepare job directory")
                .with_detail("error", e.to_string());
            self.finalize_failed(job_id, &reporter, err).await;
            return;
        }

        info!(job_id = %job_id, stages = job.stage_plan.len(), "job started");
        for stage in job.stage_plan.clone() {
            if self.store.is_canceled(job_id) {
                self.finalize_canceled(job_id, &reporter).await;
                return;
            }
            match self.run_stage(job_id, stage, &reporter).await {
                StageEnd::Continue => {}
                StageEnd::Canceled => {
                    self.finalize_canceled(job_id, &reporter).await;
                    return;
                }
                StageEnd::Failed(err) => {
                    self.finalize_failed(job_id, &reporter, err).await;
                    return;
                }
            }
        }

        reporter.stage(JobStatus::Done, 1.0, "done", None).await;
        self.checkpoint(job_id, JobStatus::Done, &[]);
        info!(job_id = %job_id, "job done");
    }

    // -- One stage -------------------------------------------------------

    async fn run_stage(
        &self,
        job_id: &str,
        stage: JobStatus,
        reporter: &ProgressReporter,
    ) -> StageEnd {
        let band = progress_band(stage);
        reporter
            .stage(stage, band.0, &stage_message(stage), None)
            .await;

        let Some(modality) = stage.modality() else {
            // PLANNING does no adapter work; the plan was computed at create.
            reporter.stage(stage, band.1, "plan ready", None).await;
            return StageEnd::Continue;
        };

        let Some(job) = self.store.get(job_id) else {
            return StageEnd::Canceled;
        };
        let uir = job.uir.clone();

        if !uir.module_requested(modality) {
            reporter
                .stage(stage, band.1, &format!("{modality} skipped"), None)
                .await;
            return StageEnd::Continue;
        }

        let provider_id = match resolve_provider(&uir, modality) {
            Ok(provider_id) => provider_id,
            Err(err) => return StageEnd::Failed(err),
        };
        let Some(adapter) = self.registry.get(&provider_id) else {
            return StageEnd::Failed(
                AdapterError::new(
                    ErrorCode::DependencyMissing,
                    format!("no adapter registered for provider {provider_id:?}"),
                )
                .with_detail("provider", &provider_id)
                .with_detail("modality", modality.as_str()),
            );
        };
        if adapter.modality() != modality {
            return StageEnd::Failed(
                AdapterError::new(
                    ErrorCode::Unsupported,
                    format!(
                        "provider {provider_id:?} serves {}, not {modality}",
                        adapter.modality()
                    ),
                )
                .with_detail("provider", &provider_id),
            );
        }
        if let Err(err) = adapter.validate(&uir) {
            return StageEnd::Failed(
                AdapterError::new(ErrorCode::ValidationInput, err.message)
                    .with_detail("provider", &provider_id)
                    .with_detail("cause_code", err.code.as_str()),
            );
        }

        // Provider gate first, then the GPU gate for GPU-bound stages; the
        // permits live to the end of the stage and drop on every exit path.
        let gate = self.provider_gate(&provider_id, adapter.max_concurrency());
        let provider_permit = match gate.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return StageEnd::Failed(AdapterError::new(
                    ErrorCode::ModelRuntime,
                    "provider gate closed",
                ));
            }
        };
        let gpu_permit = if is_gpu_bound(stage) {
            match Arc::clone(&self.gpu).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return StageEnd::Failed(AdapterError::new(
                        ErrorCode::ModelRuntime,
                        "gpu gate closed",
                    ));
                }
            }
        } else {
            None
        };

        let result = self
            .dispatch_adapter(job_id, stage, band, &uir, Arc::clone(&adapter), reporter)
            .await;
        drop(gpu_permit);
        drop(provider_permit);

        let result = match result {
            Ok(result) => result,
            Err(err) => return StageEnd::Failed(err),
        };
        if self.store.is_canceled(job_id) {
            return StageEnd::Canceled;
        }
        if !result.ok {
            let err = result.error.unwrap_or_else(|| {
                AdapterError::new(ErrorCode::ModelRuntime, "adapter reported failure")
                    .with_detail("provider", &provider_id)
            });
            return StageEnd::Failed(err);
        }

        for warning in &result.warnings {
            reporter.log(&format!("[{provider_id}] warning: {warning}")).await;
        }

        self.store.append_artifacts(job_id, &result.artifacts);
        for artifact in &result.artifacts {
            let kind = format!("{modality}.{}", artifact.role);
            let mut meta = Map::new();
            meta.insert("role".into(), json!(&artifact.role));
            meta.insert("type".into(), json!(modality.as_str()));
            meta.insert("mime".into(), json!(&artifact.mime));
            meta.insert("id".into(), json!(&artifact.id));
            if let Some(bytes) = artifact.bytes {
                meta.insert("bytes".into(), json!(bytes));
            }
            reporter
                .asset(&kind, Value::String(artifact.uri.clone()), Some(meta))
                .await;
        }

        reporter
            .stage(stage, band.1, &format!("{modality} done"), None)
            .await;
        self.checkpoint(job_id, stage, &[]);
        StageEnd::Continue
    }

    /// Run the blocking adapter on the pool, draining bridged progress and
    /// watching for cancellation.
    async fn dispatch_adapter(
        &self,
        job_id: &str,
        stage: JobStatus,
        band: (f64, f64),
        uir: &Uir,
        adapter: Arc<dyn mpl_adapter::MediaAdapter>,
        reporter: &ProgressReporter,
    ) -> Result<mpl_core::AdapterResult, AdapterError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (bridge, mut rx) = BridgedReporter::channel(Arc::clone(&cancel));
        let job_dir = self.store.paths().job_dir(job_id);
        let run_uir = uir.clone();
        let mut handle =
            tokio::task::spawn_blocking(move || adapter.run(&run_uir, &job_dir, &bridge));

        let mut poll = tokio::time::interval(Duration::from_millis(200));
        let early = loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        self.observe_cancel(job_id, &cancel);
                        self.forward_bridge_msg(stage, band, msg, reporter).await;
                    }
                    // Channel closed: the adapter returned and dropped the
                    // bridge; join outside the loop.
                    None => break None,
                },
                _ = poll.tick() => self.observe_cancel(job_id, &cancel),
                res = &mut handle => break Some(res),
            }
        };
        let joined = match early {
            Some(res) => res,
            None => handle.await,
        };
        // Deliver any progress that raced with completion.
        while let Ok(msg) = rx.try_recv() {
            self.forward_bridge_msg(stage, band, msg, reporter).await;
        }

        joined.map_err(|e| {
            AdapterError::new(ErrorCode::ModelRuntime, "adapter execution failed")
                .with_detail("error", e.to_string())
        })
    }

    fn observe_cancel(&self, job_id: &str, cancel: &AtomicBool) {
        if self.store.is_canceled(job_id) {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    async fn forward_bridge_msg(
        &self,
        stage: JobStatus,
        band: (f64, f64),
        msg: BridgeMsg,
        reporter: &ProgressReporter,
    ) {
        match msg {
            BridgeMsg::Stage {
                name: _,
                progress,
                message,
            } => {
                let mapped = map_progress(band, progress);
                reporter.stage(stage, mapped, &message, None).await;
            }
            BridgeMsg::Log(line) => reporter.log(&line).await,
        }
    }

    // -- Terminal paths --------------------------------------------------

    async fn finalize_canceled(&self, job_id: &str, reporter: &ProgressReporter) {
        let progress = self.store.get(job_id).map_or(0.0, |job| job.progress);
        reporter
            .stage(JobStatus::Canceled, progress, "canceled", None)
            .await;
        self.checkpoint(job_id, JobStatus::Canceled, &[]);
        info!(job_id = %job_id, "job canceled");
    }

    async fn finalize_failed(&self, job_id: &str, reporter: &ProgressReporter, err: AdapterError) {
        let progress = self.store.get(job_id).map_or(0.0, |job| job.progress);
        let payload = serde_json::to_value(&err).unwrap_or(Value::Null);
        reporter
            .stage(
                JobStatus::Failed,
                progress,
                &format!("failed: {}", err.message),
                Some(payload),
            )
            .await;
        self.checkpoint(job_id, JobStatus::Failed, std::slice::from_ref(&err));
        warn!(job_id = %job_id, code = %err.code, "job failed");
    }

    /// Rewrite the manifest with the job's current artifacts.
    fn checkpoint(&self, job_id: &str, status: JobStatus, errors: &[AdapterError]) {
        let Some(job) = self.store.get(job_id) else {
            return;
        };
        let job_dir = self.store.paths().job_dir(job_id);
        if let Err(e) = write_manifest(&job_dir, &job.uir, status, &job.artifacts(), errors) {
            warn!(job_id = %job_id, error = %e, "manifest checkpoint failed");
        }
    }

    fn provider_gate(&self, provider_id: &str, max_concurrency: usize) -> Arc<Semaphore> {
        let mut gates = self
            .provider_gates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            gates
                .entry(provider_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(max_concurrency.max(1)))),
        )
    }

    fn reporter(&self, job_id: &str) -> ProgressReporter {
        ProgressReporter::new(job_id, Arc::clone(&self.store), Arc::clone(&self.bus))
    }
}

fn resolve_provider(uir: &Uir, modality: Modality) -> Result<String, AdapterError> {
    match uir.routed_provider(modality) {
        Some(provider) if !provider.trim().is_empty() => Ok(provider.to_string()),
        Some(_) => Err(AdapterError::new(
            ErrorCode::ValidationRouting,
            format!("no provider resolvable for {modality}"),
        )
        .with_detail("modality", modality.as_str())),
        None => Ok(default_provider(modality).to_string()),
    }
}

fn stage_message(stage: JobStatus) -> String {
    stage.as_str().to_lowercase().replace('_', " ")
}
