// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP control plane and push streams.
//!
//! The endpoint surface: submit a job, fetch its snapshot, follow its event
//! stream over SSE or WebSocket, and serve the job directory statically.
//! Both push transports deliver the same per-job events in publish order and
//! start with a snapshot of the current state.

use axum::{
    Json, Router,
    extract::{Path as AxPath, State, WebSocketUpgrade, ws},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt as _;
use mpl_fs::list_job_manifests;
use mpl_scheduler::Scheduler;
use mpl_store::{CreateError, EventBus, JobEvent, JobStore, snapshot_data};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

/// Tail size mirrored into push payloads.
const LOGS_TAIL_LIMIT: usize = 8;
/// WebSocket close code for an unknown job.
const WS_CLOSE_NOT_FOUND: u16 = 4404;

/// Shared handles behind every endpoint.
pub struct AppState {
    /// The job registry.
    pub store: Arc<JobStore>,
    /// The per-job event bus.
    pub bus: Arc<EventBus>,
    /// The scheduler accepting submissions.
    pub scheduler: Arc<Scheduler>,
}

/// Structured API error with the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code.
    pub status: StatusCode,
    /// Human-readable detail, mirrored into the response body.
    pub detail: String,
}

impl ApiError {
    /// Create an error with the given status and detail.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// 404 — job not found.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "job not found")
    }

    /// 422 — the submission failed validation.
    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.detail }));
        (self.status, body).into_response()
    }
}

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    let assets_dir = state.store.paths().assets_dir.clone();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/events", get(job_events))
        .route("/ws/jobs/{job_id}", get(job_ws))
        .nest_service("/assets", ServeDir::new(assets_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let uir_value = mpl_planner::build_uir_value(&payload)
        .map_err(|e| ApiError::unprocessable(e.to_string()))?;
    let job = state.store.create(&uir_value).map_err(|e| match e {
        CreateError::Validation(err) => ApiError::unprocessable(err.to_string()),
        CreateError::Io(err) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    })?;
    state.scheduler.submit(&job.job_id).await;
    info!(job_id = %job.job_id, "job submitted");
    Ok((StatusCode::CREATED, Json(json!({ "job_id": job.job_id }))))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>, ApiError> {
    let manifests = list_job_manifests(&state.store.paths().assets_dir)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(manifests))
}

async fn get_job(
    AxPath(job_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .projection(&job_id)
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Unsubscribes when the stream is dropped (client disconnect).
struct StreamGuard {
    bus: Arc<EventBus>,
    job_id: String,
    id: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe_id(&self.job_id, self.id);
        debug!(job_id = %self.job_id, "event stream closed");
    }
}

async fn job_events(
    AxPath(job_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Some(job) = state.store.get(&job_id) else {
        return Err(ApiError::not_found());
    };

    let subscription = state.bus.subscribe(&job_id);
    let guard = StreamGuard {
        bus: Arc::clone(&state.bus),
        job_id: job_id.clone(),
        id: subscription.id(),
    };
    let initial = JobEvent {
        event: "status".into(),
        data: snapshot_data(&job),
    };

    let live = futures::stream::unfold(
        (subscription.rx, guard),
        |(mut rx, guard)| async move { rx.recv().await.map(|event| (event, (rx, guard))) },
    );
    // The snapshot must precede any live event; chain preserves that order.
    let stream = futures::stream::iter([initial])
        .chain(live)
        .map(|event| Ok(format_sse(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn format_sse(event: &JobEvent) -> SseEvent {
    let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(&event.event).data(data)
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

async fn job_ws(
    AxPath(job_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_ws(socket, state, job_id))
}

async fn handle_ws(mut socket: ws::WebSocket, state: Arc<AppState>, job_id: String) {
    let Some(job) = state.store.get(&job_id) else {
        let _ = socket
            .send(ws::Message::Text(
                json!({"error": "job not found"}).to_string().into(),
            ))
            .await;
        let _ = socket
            .send(ws::Message::Close(Some(ws::CloseFrame {
                code: WS_CLOSE_NOT_FOUND,
                reason: "job not found".into(),
            })))
            .await;
        return;
    };

    let snapshot = ws_payload(&state.store, &job_id, "snapshot", &snapshot_data(&job));
    if socket
        .send(ws::Message::Text(snapshot.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut subscription = state.bus.subscribe(&job_id);
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let payload = ws_payload(&state.store, &job_id, &event.event, &event.data);
                if socket
                    .send(ws::Message::Text(payload.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client messages are ignored; only disconnects matter.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
    state.bus.unsubscribe(&subscription);
}

/// The WebSocket message shape: job snapshot enriched with the event's
/// message and log tail, progress expressed as a percentage.
fn ws_payload(store: &JobStore, job_id: &str, event_name: &str, event_data: &Value) -> Value {
    let job = store.get(job_id);
    let message = event_message(event_name, event_data, job.as_ref());
    let progress = event_data
        .get("progress")
        .and_then(Value::as_f64)
        .or_else(|| job.as_ref().map(|j| j.progress))
        .unwrap_or(0.0);
    let logs_tail = job
        .as_ref()
        .map(|j| j.logs_tail(LOGS_TAIL_LIMIT))
        .unwrap_or_default();

    let mut payload = json!({
        "job_id": job_id,
        "status": job.as_ref().map_or("", |j| j.status.as_str()),
        "stage": job.as_ref().map_or_else(String::new, |j| j.stage.clone()),
        "progress": progress_percent(progress),
        "message": message,
        "hint": message,
        "logs_tail": logs_tail,
        "event": event_name,
    });
    if event_name == "failed" {
        let error = if message.is_empty() { "job failed".to_string() } else { message };
        payload["error"] = Value::String(error);
    }
    payload
}

fn event_message(event_name: &str, event_data: &Value, job: Option<&mpl_store::Job>) -> String {
    for key in ["message", "text", "line"] {
        if let Some(value) = event_data.get(key).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    let fallback = job.map_or_else(String::new, |j| j.message.clone());
    if event_name == "failed" && fallback.is_empty() {
        return "job failed".to_string();
    }
    fallback
}

/// Progress as a percentage; fractional inputs are scaled up.
fn progress_percent(value: f64) -> f64 {
    let percent = if value <= 1.0 { value * 100.0 } else { value };
    percent.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Build the state, register providers, and spawn the worker task.
///
/// Returns the state and the worker join handle (abort it on shutdown).
#[must_use]
pub fn bootstrap(
    paths: mpl_fs::RuntimePaths,
    mock_providers: bool,
) -> (Arc<AppState>, tokio::task::JoinHandle<()>) {
    let store = Arc::new(JobStore::new(paths));
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(mpl_adapter::AdapterRegistry::new());

    let artifacts = Arc::new(mpl_scheduler::StoreArtifacts(Arc::clone(&store)));
    mpl_adapters::register_defaults(&registry, artifacts);
    for modality in mpl_core::Modality::ALL {
        registry.register(Arc::new(mpl_adapters::MockAdapter::new(modality)));
    }
    if mock_providers {
        mpl_adapters::register_mock_providers(&registry);
    }

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        registry,
    ));
    let worker = tokio::spawn(Arc::clone(&scheduler).run());

    let state = Arc::new(AppState {
        store,
        bus,
        scheduler,
    });
    (state, worker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_scales_fractions() {
        assert_eq!(progress_percent(0.5), 50.0);
        assert_eq!(progress_percent(1.0), 100.0);
        assert_eq!(progress_percent(85.0), 85.0);
        assert_eq!(progress_percent(250.0), 100.0);
        assert_eq!(progress_percent(-1.0), 0.0);
    }

    #[test]
    fn event_message_prefers_event_fields() {
        let data = json!({"message": " running scene "});
        assert_eq!(event_message("status", &data, None), "running scene");
        let data = json!({"line": "log text"});
        assert_eq!(event_message("log", &data, None), "log text");
        let data = json!({});
        assert_eq!(event_message("failed", &data, None), "job failed");
    }
}
