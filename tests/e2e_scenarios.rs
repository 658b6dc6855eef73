// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end pipeline scenarios: empty store, clean assets root, all
//! providers replaced with deterministic mocks.

use mpl_adapter::AdapterRegistry;
use mpl_adapters::mock::{HangingAdapter, register_mock_providers};
use mpl_core::{JobStatus, Modality, parse_uir, stable_hash};
use mpl_fs::RuntimePaths;
use mpl_scheduler::Scheduler;
use mpl_store::{CreateError, EventBus, JobStore, Subscription};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Pipeline {
    _tmp: TempDir,
    store: Arc<JobStore>,
    bus: Arc<EventBus>,
    registry: Arc<AdapterRegistry>,
    scheduler: Arc<Scheduler>,
}

impl Pipeline {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let paths = RuntimePaths::with_root(tmp.path()).unwrap();
        let store = Arc::new(JobStore::new(paths));
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AdapterRegistry::new());
        register_mock_providers(&registry);
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&registry),
        ));
        Self {
            _tmp: tmp,
            store,
            bus,
            registry,
            scheduler,
        }
    }

    fn start_worker(&self) {
        tokio::spawn(Arc::clone(&self.scheduler).run());
    }

    async fn submit_prompt(&self, prompt: &str, options: Value) -> String {
        let payload = json!({"prompt": prompt, "options": options});
        let uir = mpl_planner::build_uir_value(&payload).unwrap();
        let job = self.store.create(&uir).unwrap();
        self.scheduler.submit(&job.job_id).await;
        job.job_id
    }

    fn manifest(&self, job_id: &str) -> Value {
        let path = self.store.paths().job_dir(job_id).join("manifest.json");
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }
}

async fn next_event(sub: &mut Subscription) -> mpl_store::JobEvent {
    tokio::time::timeout(Duration::from_secs(20), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus closed")
}

async fn drain_until_terminal(sub: &mut Subscription) -> Vec<mpl_store::JobEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(sub).await;
        let terminal = event.event == "done"
            || event.event == "failed"
            || (event.event == "status" && event.data["status"] == "CANCELED");
        events.push(event);
        if terminal {
            return events;
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: happy path, motion + preview only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_motion_and_preview() {
    let pipeline = Pipeline::new();
    pipeline.start_worker();

    let job_id = pipeline
        .submit_prompt("dance", json!({"targets": ["motion", "preview"], "duration_s": 8}))
        .await;
    let mut sub = pipeline.bus.subscribe(&job_id);
    let events = drain_until_terminal(&mut sub).await;

    let statuses: Vec<&str> = events
        .iter()
        .filter(|e| e.event == "status")
        .filter_map(|e| e.data["status"].as_str())
        .collect();
    for expected in ["PLANNING", "RUNNING_MOTION", "COMPOSING_PREVIEW", "DONE"] {
        assert!(
            statuses.contains(&expected),
            "missing {expected} in {statuses:?}"
        );
    }

    let manifest = pipeline.manifest(&job_id);
    assert_eq!(manifest["status"], "DONE");
    assert_eq!(
        manifest["outputs"]["motion"]["bvh"]["uri"],
        format!("/assets/{job_id}/motion/motion.bvh")
    );
    assert_eq!(manifest["outputs"]["scene"]["panorama"], Value::Null);

    // Every artifact uri an adapter emitted is scoped to the job.
    let job = pipeline.store.get(&job_id).unwrap();
    for artifact in job.artifacts() {
        assert!(
            artifact.uri.starts_with(&format!("/assets/{job_id}/")),
            "foreign uri: {}",
            artifact.uri
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario 2: routing failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn routing_to_unknown_provider_fails() {
    let pipeline = Pipeline::new();
    pipeline.start_worker();

    let job_id = pipeline
        .submit_prompt(
            "dance",
            json!({"targets": ["motion"], "routing": {"motion": "nonexistent"}}),
        )
        .await;
    let mut sub = pipeline.bus.subscribe(&job_id);
    let events = drain_until_terminal(&mut sub).await;
    assert!(events.iter().any(|e| e.event == "failed"));

    let manifest = pipeline.manifest(&job_id);
    assert_eq!(manifest["status"], "FAILED");
    assert_eq!(manifest["errors"][0]["code"], "E_DEPENDENCY_MISSING");

    // Nothing was produced under motion/.
    let motion_dir = pipeline.store.paths().job_dir(&job_id).join("motion");
    assert_eq!(std::fs::read_dir(motion_dir).unwrap().count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario 3: cancellation mid-stage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_during_scene_stage() {
    let pipeline = Pipeline::new();
    pipeline.registry.register(Arc::new(HangingAdapter::new(
        "diffusion360_local",
        Modality::Scene,
    )));
    pipeline.start_worker();

    let job_id = pipeline
        .submit_prompt("a beach", json!({"targets": ["scene", "motion", "preview"]}))
        .await;
    let mut sub = pipeline.bus.subscribe(&job_id);

    loop {
        let event = next_event(&mut sub).await;
        if event.event == "status" && event.data["status"] == "RUNNING_SCENE" {
            break;
        }
    }
    pipeline.store.cancel(&job_id, "canceled by user");

    let events = drain_until_terminal(&mut sub).await;
    let last_status = events
        .iter()
        .rev()
        .find(|e| e.event == "status")
        .map(|e| e.data["status"].as_str().unwrap().to_string())
        .unwrap();
    assert_eq!(last_status, "CANCELED");

    // No asset event was published for the scene.
    assert!(events.iter().all(|e| e.event != "asset"));

    let manifest = pipeline.manifest(&job_id);
    assert_eq!(manifest["status"], "CANCELED");
    assert_eq!(manifest["errors"], json!([]));
}

// ---------------------------------------------------------------------------
// Scenario 4: queue ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_positions_broadcast_and_decrement() {
    let pipeline = Pipeline::new();
    // Worker deliberately not started yet: the queue stays full.

    let a = pipeline.submit_prompt("a", json!({"targets": ["motion"]})).await;
    let b = pipeline.submit_prompt("b", json!({"targets": ["motion"]})).await;
    let mut sub_b = pipeline.bus.subscribe(&b);
    let c = pipeline.submit_prompt("c", json!({"targets": ["motion"]})).await;
    let mut sub_c = pipeline.bus.subscribe(&c);

    assert_eq!(pipeline.store.get(&a).unwrap().queue_position, Some(1));
    assert_eq!(pipeline.store.get(&b).unwrap().queue_position, Some(2));
    let c_job = pipeline.store.get(&c).unwrap();
    assert_eq!(c_job.queue_position, Some(3));
    assert_eq!(c_job.queue_size, Some(3));

    pipeline.start_worker();

    // As A starts, B hears a decremented position while still queued.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut b_promoted = false;
    while !b_promoted {
        let event = tokio::time::timeout_at(deadline, sub_b.recv())
            .await
            .expect("timed out waiting for B's promotion")
            .expect("bus closed");
        if event.event == "status"
            && event.data["status"] == "QUEUED"
            && event.data["queue_position"] == json!(1)
        {
            b_promoted = true;
        }
        if event.event == "done" {
            break;
        }
    }
    assert!(b_promoted, "B never reported queue_position=1");

    // C's positions never increase and eventually reach the head.
    let mut c_positions = Vec::new();
    loop {
        let event = tokio::time::timeout_at(deadline, sub_c.recv())
            .await
            .expect("timed out draining C")
            .expect("bus closed");
        if event.event == "status" && event.data["status"] == "QUEUED" {
            if let Some(position) = event.data["queue_position"].as_u64() {
                c_positions.push(position);
            }
        }
        if event.event == "done" {
            break;
        }
    }
    assert!(
        c_positions.windows(2).all(|w| w[1] <= w[0]),
        "C's positions increased: {c_positions:?}"
    );
    assert!(
        c_positions.contains(&1),
        "C never reached the head: {c_positions:?}"
    );
}

// ---------------------------------------------------------------------------
// Scenario 5: semantic validation error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enabled_module_outside_targets_is_rejected() {
    let pipeline = Pipeline::new();
    let payload = json!({
        "uir_version": "1.0",
        "job": {"created_at": "2025-06-01T00:00:00Z"},
        "input": {"raw_prompt": "x"},
        "intent": {"targets": ["scene"], "duration_s": 12},
        "modules": {
            "scene": {"enabled": true},
            "motion": {"enabled": false},
            "music": {"enabled": true},
            "character": {"enabled": false},
            "preview": {"enabled": false},
            "export": {"enabled": false},
        },
    });
    let err = pipeline.store.create(&payload).unwrap_err();
    let CreateError::Validation(err) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(err.issues.len(), 1);
    assert_eq!(err.issues[0].loc, vec!["modules", "music", "enabled"]);
    assert_eq!(
        err.to_string(),
        "UIR validation failed: modules.music.enabled: enabled module must be listed in intent.targets"
    );
}

// ---------------------------------------------------------------------------
// Scenario 6: hash stability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stable_hash_ignores_submission_time() {
    let template = |created_at: &str| {
        json!({
            "uir_version": "1.0",
            "job": {"created_at": created_at},
            "input": {"raw_prompt": "dance"},
            "intent": {"targets": ["motion"], "duration_s": 8},
            "modules": {
                "scene": {"enabled": false},
                "motion": {"enabled": true},
                "music": {"enabled": false},
                "character": {"enabled": false},
                "preview": {"enabled": false},
                "export": {"enabled": false},
            },
        })
    };
    let u1 = parse_uir(&template("2025-01-01T00:00:00Z")).unwrap();
    let u2 = parse_uir(&template("2030-12-31T00:00:00Z")).unwrap();
    assert_eq!(stable_hash(&u1).unwrap(), stable_hash(&u2).unwrap());
}

// ---------------------------------------------------------------------------
// Cross-cutting invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ended_at_iff_terminal() {
    let pipeline = Pipeline::new();
    pipeline.start_worker();
    let job_id = pipeline
        .submit_prompt("dance", json!({"targets": ["motion"]}))
        .await;
    let mut sub = pipeline.bus.subscribe(&job_id);

    let queued = pipeline.store.get(&job_id).unwrap();
    assert!(queued.ended_at.is_none());

    drain_until_terminal(&mut sub).await;
    let done = pipeline.store.get(&job_id).unwrap();
    assert!(done.status.is_terminal());
    assert!(done.ended_at.is_some());
    assert_eq!(done.status, JobStatus::Done);
}

#[tokio::test]
async fn full_pipeline_manifest_is_complete() {
    let pipeline = Pipeline::new();
    pipeline.start_worker();
    let job_id = pipeline
        .submit_prompt(
            "an epic samurai dance",
            json!({
                "targets": ["scene", "motion", "music", "character", "preview", "export"],
                "music_prompt": "taiko drums",
                "duration_s": 10,
            }),
        )
        .await;
    let mut sub = pipeline.bus.subscribe(&job_id);
    drain_until_terminal(&mut sub).await;

    let manifest = pipeline.manifest(&job_id);
    assert_eq!(manifest["status"], "DONE");
    for (module, field) in [
        ("scene", "panorama"),
        ("motion", "bvh"),
        ("music", "wav"),
        ("character", "manifest"),
        ("preview", "config"),
        ("export", "mp4"),
    ] {
        assert!(
            manifest["outputs"][module][field].is_object(),
            "missing outputs.{module}.{field}: {manifest}"
        );
    }
    // Manifest outputs reference only files that exist under the job dir.
    let job_dir = pipeline.store.paths().job_dir(&job_id);
    for (module, field) in [("scene", "panorama"), ("export", "mp4")] {
        let uri = manifest["outputs"][module][field]["uri"].as_str().unwrap();
        let rel = uri
            .strip_prefix(&format!("/assets/{job_id}/"))
            .expect("uri not job-scoped");
        assert!(job_dir.join(rel).is_file(), "missing file for {uri}");
    }
}
