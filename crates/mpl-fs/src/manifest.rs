// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest construction and persistence.
//!
//! The manifest is the job's canonical on-disk record.  `outputs` starts from
//! a fixed per-module skeleton and artifacts are slotted in by role; a slot is
//! only filled when the referenced file actually exists under the job
//! directory at the moment of write.

use crate::jsonio::ascii_json_pretty;
use crate::{asset_uri_to_path, make_asset_url};
use anyhow::{Context, Result};
use mpl_core::{AssetRef, JobStatus, Modality, Uir};
use mpl_error::AdapterError;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

/// Map an artifact role onto its `(module, field)` slot in `outputs`.
///
/// Unknown roles have no slot; their artifacts still live in the job's asset
/// list, just not in the structured manifest tree.
#[must_use]
pub fn role_slot(role: &str) -> Option<(&'static str, &'static str)> {
    match role {
        "scene_panorama" => Some(("scene", "panorama")),
        "motion_bvh" => Some(("motion", "bvh")),
        "music_wav" => Some(("music", "wav")),
        "preview_config" => Some(("preview", "config")),
        "export_mp4" => Some(("export", "mp4")),
        "export_zip" => Some(("export", "zip")),
        "character_manifest" => Some(("character", "manifest")),
        _ => {
            let module = role.strip_suffix("_meta")?;
            Modality::ALL
                .iter()
                .find(|m| m.as_str() == module)
                .map(|m| (m.as_str(), "meta"))
        }
    }
}

/// Write `manifest.json` into the job directory and return its path.
///
/// The same `(uir, status, artifacts, errors)` always produces byte-identical
/// output.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_manifest(
    job_dir: &Path,
    uir: &Uir,
    status: JobStatus,
    artifacts: &[AssetRef],
    errors: &[AdapterError],
) -> Result<PathBuf> {
    let job_id = uir.job_id().unwrap_or_default().to_string();
    let manifest = json!({
        "job_id": job_id,
        "uir_version": uir.uir_version,
        "created_at": uir.job.created_at.clone().unwrap_or_default(),
        "status": status.as_str(),
        "inputs": build_inputs(uir),
        "outputs": build_outputs(job_dir, &job_id, uir, artifacts),
        "errors": errors,
    });
    let path = job_dir.join("manifest.json");
    std::fs::write(&path, ascii_json_pretty(&manifest))
        .with_context(|| format!("write manifest to {}", path.display()))?;
    Ok(path)
}

/// Read a job's manifest, if present.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn read_manifest(job_dir: &Path) -> Result<Option<Value>> {
    let path = job_dir.join("manifest.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read manifest from {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("parse manifest at {}", path.display()))?;
    Ok(Some(value))
}

/// Scan the assets root for job manifests, newest first.
///
/// Unreadable or malformed manifests are skipped; a manifest without a
/// `job_id` is patched with its directory name.
///
/// # Errors
///
/// Returns an error when the assets root cannot be listed.
pub fn list_job_manifests(assets_root: &Path) -> Result<Vec<Value>> {
    let entries = match std::fs::read_dir(assets_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("read assets root {}", assets_root.display())));
        }
    };
    let mut manifests = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let Ok(Some(mut manifest)) = read_manifest(&entry.path()) else {
            continue;
        };
        if let Some(obj) = manifest.as_object_mut() {
            if !obj.contains_key("job_id") {
                obj.insert(
                    "job_id".into(),
                    Value::String(entry.file_name().to_string_lossy().into_owned()),
                );
            }
            manifests.push(manifest);
        }
    }
    manifests.sort_by(|a, b| {
        let key = |m: &Value| {
            m.get("created_at")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        key(b).cmp(&key(a))
    });
    Ok(manifests)
}

// ---------------------------------------------------------------------------
// Manifest sections
// ---------------------------------------------------------------------------

/// Flatten `input` and `intent` into one map (intent wins on key clashes).
fn build_inputs(uir: &Uir) -> Value {
    let mut inputs = Map::new();
    if let Ok(Value::Object(input)) = serde_json::to_value(&uir.input) {
        inputs.extend(input);
    }
    if let Ok(Value::Object(intent)) = serde_json::to_value(&uir.intent) {
        inputs.extend(intent);
    }
    Value::Object(inputs)
}

fn build_outputs(job_dir: &Path, job_id: &str, uir: &Uir, artifacts: &[AssetRef]) -> Value {
    let mut outputs = json!({
        "scene": {"panorama": null},
        "motion": {"bvh": null},
        "music": {"wav": null},
        "character": {"manifest": null},
        "preview": {"config": null},
        "export": {"mp4": null, "zip": null},
    });

    for artifact in artifacts {
        let Some((module, field)) = role_slot(&artifact.role) else {
            continue;
        };
        if !artifact_on_disk(job_dir, job_id, artifact) {
            continue;
        }
        let mut slot = Map::new();
        slot.insert("id".into(), Value::String(artifact.id.clone()));
        slot.insert("uri".into(), Value::String(artifact.uri.clone()));
        slot.insert("mime".into(), Value::String(artifact.mime.clone()));
        if let Some(bytes) = artifact.bytes {
            slot.insert("bytes".into(), json!(bytes));
        }
        if let Some(sha256) = &artifact.sha256 {
            slot.insert("sha256".into(), Value::String(sha256.clone()));
        }
        if let Some(meta) = &artifact.meta {
            slot.insert("meta".into(), Value::Object(meta.clone()));
        }
        outputs[module][field] = Value::Object(slot);
    }

    enrich_outputs(&mut outputs, uir);
    outputs
}

/// A slot is only filled when the file the uri names is present.
fn artifact_on_disk(job_dir: &Path, job_id: &str, artifact: &AssetRef) -> bool {
    asset_uri_to_path(job_dir, job_id, &artifact.uri).is_some_and(|path| path.is_file())
}

/// Copy UIR-derived metadata next to the artifact slots.
fn enrich_outputs(outputs: &mut Value, uir: &Uir) {
    let intent_duration = uir.intent.duration_s;
    if let Some(motion) = &uir.modules.motion {
        if motion.enabled {
            outputs["motion"]["fps"] = json!(motion.fps);
            outputs["motion"]["duration_s"] = json!(motion.duration_s.unwrap_or(intent_duration));
        }
    }
    if let Some(music) = &uir.modules.music {
        if music.enabled {
            outputs["music"]["duration_s"] = json!(music.duration_s.unwrap_or(intent_duration));
        }
    }
}

/// The manifest's client-facing URL for a job.
#[must_use]
pub fn manifest_url(job_id: &str) -> String {
    make_asset_url(job_id, &["manifest.json"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_job_dirs;
    use mpl_core::parse_uir;
    use mpl_error::ErrorCode;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_uir(job_id: &str) -> Uir {
        parse_uir(&json!({
            "uir_version": "1.0",
            "job": {"id": job_id, "created_at": "2025-06-01T10:00:00Z"},
            "input": {"raw_prompt": "dance", "lang": "en"},
            "intent": {"targets": ["motion", "music"], "duration_s": 8},
            "modules": {
                "scene": {"enabled": false},
                "motion": {"enabled": true, "fps": 24},
                "music": {"enabled": true},
                "character": {"enabled": false},
                "preview": {"enabled": false},
                "export": {"enabled": false},
            },
        }))
        .unwrap()
    }

    fn bvh_artifact(job_id: &str) -> AssetRef {
        AssetRef {
            id: format!("{job_id}:motion_bvh"),
            role: "motion_bvh".into(),
            uri: format!("/assets/{job_id}/motion/motion.bvh"),
            mime: "text/plain".into(),
            bytes: Some(4),
            sha256: None,
            meta: None,
        }
    }

    #[test]
    fn role_slot_table() {
        assert_eq!(role_slot("scene_panorama"), Some(("scene", "panorama")));
        assert_eq!(role_slot("motion_bvh"), Some(("motion", "bvh")));
        assert_eq!(role_slot("music_wav"), Some(("music", "wav")));
        assert_eq!(role_slot("preview_config"), Some(("preview", "config")));
        assert_eq!(role_slot("export_mp4"), Some(("export", "mp4")));
        assert_eq!(role_slot("export_zip"), Some(("export", "zip")));
        assert_eq!(role_slot("character_manifest"), Some(("character", "manifest")));
        assert_eq!(role_slot("motion_meta"), Some(("motion", "meta")));
        assert_eq!(role_slot("scene_meta"), Some(("scene", "meta")));
        assert_eq!(role_slot("motion_npy"), None);
        assert_eq!(role_slot("unknown_meta"), None);
    }

    #[test]
    fn skeleton_written_with_no_artifacts() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        let uir = sample_uir("j1");
        write_manifest(&job_dir, &uir, JobStatus::Queued, &[], &[]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(manifest["job_id"], "j1");
        assert_eq!(manifest["status"], "QUEUED");
        assert_eq!(manifest["outputs"]["scene"]["panorama"], Value::Null);
        assert_eq!(manifest["outputs"]["export"]["mp4"], Value::Null);
        assert_eq!(manifest["errors"], json!([]));
    }

    #[test]
    fn artifact_slotted_only_when_file_exists() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        let uir = sample_uir("j1");
        let artifact = bvh_artifact("j1");

        // File absent: slot stays null.
        write_manifest(&job_dir, &uir, JobStatus::RunningMotion, &[artifact.clone()], &[]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(manifest["outputs"]["motion"]["bvh"], Value::Null);

        // File present: slot filled.
        std::fs::write(job_dir.join("motion/motion.bvh"), "BVH\n").unwrap();
        write_manifest(&job_dir, &uir, JobStatus::Done, &[artifact], &[]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(
            manifest["outputs"]["motion"]["bvh"]["uri"],
            "/assets/j1/motion/motion.bvh"
        );
        assert_eq!(manifest["outputs"]["motion"]["bvh"]["bytes"], 4);
    }

    #[test]
    fn inputs_flatten_input_and_intent() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        write_manifest(&job_dir, &sample_uir("j1"), JobStatus::Queued, &[], &[]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(manifest["inputs"]["raw_prompt"], "dance");
        assert_eq!(manifest["inputs"]["lang"], "en");
        assert_eq!(manifest["inputs"]["targets"], json!(["motion", "music"]));
        assert_eq!(manifest["inputs"]["duration_s"], 8.0);
    }

    #[test]
    fn uir_metadata_enriches_outputs() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        write_manifest(&job_dir, &sample_uir("j1"), JobStatus::Queued, &[], &[]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(manifest["outputs"]["motion"]["fps"], 24);
        // duration_s copied from intent by the validator's defaults pass.
        assert_eq!(manifest["outputs"]["motion"]["duration_s"], 8.0);
        assert_eq!(manifest["outputs"]["music"]["duration_s"], 8.0);
        // Disabled module gets no enrichment.
        assert!(manifest["outputs"]["scene"].get("fps").is_none());
    }

    #[test]
    fn errors_serialize_with_taxonomy_codes() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        let err = AdapterError::new(ErrorCode::DependencyMissing, "no adapter for motion");
        write_manifest(&job_dir, &sample_uir("j1"), JobStatus::Failed, &[], &[err]).unwrap();
        let manifest = read_manifest(&job_dir).unwrap().unwrap();
        assert_eq!(manifest["status"], "FAILED");
        assert_eq!(manifest["errors"][0]["code"], "E_DEPENDENCY_MISSING");
        assert_eq!(manifest["errors"][0]["retryable"], false);
    }

    #[test]
    fn rewrite_is_byte_identical() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        let uir = sample_uir("j1");
        std::fs::write(job_dir.join("motion/motion.bvh"), "BVH\n").unwrap();
        let artifacts = [bvh_artifact("j1")];

        let path = write_manifest(&job_dir, &uir, JobStatus::Done, &artifacts, &[]).unwrap();
        let first = std::fs::read(&path).unwrap();
        write_manifest(&job_dir, &uir, JobStatus::Done, &artifacts, &[]).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn list_job_manifests_orders_newest_first() {
        let root = TempDir::new().unwrap();
        for (job_id, created_at) in [("a", "2025-01-01T00:00:00Z"), ("b", "2025-06-01T00:00:00Z")] {
            let job_dir = ensure_job_dirs(root.path(), job_id).unwrap();
            let mut uir = sample_uir(job_id);
            uir.job.created_at = Some(created_at.to_string());
            write_manifest(&job_dir, &uir, JobStatus::Queued, &[], &[]).unwrap();
        }
        // A directory without a manifest is skipped.
        std::fs::create_dir_all(root.path().join("empty")).unwrap();

        let manifests = list_job_manifests(root.path()).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0]["job_id"], "b");
        assert_eq!(manifests[1]["job_id"], "a");
    }

    #[test]
    fn missing_assets_root_lists_nothing() {
        let root = TempDir::new().unwrap();
        let manifests = list_job_manifests(&root.path().join("nope")).unwrap();
        assert!(manifests.is_empty());
    }
}
