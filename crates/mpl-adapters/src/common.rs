// SPDX-License-Identifier: MIT OR Apache-2.0
//! Helpers shared by the reference adapters.

use mpl_core::{AssetRef, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::asset_uri_to_path;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The job id every adapter derives its URIs from.
pub(crate) fn job_id_from_uir(uir: &Uir) -> Result<String, AdapterError> {
    uir.job_id()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AdapterError::new(ErrorCode::ValidationInput, "missing job.id"))
}

/// Append one line to an adapter log, best-effort.
pub(crate) fn log_line(log_path: &Path, line: &str) {
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        let _ = writeln!(file, "{line}");
    }
}

/// The per-subprocess timeout from `constraints.max_runtime_s`.
pub(crate) fn timeout_from_uir(uir: &Uir) -> Option<Duration> {
    uir.max_runtime_s().map(Duration::from_secs_f64)
}

/// Resolve an artifact with the given role to an on-disk path, consulting
/// the provided artifact list first and a canonical fallback path second.
pub(crate) fn resolve_role_path(
    artifacts: &[AssetRef],
    job_dir: &Path,
    job_id: &str,
    role: &str,
    fallback_rel: &str,
) -> Option<PathBuf> {
    let from_artifacts = artifacts
        .iter()
        .filter(|a| a.role == role)
        .filter_map(|a| asset_uri_to_path(job_dir, job_id, &a.uri))
        .find(|path| path.is_file());
    if from_artifacts.is_some() {
        return from_artifacts;
    }
    let fallback = job_dir.join(fallback_rel);
    fallback.is_file().then_some(fallback)
}

/// The artifact uri for a role from the list, when present.
pub(crate) fn role_uri(artifacts: &[AssetRef], role: &str) -> Option<String> {
    artifacts
        .iter()
        .find(|a| a.role == role)
        .map(|a| a.uri.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn job_id_extraction() {
        let uir = mpl_core::parse_uir(&json!({
            "uir_version": "1.0",
            "job": {"id": "j9"},
            "input": {"raw_prompt": "x"},
            "intent": {"targets": ["motion"]},
            "modules": {
                "scene": {"enabled": false}, "motion": {"enabled": true},
                "music": {"enabled": false}, "character": {"enabled": false},
                "preview": {"enabled": false}, "export": {"enabled": false},
            },
        }))
        .unwrap();
        assert_eq!(job_id_from_uir(&uir).unwrap(), "j9");

        let bare = Uir::default();
        assert_eq!(
            job_id_from_uir(&bare).unwrap_err().code,
            ErrorCode::ValidationInput
        );
    }

    #[test]
    fn role_path_prefers_artifact_then_fallback() {
        let tmp = TempDir::new().unwrap();
        let job_dir = tmp.path();
        std::fs::create_dir_all(job_dir.join("music")).unwrap();

        let artifact = AssetRef {
            id: "j:music_wav".into(),
            role: "music_wav".into(),
            uri: "/assets/j/music/other.wav".into(),
            mime: "audio/wav".into(),
            bytes: None,
            sha256: None,
            meta: None,
        };

        // Neither file exists yet.
        assert!(resolve_role_path(&[artifact.clone()], job_dir, "j", "music_wav", "music/music.wav").is_none());

        // Fallback exists.
        std::fs::write(job_dir.join("music/music.wav"), b"w").unwrap();
        let found =
            resolve_role_path(&[artifact.clone()], job_dir, "j", "music_wav", "music/music.wav")
                .unwrap();
        assert_eq!(found, job_dir.join("music/music.wav"));

        // Artifact file exists: it wins.
        std::fs::write(job_dir.join("music/other.wav"), b"w").unwrap();
        let found =
            resolve_role_path(&[artifact], job_dir, "j", "music_wav", "music/music.wav").unwrap();
        assert_eq!(found, job_dir.join("music/other.wav"));
    }

    #[test]
    fn log_line_appends() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("logs/x.log");
        log_line(&log, "[a] one");
        log_line(&log, "[b] two");
        let text = std::fs::read_to_string(&log).unwrap();
        assert_eq!(text, "[a] one\n[b] two\n");
    }
}
