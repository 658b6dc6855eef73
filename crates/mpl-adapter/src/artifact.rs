// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact reference construction and output-dir discipline.
//!
//! Adapters may only write under a single-segment subdirectory of the job
//! directory; every returned [`AssetRef`] uri is derived from the file's real
//! position so a path escaping the job directory can never be published.

use mpl_core::{AssetRef, Modality};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::make_asset_url;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Resolve (and create) the adapter's output subdirectory.
///
/// # Errors
///
/// `E_VALIDATION_INPUT` when `subdir` is not a single path segment,
/// `E_IO_WRITE` when the directory cannot be created.
pub fn resolve_output_dir(out_dir: &Path, subdir: &str) -> Result<PathBuf, AdapterError> {
    let is_single_segment = !subdir.is_empty()
        && !subdir.contains(['/', '\\'])
        && subdir != "."
        && subdir != "..";
    if !is_single_segment {
        return Err(
            AdapterError::new(ErrorCode::ValidationInput, "subdir must be a single path segment")
                .with_detail("subdir", subdir),
        );
    }
    let output_dir = out_dir.join(subdir);
    std::fs::create_dir_all(&output_dir).map_err(|e| {
        AdapterError::new(ErrorCode::IoWrite, "failed to create output directory")
            .with_detail("path", output_dir.display().to_string())
            .with_detail("error", e.to_string())
    })?;
    Ok(output_dir)
}

/// Probe a directory for writability with a throwaway file.
///
/// # Errors
///
/// `E_IO_WRITE` when the probe cannot be written.
pub fn assert_dir_writable(dir: &Path) -> Result<(), AdapterError> {
    let probe = dir.join(".write_probe");
    std::fs::write(&probe, b"probe")
        .and_then(|()| std::fs::remove_file(&probe))
        .map_err(|e| {
            AdapterError::new(ErrorCode::IoWrite, "output directory is not writable")
                .with_detail("path", dir.display().to_string())
                .with_detail("error", e.to_string())
        })
}

/// The per-modality subprocess log file: `<out_dir>/logs/<modality>.log`.
#[must_use]
pub fn adapter_log_path(out_dir: &Path, modality: Modality) -> PathBuf {
    out_dir.join("logs").join(format!("{}.log", modality.as_str()))
}

/// Build an [`AssetRef`] for a file inside the job directory.
///
/// The uri is derived from the file's position relative to `job_dir`; the
/// file must sit at least one subdirectory deep.  `bytes` is filled from file
/// metadata when the file exists.
///
/// # Errors
///
/// `E_VALIDATION_INPUT` when the path is outside the job directory or
/// directly in its root.
pub fn build_asset_ref(
    path: &Path,
    job_dir: &Path,
    job_id: &str,
    role: &str,
    mime: &str,
    meta: Option<Map<String, Value>>,
) -> Result<AssetRef, AdapterError> {
    let rel = path.strip_prefix(job_dir).map_err(|_| {
        AdapterError::new(
            ErrorCode::ValidationInput,
            "asset path must be under the job directory",
        )
        .with_detail("path", path.display().to_string())
        .with_detail("job_dir", job_dir.display().to_string())
    })?;
    let segments: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if segments.len() < 2 {
        return Err(AdapterError::new(
            ErrorCode::ValidationInput,
            "asset path must be under out_dir/<subdir>/",
        )
        .with_detail("path", path.display().to_string()));
    }
    let bytes = std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len());
    Ok(AssetRef {
        id: format!("{job_id}:{role}"),
        role: role.to_string(),
        uri: make_asset_url(job_id, &segments),
        mime: mime.to_string(),
        bytes,
        sha256: None,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_output_dir_creates_single_segment() {
        let tmp = TempDir::new().unwrap();
        let dir = resolve_output_dir(tmp.path(), "music").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, tmp.path().join("music"));
    }

    #[test]
    fn resolve_output_dir_rejects_nested_or_dotted() {
        let tmp = TempDir::new().unwrap();
        for bad in ["a/b", "..", ".", "", "a\\b"] {
            let err = resolve_output_dir(tmp.path(), bad).unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationInput, "accepted {bad:?}");
        }
    }

    #[test]
    fn writable_probe_passes_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        assert_dir_writable(tmp.path()).unwrap();
        assert!(!tmp.path().join(".write_probe").exists());
    }

    #[test]
    fn writable_probe_fails_on_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let err = assert_dir_writable(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.code, ErrorCode::IoWrite);
        assert!(err.retryable);
    }

    #[test]
    fn log_path_is_per_modality() {
        let path = adapter_log_path(Path::new("/jobs/j1"), Modality::Motion);
        assert_eq!(path, Path::new("/jobs/j1/logs/motion.log"));
    }

    #[test]
    fn asset_ref_uri_is_job_relative() {
        let tmp = TempDir::new().unwrap();
        let music_dir = tmp.path().join("music");
        std::fs::create_dir_all(&music_dir).unwrap();
        let file = music_dir.join("music.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let asset = build_asset_ref(&file, tmp.path(), "j1", "music_wav", "audio/wav", None).unwrap();
        assert_eq!(asset.id, "j1:music_wav");
        assert_eq!(asset.uri, "/assets/j1/music/music.wav");
        assert_eq!(asset.bytes, Some(4));
        assert!(asset.uri.starts_with("/assets/j1/music/"));
    }

    #[test]
    fn asset_ref_rejects_path_outside_job_dir() {
        let tmp = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let file = elsewhere.path().join("scene/panorama.png");
        let err =
            build_asset_ref(&file, tmp.path(), "j1", "scene_panorama", "image/png", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInput);
    }

    #[test]
    fn asset_ref_rejects_job_root_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("manifest.json");
        let err =
            build_asset_ref(&file, tmp.path(), "j1", "manifest", "application/json", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInput);
    }

    #[test]
    fn asset_ref_carries_meta() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("scene")).unwrap();
        let file = tmp.path().join("scene/panorama.png");
        std::fs::write(&file, b"png").unwrap();
        let mut meta = Map::new();
        meta.insert("seed".into(), serde_json::json!(42));
        let asset =
            build_asset_ref(&file, tmp.path(), "j1", "scene_panorama", "image/png", Some(meta))
                .unwrap();
        assert_eq!(asset.meta.unwrap()["seed"], serde_json::json!(42));
    }
}
