// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem layout and manifest persistence for job directories.
//!
//! Every job owns `<assets_root>/<job_id>/` with a fixed set of
//! subdirectories; `manifest.json` in the job root is the on-disk canonical
//! record, rewritten at every stage boundary and terminal transition.
//! Adapters never construct paths themselves — they go through
//! [`ensure_job_dirs`] and [`make_asset_url`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Deterministic ASCII-escaped JSON output.
pub mod jsonio;
/// Manifest construction and persistence.
pub mod manifest;
/// Runtime directory resolution.
pub mod paths;

pub use jsonio::ascii_json_pretty;
pub use manifest::{list_job_manifests, read_manifest, write_manifest};
pub use paths::RuntimePaths;

use anyhow::{Context, Result};
use mpl_core::Uir;
use std::path::{Path, PathBuf};

/// Subdirectories created in every job directory.
pub const JOB_SUBDIRS: [&str; 6] = ["logs", "scene", "motion", "music", "preview", "export"];

/// Create (idempotently) the job directory and its fixed subdirectories.
///
/// # Errors
///
/// Returns an error when a directory cannot be created.
pub fn ensure_job_dirs(assets_root: &Path, job_id: &str) -> Result<PathBuf> {
    let job_dir = assets_root.join(job_id);
    for name in JOB_SUBDIRS {
        let sub = job_dir.join(name);
        std::fs::create_dir_all(&sub)
            .with_context(|| format!("create job subdir {}", sub.display()))?;
    }
    Ok(job_dir)
}

/// Persist the validated UIR as `uir.json` in the job root.
///
/// # Errors
///
/// Returns an error when serialization or the write fails.
pub fn write_uir(job_dir: &Path, uir: &Uir) -> Result<PathBuf> {
    let value = serde_json::to_value(uir).context("serialize uir")?;
    let path = job_dir.join("uir.json");
    std::fs::write(&path, ascii_json_pretty(&value))
        .with_context(|| format!("write uir to {}", path.display()))?;
    Ok(path)
}

/// Build a client-facing asset URL: `/assets/<job_id>/<parts…>`.
///
/// Parts are joined with `/`; backslashes are normalized and empty segments
/// dropped, so a Windows-y relative path still yields a clean URL.
#[must_use]
pub fn make_asset_url(job_id: &str, parts: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for part in parts {
        for segment in part.split(['/', '\\']) {
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
    }
    format!("/assets/{job_id}/{}", segments.join("/"))
}

/// Resolve an asset `uri` (`/assets/<job_id>/<rel>`) to a path under the job
/// directory. Returns `None` for URIs outside this job's asset space.
#[must_use]
pub fn asset_uri_to_path(job_dir: &Path, job_id: &str, uri: &str) -> Option<PathBuf> {
    let prefix = format!("/assets/{job_id}/");
    let rel = uri.strip_prefix(&prefix)?;
    if rel.is_empty() || rel.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return None;
    }
    Some(job_dir.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ensure_job_dirs_creates_all_subdirs() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        for name in JOB_SUBDIRS {
            assert!(job_dir.join(name).is_dir(), "missing {name}");
        }
    }

    #[test]
    fn ensure_job_dirs_is_idempotent() {
        let root = TempDir::new().unwrap();
        let a = ensure_job_dirs(root.path(), "j1").unwrap();
        let b = ensure_job_dirs(root.path(), "j1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn asset_url_joins_and_normalizes() {
        assert_eq!(
            make_asset_url("j1", &["scene", "panorama.png"]),
            "/assets/j1/scene/panorama.png"
        );
        assert_eq!(
            make_asset_url("j1", &["/motion/", "motion.bvh"]),
            "/assets/j1/motion/motion.bvh"
        );
        assert_eq!(
            make_asset_url("j1", &["export\\final.mp4"]),
            "/assets/j1/export/final.mp4"
        );
        assert_eq!(make_asset_url("j1", &["manifest.json"]), "/assets/j1/manifest.json");
    }

    #[test]
    fn asset_uri_roundtrips_to_path() {
        let job_dir = PathBuf::from("/data/assets/j1");
        let path = asset_uri_to_path(&job_dir, "j1", "/assets/j1/music/music.wav").unwrap();
        assert_eq!(path, job_dir.join("music/music.wav"));
    }

    #[test]
    fn asset_uri_rejects_foreign_or_escaping_uris() {
        let job_dir = PathBuf::from("/data/assets/j1");
        assert!(asset_uri_to_path(&job_dir, "j1", "/assets/other/music.wav").is_none());
        assert!(asset_uri_to_path(&job_dir, "j1", "/assets/j1/../j2/x").is_none());
        assert!(asset_uri_to_path(&job_dir, "j1", "/assets/j1/").is_none());
        assert!(asset_uri_to_path(&job_dir, "j1", "relative/path").is_none());
    }

    #[test]
    fn write_uir_emits_sorted_ascii_json() {
        let root = TempDir::new().unwrap();
        let job_dir = ensure_job_dirs(root.path(), "j1").unwrap();
        let value = serde_json::json!({
            "uir_version": "1.0",
            "input": {"raw_prompt": "café"},
            "intent": {"targets": ["motion"]},
            "modules": {
                "scene": {"enabled": false}, "motion": {"enabled": true},
                "music": {"enabled": false}, "character": {"enabled": false},
                "preview": {"enabled": false}, "export": {"enabled": false},
            },
        });
        let uir = mpl_core::parse_uir(&value).unwrap();
        let path = write_uir(&job_dir, &uir).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.is_ascii());
        assert!(text.contains("caf\\u00e9"));
    }
}
