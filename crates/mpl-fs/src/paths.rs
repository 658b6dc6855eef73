// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime directory resolution.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable overriding the runtime directory root.
pub const RUNTIME_DIR_ENV: &str = "ORCH_RUNTIME_DIR";

/// Resolved runtime directory tree.
///
/// ```text
/// <runtime>/
///   assets/   per-job directories, served under /assets/
///   cache/    adapter-private caches
///   logs/     daemon-level logs
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Root runtime directory.
    pub runtime_dir: PathBuf,
    /// Assets root holding the per-job directories.
    pub assets_dir: PathBuf,
    /// Cache directory for adapters.
    pub cache_dir: PathBuf,
    /// Daemon log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Resolve from `ORCH_RUNTIME_DIR`, defaulting to `runtime/` under the
    /// current working directory. All four directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn resolve() -> Result<Self> {
        let root = match std::env::var_os(RUNTIME_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from("runtime"),
        };
        Self::with_root(root)
    }

    /// Build the tree under an explicit root (used by tests and the daemon's
    /// `--runtime-dir` flag). All four directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let runtime_dir = root.into();
        let paths = Self {
            assets_dir: runtime_dir.join("assets"),
            cache_dir: runtime_dir.join("cache"),
            logs_dir: runtime_dir.join("logs"),
            runtime_dir,
        };
        for dir in [
            &paths.runtime_dir,
            &paths.assets_dir,
            &paths.cache_dir,
            &paths.logs_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create runtime dir {}", dir.display()))?;
        }
        Ok(paths)
    }

    /// The directory of one job under the assets root (not created).
    #[must_use]
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.assets_dir.join(job_id)
    }
}

/// Convenience for adapters: the static-characters base URI, overridable via
/// `ORCH_CHARACTER_STATIC_BASE`.
#[must_use]
pub fn character_static_base() -> String {
    std::env::var("ORCH_CHARACTER_STATIC_BASE")
        .ok()
        .filter(|s| !s.trim_end_matches('/').is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| "/static/characters".to_string())
}

/// Lookup helper mirroring `which(1)` for adapter binaries.
#[must_use]
pub fn which(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for p in std::env::split_paths(&path) {
        let candidate = p.join(bin);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
