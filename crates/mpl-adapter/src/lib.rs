// SPDX-License-Identifier: MIT OR Apache-2.0
//! Uniform adapter contract and provider registry.
//!
//! Every generator — diffusion panorama, motion model, music CLI, the pure
//! character selector — sits behind [`MediaAdapter`]: `validate` checks
//! provider-specific preconditions without mutating anything, `run` blocks
//! until artifacts exist on disk and returns an [`AdapterResult`].  The
//! scheduler invokes `run` on the blocking pool and hands it a bridged
//! [`StageReporter`] that marshals progress back to the async loop.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Artifact reference construction and output-dir discipline.
pub mod artifact;
/// Output discovery with bounded polling.
pub mod discover;
/// Blocking subprocess runner with timeout, cancellation, and progress.
pub mod process;

pub use artifact::{
    adapter_log_path, assert_dir_writable, build_asset_ref, resolve_output_dir,
};
pub use discover::{DISCOVERY_WINDOW, newest_file_matching, wait_for_file};
pub use process::{CommandSpec, RunOutcome, classify_failure, run_logged};

use mpl_core::{AdapterResult, Modality, Uir};
use mpl_error::AdapterError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A provider wrapping one generator behind the uniform contract.
pub trait MediaAdapter: Send + Sync {
    /// Unique provider identifier (e.g. `"musicgpt_cli"`).
    fn provider_id(&self) -> &str;

    /// The modality this provider serves.
    fn modality(&self) -> Modality;

    /// How many concurrent runs this provider tolerates.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Check provider-specific preconditions (model files, binaries).
    ///
    /// Must not mutate anything.  The UIR itself is already validated by the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] describing the unmet precondition.
    fn validate(&self, uir: &Uir) -> Result<(), AdapterError>;

    /// Produce this provider's artifacts under `out_dir/<modality>/`.
    ///
    /// Blocking: called on a worker thread.  Progress flows through
    /// `reporter`; adapters should poll [`StageReporter::canceled`] at
    /// convenient points and bail out early when it flips.
    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult;
}

/// Progress sink handed to [`MediaAdapter::run`], callable from blocking code.
pub trait StageReporter: Send + Sync {
    /// Report an intra-stage step with progress in `[0, 1]`.
    fn stage(&self, name: &str, progress: f64, message: &str);

    /// Emit a log line onto the job's stream.
    fn log(&self, line: &str);

    /// Whether the job has been canceled; adapters should stop promptly.
    fn canceled(&self) -> bool {
        false
    }
}

/// Reporter that swallows everything (tests, fire-and-forget runs).
pub struct NullReporter;

impl StageReporter for NullReporter {
    fn stage(&self, _name: &str, _progress: f64, _message: &str) {}

    fn log(&self, _line: &str) {}
}

/// Read-only view of a job's accumulated artifacts.
///
/// Composing adapters (preview, export) resolve upstream outputs by role
/// through this interface instead of parsing URIs out of the job directory;
/// the scheduler injects a store-backed implementation at wiring time, so
/// adapters depend on the store's read surface and never the reverse.
pub trait ArtifactSource: Send + Sync {
    /// The artifacts a job has accumulated so far, oldest first.
    fn artifacts(&self, job_id: &str) -> Vec<mpl_core::AssetRef>;
}

/// An [`ArtifactSource`] with no artifacts (isolated adapter runs).
pub struct NoArtifacts;

impl ArtifactSource for NoArtifacts {
    fn artifacts(&self, _job_id: &str) -> Vec<mpl_core::AssetRef> {
        Vec::new()
    }
}

/// Registry of adapters by provider id; last registration wins.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Mutex<HashMap<String, Vec<Arc<dyn MediaAdapter>>>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its provider id.
    pub fn register(&self, adapter: Arc<dyn MediaAdapter>) {
        let provider_id = adapter.provider_id().to_string();
        let mut adapters = self.lock();
        adapters.entry(provider_id).or_default().push(adapter);
    }

    /// Look up the most recently registered adapter for a provider id.
    #[must_use]
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn MediaAdapter>> {
        let adapters = self.lock();
        adapters
            .get(provider_id)
            .and_then(|entries| entries.last().cloned())
    }

    /// All registered provider ids, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let adapters = self.lock();
        let mut ids: Vec<String> = adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<dyn MediaAdapter>>>> {
        self.adapters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Built-in default provider per modality, used when `routing` names none.
#[must_use]
pub fn default_provider(modality: Modality) -> &'static str {
    match modality {
        Modality::Scene => "diffusion360_local",
        Modality::Motion => "animationgpt_local",
        Modality::Music => "musicgpt_cli",
        Modality::Character => "builtin_library",
        Modality::Preview => "web_threejs",
        Modality::Export => "ffmpeg_export",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpl_core::AdapterResult;

    struct StubAdapter {
        id: &'static str,
        modality: Modality,
        marker: u32,
    }

    impl MediaAdapter for StubAdapter {
        fn provider_id(&self) -> &str {
            self.id
        }

        fn modality(&self) -> Modality {
            self.modality
        }

        fn validate(&self, _uir: &Uir) -> Result<(), AdapterError> {
            Ok(())
        }

        fn run(&self, _uir: &Uir, _out_dir: &Path, _reporter: &dyn StageReporter) -> AdapterResult {
            AdapterResult::success(self.id, Vec::new()).with_meta("marker", self.marker)
        }
    }

    #[test]
    fn register_and_get() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter {
            id: "stub_music",
            modality: Modality::Music,
            marker: 1,
        }));
        let adapter = registry.get("stub_music").unwrap();
        assert_eq!(adapter.modality(), Modality::Music);
        assert_eq!(adapter.max_concurrency(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let registry = AdapterRegistry::new();
        for marker in [1, 2] {
            registry.register(Arc::new(StubAdapter {
                id: "stub",
                modality: Modality::Scene,
                marker,
            }));
        }
        let adapter = registry.get("stub").unwrap();
        let result = adapter.run(&Uir::default(), Path::new("."), &NullReporter);
        assert_eq!(result.meta["marker"], serde_json::json!(2));
    }

    #[test]
    fn providers_are_sorted() {
        let registry = AdapterRegistry::new();
        for id in ["zeta", "alpha"] {
            registry.register(Arc::new(StubAdapter {
                id,
                modality: Modality::Export,
                marker: 0,
            }));
        }
        assert_eq!(registry.providers(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn default_provider_map_is_total() {
        for modality in Modality::ALL {
            assert!(!default_provider(modality).is_empty());
        }
        assert_eq!(default_provider(Modality::Motion), "animationgpt_local");
        assert_eq!(default_provider(Modality::Export), "ffmpeg_export");
    }

    #[test]
    fn null_reporter_reports_not_canceled() {
        assert!(!NullReporter.canceled());
    }
}
