// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic mock providers.
//!
//! Each mock writes the canonical artifact files for its modality with fixed
//! bytes and returns canned references, so the full pipeline can run without
//! any external generator.  [`FailingAdapter`] and [`HangingAdapter`] cover
//! the failure and cancellation paths in tests.

use crate::common::job_id_from_uir;
use mpl_adapter::{MediaAdapter, StageReporter, build_asset_ref, resolve_output_dir};
use mpl_core::{AdapterResult, AssetRef, ExportFormat, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use std::path::Path;
use std::time::{Duration, Instant};

/// Deterministic provider writing fixed artifact bytes.
pub struct MockAdapter {
    provider_id: String,
    modality: Modality,
}

impl MockAdapter {
    /// Mock under the conventional `mock_<modality>` provider id.
    #[must_use]
    pub fn new(modality: Modality) -> Self {
        Self::with_provider_id(format!("mock_{modality}"), modality)
    }

    /// Mock registered under an arbitrary provider id (e.g. to stand in for
    /// a real provider's default id).
    #[must_use]
    pub fn with_provider_id(provider_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            provider_id: provider_id.into(),
            modality,
        }
    }

    fn write_artifacts(
        &self,
        uir: &Uir,
        out_dir: &Path,
        job_id: &str,
    ) -> Result<Vec<AssetRef>, AdapterError> {
        let dir = resolve_output_dir(out_dir, self.modality.as_str())?;
        let files: Vec<(&str, &str, &[u8])> = match self.modality {
            Modality::Scene => vec![("panorama.png", "scene_panorama", b"mock png")],
            Modality::Motion => vec![
                ("motion.bvh", "motion_bvh", b"HIERARCHY\nROOT Hips\n"),
                ("motion_out.npy", "motion_npy", b"\x93NUMPY"),
                ("motion_meta.json", "motion_meta", b"{\"fps\": 30}"),
            ],
            Modality::Music => vec![("music.wav", "music_wav", b"RIFF mock")],
            Modality::Character => vec![(
                "character_manifest.json",
                "character_manifest",
                b"{\"character_id\": \"samurai_01\"}",
            )],
            Modality::Preview => vec![(
                "preview_config.json",
                "preview_config",
                b"{\"camera\": {\"preset\": \"orbit\"}}",
            )],
            Modality::Export => {
                let zip = uir
                    .modules
                    .export
                    .as_ref()
                    .is_some_and(|e| e.format == ExportFormat::Zip);
                if zip {
                    vec![("bundle.zip", "export_zip", b"PK mock")]
                } else {
                    vec![("final.mp4", "export_mp4", b"mp4 mock")]
                }
            }
        };

        let mut artifacts = Vec::new();
        for (name, role, bytes) in files {
            let path = dir.join(name);
            std::fs::write(&path, bytes).map_err(|e| {
                AdapterError::new(ErrorCode::IoWrite, "mock artifact write failed")
                    .with_detail("path", path.display().to_string())
                    .with_detail("error", e.to_string())
            })?;
            let mime = match path.extension().and_then(|e| e.to_str()) {
                Some("png") => "image/png",
                Some("wav") => "audio/wav",
                Some("json") => "application/json",
                Some("mp4") => "video/mp4",
                Some("zip") => "application/zip",
                _ => "text/plain",
            };
            artifacts.push(build_asset_ref(&path, out_dir, job_id, role, mime, None)?);
        }
        Ok(artifacts)
    }
}

impl MediaAdapter for MockAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn max_concurrency(&self) -> usize {
        2
    }

    fn validate(&self, _uir: &Uir) -> Result<(), AdapterError> {
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id.clone(), err),
        };
        reporter.stage("prepare", 0.1, "mock preparing");
        reporter.log(&format!("[{}] mock run", self.modality));
        let artifacts = match self.write_artifacts(uir, out_dir, &job_id) {
            Ok(artifacts) => artifacts,
            Err(err) => return AdapterResult::failure(self.provider_id.clone(), err),
        };
        reporter.stage("finalize", 1.0, "mock done");
        AdapterResult::success(self.provider_id.clone(), artifacts).with_meta("mock", true)
    }
}

/// Provider that always fails with the configured error.
pub struct FailingAdapter {
    provider_id: String,
    modality: Modality,
    error: AdapterError,
}

impl FailingAdapter {
    /// Build a failing provider.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, modality: Modality, error: AdapterError) -> Self {
        Self {
            provider_id: provider_id.into(),
            modality,
            error,
        }
    }
}

impl MediaAdapter for FailingAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn validate(&self, _uir: &Uir) -> Result<(), AdapterError> {
        Ok(())
    }

    fn run(&self, _uir: &Uir, _out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        reporter.stage("running", 0.5, "about to fail");
        AdapterResult::failure(self.provider_id.clone(), self.error.clone())
    }
}

/// Provider that blocks until the job is canceled (or a safety cap expires).
pub struct HangingAdapter {
    provider_id: String,
    modality: Modality,
    cap: Duration,
}

impl HangingAdapter {
    /// Build a hanging provider with a 30 s safety cap.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            provider_id: provider_id.into(),
            modality,
            cap: Duration::from_secs(30),
        }
    }
}

impl MediaAdapter for HangingAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn validate(&self, _uir: &Uir) -> Result<(), AdapterError> {
        Ok(())
    }

    fn run(&self, _uir: &Uir, _out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        reporter.stage("running", 0.2, "hanging until canceled");
        let started = Instant::now();
        while !reporter.canceled() && started.elapsed() < self.cap {
            std::thread::sleep(Duration::from_millis(20));
        }
        AdapterResult::failure(
            self.provider_id.clone(),
            AdapterError::new(ErrorCode::ModelRuntime, "generator interrupted"),
        )
    }
}

/// Register mocks under every default provider id, so routing-less
/// submissions run fully offline.
pub fn register_mock_providers(registry: &mpl_adapter::AdapterRegistry) {
    for modality in Modality::ALL {
        registry.register(std::sync::Arc::new(MockAdapter::with_provider_id(
            mpl_adapter::default_provider(modality),
            modality,
        )));
    }
}
