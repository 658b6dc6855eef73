// SPDX-License-Identifier: MIT OR Apache-2.0
//! Panorama diffusion adapter.
//!
//! Wraps the 360° text-to-panorama generator as a subprocess.  The generator
//! writes an image somewhere under the output directory; discovery polls for
//! the newest one and installs it as `scene/panorama.png`.

use crate::common::{job_id_from_uir, timeout_from_uir};
use mpl_adapter::{
    CommandSpec, MediaAdapter, StageReporter, adapter_log_path, assert_dir_writable,
    build_asset_ref, classify_failure, newest_file_matching, resolve_output_dir, run_logged,
};
use mpl_core::{AdapterResult, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::ascii_json_pretty;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the panorama generator binary.
pub const PANORAMA_BIN_ENV: &str = "ORCH_PANORAMA_BIN";

/// Trigger token the diffusion model was trained with.
const PANORAMA_TRIGGER: &str = "<360panorama>";

/// Drives the local panorama diffusion generator.
pub struct SceneAdapter {
    discovery_window: Duration,
}

impl SceneAdapter {
    /// Create the adapter with the default discovery window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery_window: Duration::from_secs(60),
        }
    }

    /// Override the output-discovery window (tests).
    #[must_use]
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }
}

impl Default for SceneAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaAdapter for SceneAdapter {
    fn provider_id(&self) -> &str {
        "diffusion360_local"
    }

    fn modality(&self) -> Modality {
        Modality::Scene
    }

    fn validate(&self, uir: &Uir) -> Result<(), AdapterError> {
        let Some(scene) = &uir.modules.scene else {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.scene is required",
            ));
        };
        if scene.enabled && scene_prompt(uir).is_none() {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "a prompt is required when scene is enabled",
            ));
        }
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let warnings = Vec::new();
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let Some(prompt) = scene_prompt(uir) else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ValidationInput, "a prompt is required"),
            );
        };

        let Some(bin) = std::env::var_os(PANORAMA_BIN_ENV).map(PathBuf::from) else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(
                    ErrorCode::DependencyMissing,
                    "panorama generator not configured",
                )
                .with_detail("env", PANORAMA_BIN_ENV),
            );
        };

        let output_dir = match resolve_output_dir(out_dir, "scene")
            .and_then(|dir| assert_dir_writable(&dir).map(|()| dir))
        {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        let scene = uir.modules.scene.clone().unwrap_or_default();
        let (width, height) = match scene.resolution.as_deref() {
            Some([w, h]) => (*w, *h),
            _ => (2048, 1024),
        };
        let prompt_used = format!("{PANORAMA_TRIGGER}, {prompt}");
        let log_path = adapter_log_path(out_dir, self.modality());
        let timeout = timeout_from_uir(uir);

        reporter.stage("prepare", 0.1, "preparing panorama inputs");
        let mut argv = vec![
            bin.display().to_string(),
            "--prompt".into(),
            prompt_used.clone(),
            "--width".into(),
            width.to_string(),
            "--height".into(),
            height.to_string(),
            "--output-dir".into(),
            output_dir.display().to_string(),
        ];
        if let Some(negative) = &scene.negative_prompt {
            argv.push("--negative".into());
            argv.push(negative.clone());
        }
        if let Some(seed) = scene.seed {
            argv.push("--seed".into());
            argv.push(seed.to_string());
        }
        if let Some(steps) = scene.steps {
            argv.push("--steps".into());
            argv.push(steps.to_string());
        }
        let spec = CommandSpec::new(argv).timeout(timeout);

        let outcome = match run_logged(&spec, &log_path, reporter, "running", "generating panorama")
        {
            Ok(outcome) => outcome,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        if outcome.canceled {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ModelRuntime, "panorama generation canceled"),
            );
        }
        if !outcome.success() {
            return AdapterResult::failure(
                self.provider_id(),
                classify_failure(&outcome, &log_path, timeout, "panorama generation"),
            );
        }

        let Some(produced) = newest_file_matching(&output_dir, "png", self.discovery_window)
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "panorama output not found")
                    .with_detail("dir", output_dir.display().to_string()),
            );
        };

        let panorama_path = output_dir.join("panorama.png");
        if produced != panorama_path {
            if let Err(e) = std::fs::rename(&produced, &panorama_path)
                .or_else(|_| std::fs::copy(&produced, &panorama_path).map(|_| ()))
            {
                return AdapterResult::failure(
                    self.provider_id(),
                    AdapterError::new(ErrorCode::IoWrite, "failed to install panorama.png")
                        .with_detail("error", e.to_string()),
                );
            }
        }

        reporter.stage("finalize", 0.9, "writing scene metadata");
        let meta = json!({
            "provider": self.provider_id(),
            "prompt_used": prompt_used,
            "width": width,
            "height": height,
            "seed": scene.seed,
            "steps": scene.steps,
            "upscale": scene.upscale,
        });
        let meta_path = output_dir.join("scene_meta.json");
        if let Err(e) = std::fs::write(&meta_path, ascii_json_pretty(&meta)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write scene_meta.json")
                    .with_detail("path", meta_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let mut artifacts = Vec::new();
        for (path, role, mime) in [
            (&panorama_path, "scene_panorama", "image/png"),
            (&meta_path, "scene_meta", "application/json"),
        ] {
            match build_asset_ref(path, out_dir, &job_id, role, mime, None) {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => return AdapterResult::failure(self.provider_id(), err),
            }
        }

        reporter.stage("finalize", 1.0, "panorama ready");
        AdapterResult::success(self.provider_id(), artifacts)
            .with_meta("width", width)
            .with_meta("height", height)
            .with_warnings(warnings)
    }
}

/// The scene prompt, falling back to the raw user prompt.
fn scene_prompt(uir: &Uir) -> Option<String> {
    let module_prompt = uir
        .modules
        .scene
        .as_ref()
        .and_then(|s| s.prompt.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if let Some(p) = module_prompt {
        return Some(p.to_string());
    }
    let raw = uir.input.raw_prompt.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}
