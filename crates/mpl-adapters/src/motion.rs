// SPDX-License-Identifier: MIT OR Apache-2.0
//! Motion generator adapter.
//!
//! Wraps the text-to-motion model as a subprocess.  The generator emits a
//! joint-position `.npy` and a skeletal `.bvh`; both are installed under
//! canonical names together with `motion_meta.json`.

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

/// Environment variable naming the motion generator binary.
pub const MOTION_BIN_ENV: &str = "ORCH_MOTION_BIN";

/// Skeleton the generator rigs against.
const SKELETON: &str = "SMPL_22";

/// Drives the local text-to-motion generator.
pub struct MotionAdapter {
    discovery_window: Duration,
}

impl MotionAdapter {
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

impl Default for MotionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaAdapter for MotionAdapter {
    fn provider_id(&self) -> &str {
        "animationgpt_local"
    }

    fn modality(&self) -> Modality {
        Modality::Motion
    }

    fn validate(&self, uir: &Uir) -> Result<(), AdapterError> {
        let Some(motion) = &uir.modules.motion else {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.motion is required",
            ));
        };
        if motion.enabled && motion_prompt(uir).is_none() {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "a prompt is required when motion is enabled",
            ));
        }
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let mut warnings = Vec::new();
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let Some(prompt) = motion_prompt(uir) else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ValidationInput, "a prompt is required"),
            );
        };
        let motion = uir.modules.motion.clone().unwrap_or_default();
        let fps = motion.fps;
        let duration_s = motion.duration_s.unwrap_or(uir.intent.duration_s);

        let Some(bin) = std::env::var_os(MOTION_BIN_ENV).map(PathBuf::from) else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(
                    ErrorCode::DependencyMissing,
                    "motion generator not configured",
                )
                .with_detail("env", MOTION_BIN_ENV),
            );
        };

        let output_dir = match resolve_output_dir(out_dir, "motion")
            .and_then(|dir| assert_dir_writable(&dir).map(|()| dir))
        {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let log_path = adapter_log_path(out_dir, self.modality());
        let timeout = timeout_from_uir(uir);

        reporter.stage("prepare", 0.1, "preparing motion inputs");
        let mut argv = vec![
            bin.display().to_string(),
            "--prompt".into(),
            prompt.clone(),
            "--fps".into(),
            fps.to_string(),
            "--duration".into(),
            format!("{duration_s}"),
            "--output-dir".into(),
            output_dir.display().to_string(),
        ];
        if let Some(style) = &motion.style {
            argv.push("--style".into());
            argv.push(style.clone());
        }
        if let Some(gpu) = uir
            .runtime
            .as_ref()
            .and_then(|r| r.locks.as_ref())
            .and_then(|l| l.gpu.as_ref())
        {
            argv.push("--gpu".into());
            argv.push(gpu.clone());
        }
        let spec = CommandSpec::new(argv).timeout(timeout);

        let outcome =
            match run_logged(&spec, &log_path, reporter, "running", "generating motion") {
                Ok(outcome) => outcome,
                Err(err) => return AdapterResult::failure(self.provider_id(), err),
            };
        if outcome.canceled {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ModelRuntime, "motion generation canceled"),
            );
        }
        if !outcome.success() {
            return AdapterResult::failure(
                self.provider_id(),
                classify_failure(&outcome, &log_path, timeout, "motion generation"),
            );
        }

        let Some(npy_produced) = newest_file_matching(&output_dir, "npy", self.discovery_window)
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "motion output not found")
                    .with_detail("dir", output_dir.display().to_string()),
            );
        };

        let npy_path = output_dir.join("motion_out.npy");
        if npy_produced != npy_path {
            if let Err(e) = std::fs::rename(&npy_produced, &npy_path)
                .or_else(|_| std::fs::copy(&npy_produced, &npy_path).map(|_| ()))
            {
                return AdapterResult::failure(
                    self.provider_id(),
                    AdapterError::new(ErrorCode::IoWrite, "failed to install motion_out.npy")
                        .with_detail("error", e.to_string()),
                );
            }
        }

        reporter.stage("finalize", 0.9, "collecting skeletal animation");
        let bvh_path = output_dir.join("motion.bvh");
        match newest_file_matching(&output_dir, "bvh", self.discovery_window) {
            Some(produced) if produced != bvh_path => {
                if let Err(e) = std::fs::rename(&produced, &bvh_path)
                    .or_else(|_| std::fs::copy(&produced, &bvh_path).map(|_| ()))
                {
                    return AdapterResult::failure(
                        self.provider_id(),
                        AdapterError::new(ErrorCode::IoWrite, "failed to install motion.bvh")
                            .with_detail("error", e.to_string()),
                    );
                }
                warnings.push(format!(
                    "generator wrote {}; installed as motion.bvh",
                    produced.display()
                ));
            }
            Some(_) => {}
            None => {
                return AdapterResult::failure(
                    self.provider_id(),
                    AdapterError::new(ErrorCode::IoWrite, "skeletal output missing")
                        .with_detail("path", bvh_path.display().to_string()),
                );
            }
        }

        let meta = json!({
            "provider": self.provider_id(),
            "prompt_used": prompt,
            "fps": fps,
            "duration_s": duration_s,
            "requested_duration_s": duration_s,
            "skeleton": SKELETON,
        });
        let meta_path = output_dir.join("motion_meta.json");
        if let Err(e) = std::fs::write(&meta_path, ascii_json_pretty(&meta)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write motion_meta.json")
                    .with_detail("path", meta_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let mut artifacts = Vec::new();
        for (path, role, mime) in [
            (&bvh_path, "motion_bvh", "text/plain"),
            (&npy_path, "motion_npy", "application/octet-stream"),
            (&meta_path, "motion_meta", "application/json"),
        ] {
            match build_asset_ref(path, out_dir, &job_id, role, mime, None) {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => return AdapterResult::failure(self.provider_id(), err),
            }
        }

        reporter.stage("finalize", 1.0, "motion artifacts ready");
        AdapterResult::success(self.provider_id(), artifacts)
            .with_meta("fps", fps)
            .with_meta("duration_s", duration_s)
            .with_warnings(warnings)
    }
}

/// The motion prompt, falling back to the raw user prompt.
fn motion_prompt(uir: &Uir) -> Option<String> {
    let module_prompt = uir
        .modules
        .motion
        .as_ref()
        .and_then(|m| m.prompt.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if let Some(p) = module_prompt {
        return Some(p.to_string());
    }
    let raw = uir.input.raw_prompt.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpl_adapter::NullReporter;
    use mpl_core::parse_uir;
    use tempfile::TempDir;

    fn uir() -> Uir {
        parse_uir(&json!({
            "uir_version": "1.0",
            "job": {"id": "j1", "created_at": "2025-01-01T00:00:00Z"},
            "input": {"raw_prompt": "a sword dance"},
            "intent": {"targets": ["motion"], "duration_s": 8},
            "modules": {
                "scene": {"enabled": false},
                "motion": {"enabled": true, "fps": 24},
                "music": {"enabled": false},
                "character": {"enabled": false},
                "preview": {"enabled": false},
                "export": {"enabled": false},
            },
        }))
        .unwrap()
    }

    #[test]
    fn validate_requires_prompt_when_enabled() {
        let mut uir = uir();
        uir.input.raw_prompt = String::new();
        let err = MotionAdapter::new().validate(&uir).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInput);
    }

    #[test]
    fn validate_passes_with_raw_prompt() {
        MotionAdapter::new().validate(&uir()).unwrap();
    }

    #[test]
    fn missing_generator_is_dependency_error() {
        if std::env::var_os(MOTION_BIN_ENV).is_some() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let result = MotionAdapter::new().run(&uir(), tmp.path(), &NullReporter);
        let err = result.error.unwrap();
        assert_eq!(err.code, ErrorCode::DependencyMissing);
        assert_eq!(err.detail["env"], json!(MOTION_BIN_ENV));
    }
}
