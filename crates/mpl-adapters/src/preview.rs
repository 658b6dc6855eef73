// SPDX-License-Identifier: MIT OR Apache-2.0
//! Preview configuration builder.
//!
//! Pure composer: resolves upstream artifacts by role and emits the
//! `preview_config.json` the web viewer loads.  Motion is the only hard
//! requirement; a missing panorama or track degrades to a warning.

use crate::common::{job_id_from_uir, resolve_role_path, role_uri};
use mpl_adapter::{
    ArtifactSource, MediaAdapter, StageReporter, assert_dir_writable, build_asset_ref,
    resolve_output_dir,
};
use mpl_core::{AdapterResult, AssetRef, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::{ascii_json_pretty, make_asset_url};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;

/// Canonical on-disk location per role, used when the artifact list does not
/// name one.
static ROLE_FALLBACKS: [(&str, &str, &str); 4] = [
    ("scene_panorama", "scene/panorama.png", "image/png"),
    ("motion_bvh", "motion/motion.bvh", "text/plain"),
    ("music_wav", "music/music.wav", "audio/wav"),
    (
        "character_manifest",
        "character/character_manifest.json",
        "application/json",
    ),
];

/// Builds the web preview configuration from prior artifacts.
pub struct PreviewBuilder {
    artifacts: Arc<dyn ArtifactSource>,
}

impl PreviewBuilder {
    /// Create the builder over the given artifact source.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactSource>) -> Self {
        Self { artifacts }
    }

    fn resolve_uri(
        &self,
        artifacts: &[AssetRef],
        job_dir: &Path,
        job_id: &str,
        role: &str,
    ) -> Option<String> {
        let (_, fallback_rel, _) = ROLE_FALLBACKS.iter().find(|(r, _, _)| *r == role)?;
        let path = resolve_role_path(artifacts, job_dir, job_id, role, fallback_rel)?;
        // Prefer the artifact's own uri; derive one for fallback hits.
        if let Some(uri) = role_uri(artifacts, role) {
            if path == job_dir.join(fallback_rel) && !uri.ends_with(fallback_rel) {
                // The artifact uri names a file that was missing; the
                // fallback file is what we actually resolved.
                return Some(make_asset_url(job_id, &[fallback_rel]));
            }
            return Some(uri);
        }
        Some(make_asset_url(job_id, &[fallback_rel]))
    }
}

impl MediaAdapter for PreviewBuilder {
    fn provider_id(&self) -> &str {
        "web_threejs"
    }

    fn modality(&self) -> Modality {
        Modality::Preview
    }

    fn validate(&self, _uir: &Uir) -> Result<(), AdapterError> {
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let mut warnings = Vec::new();
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        reporter.stage("preview_config_start", 0.0, "building preview config");
        let output_dir = match resolve_output_dir(out_dir, "preview")
            .and_then(|dir| assert_dir_writable(&dir).map(|()| dir))
        {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        let known = self.artifacts.artifacts(&job_id);
        let motion_uri = self.resolve_uri(&known, out_dir, &job_id, "motion_bvh");
        let Some(motion_uri) = motion_uri else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(
                    ErrorCode::DependencyMissing,
                    "motion_bvh is required to build preview config",
                ),
            );
        };

        let mut config = Map::new();

        match self.resolve_uri(&known, out_dir, &job_id, "scene_panorama") {
            Some(uri) => {
                config.insert("scene".into(), json!({"panorama_uri": uri}));
            }
            None => warnings.push("scene_panorama missing; using default background".into()),
        }

        config.insert(
            "character".into(),
            character_section(&known, out_dir, &job_id),
        );

        let fps = uir
            .modules
            .motion
            .as_ref()
            .filter(|m| m.enabled)
            .map_or(30, |m| m.fps);
        config.insert("motion".into(), json!({"bvh_uri": motion_uri, "fps": fps}));

        match self.resolve_uri(&known, out_dir, &job_id, "music_wav") {
            Some(uri) => {
                config.insert("music".into(), json!({"wav_uri": uri, "offset_s": 0}));
            }
            None => warnings.push("music_wav missing; preview will be silent".into()),
        }

        let preview = uir.modules.preview.as_ref();
        let camera_preset = preview
            .and_then(|p| p.camera_preset.as_deref())
            .unwrap_or("orbit");
        let autoplay = preview.and_then(|p| p.autoplay).unwrap_or(true);
        config.insert(
            "camera".into(),
            json!({"preset": camera_preset, "auto_rotate": autoplay}),
        );

        if let Some(duration_s) = timeline_duration(uir) {
            config.insert("timeline".into(), json!({"duration_s": duration_s}));
        }

        let file_path = output_dir.join("preview_config.json");
        if let Err(e) = std::fs::write(&file_path, ascii_json_pretty(&Value::Object(config))) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write preview_config.json")
                    .with_detail("path", file_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let artifact = match build_asset_ref(
            &file_path,
            out_dir,
            &job_id,
            "preview_config",
            "application/json",
            None,
        ) {
            Ok(artifact) => artifact,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        reporter.stage("preview_config_done", 1.0, "preview config ready");
        AdapterResult::success(self.provider_id(), vec![artifact])
            .with_meta("adapter", "preview_config_builder")
            .with_warnings(warnings)
    }
}

/// Character section from the on-disk character manifest, defaulting to the
/// bare skeleton when none was produced.
fn character_section(artifacts: &[AssetRef], job_dir: &Path, job_id: &str) -> Value {
    let manifest_path = resolve_role_path(
        artifacts,
        job_dir,
        job_id,
        "character_manifest",
        "character/character_manifest.json",
    );
    if let Some(path) = manifest_path {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(Value::Object(manifest)) = serde_json::from_str::<Value>(&raw) {
                let mut section = Map::new();
                for key in ["character_id", "model_uri", "skeleton", "scale"] {
                    if let Some(v) = manifest.get(key) {
                        section.insert(key.to_string(), v.clone());
                    }
                }
                if !section.is_empty() {
                    return Value::Object(section);
                }
            }
        }
    }
    json!({"skeleton": "SMPL_22"})
}

fn timeline_duration(uir: &Uir) -> Option<f64> {
    let from_preview = uir
        .modules
        .preview
        .as_ref()
        .and_then(|p| p.timeline.as_ref())
        .and_then(|t| t.get("duration_s"))
        .and_then(Value::as_f64);
    if from_preview.is_some() {
        return from_preview;
    }
    let from_motion = uir
        .modules
        .motion
        .as_ref()
        .filter(|m| m.enabled)
        .and_then(|m| m.duration_s);
    if from_motion.is_some() {
        return from_motion;
    }
    Some(uir.intent.duration_s)
}
