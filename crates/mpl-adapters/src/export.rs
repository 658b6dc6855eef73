// SPDX-License-Identifier: MIT OR Apache-2.0
//! Export adapter: zip bundle or composited mp4.
//!
//! The composing stage of the pipeline.  Zip export deflates the produced
//! artifacts into `export/bundle.zip`; mp4 export first renders the motion
//! to an intermediate video, then drives ffmpeg with a fixed filter graph:
//! panorama scaled+cropped to the target resolution as background, motion
//! video scaled to 45 % of the target height bottom-right with a 40 px
//! margin, music muxed when available, clamped to the piece duration.

use crate::common::{job_id_from_uir, resolve_role_path, timeout_from_uir};
use mpl_adapter::{
    ArtifactSource, CommandSpec, MediaAdapter, StageReporter, adapter_log_path, build_asset_ref,
    classify_failure, newest_file_matching, resolve_output_dir, run_logged, wait_for_file,
};
use mpl_core::{AdapterResult, ExportFormat, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::ascii_json_pretty;
use mpl_fs::paths::which;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the motion render helper binary.
pub const MOTION_RENDER_BIN_ENV: &str = "ORCH_MOTION_RENDER_BIN";
/// Environment variable naming the ffmpeg binary.
pub const FFMPEG_BIN_ENV: &str = "FFMPEG_BIN";

/// Bottom-right overlay margin in pixels.
const OVERLAY_MARGIN: u32 = 40;
/// Foreground height as a fraction of the target height.
const OVERLAY_HEIGHT_FRACTION: f64 = 0.45;

/// Roles bundled by zip export, with their canonical on-disk locations.
static ZIP_ROLES: [(&str, &str); 9] = [
    ("scene_panorama", "scene/panorama.png"),
    ("scene_meta", "scene/scene_meta.json"),
    ("motion_bvh", "motion/motion.bvh"),
    ("motion_npy", "motion/motion_out.npy"),
    ("motion_meta", "motion/motion_meta.json"),
    ("music_wav", "music/music.wav"),
    ("music_meta", "music/music_meta.json"),
    ("character_manifest", "character/character_manifest.json"),
    ("preview_config", "preview/preview_config.json"),
];

/// Composes prior artifacts into the final deliverable.
pub struct ExportAdapter {
    artifacts: Arc<dyn ArtifactSource>,
    discovery_window: Duration,
}

impl ExportAdapter {
    /// Create the adapter over the given artifact source.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactSource>) -> Self {
        Self {
            artifacts,
            discovery_window: Duration::from_secs(30),
        }
    }

    /// Override the output-discovery window (tests).
    #[must_use]
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }
}

impl MediaAdapter for ExportAdapter {
    fn provider_id(&self) -> &str {
        "ffmpeg_export"
    }

    fn modality(&self) -> Modality {
        Modality::Export
    }

    fn validate(&self, uir: &Uir) -> Result<(), AdapterError> {
        if uir.modules.export.is_none() {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.export is required",
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
        let export = uir.modules.export.clone().unwrap_or_default();
        match export.format {
            ExportFormat::Zip => self.run_zip(uir, out_dir, reporter, &job_id, &mut warnings),
            ExportFormat::Mp4 => self.run_mp4(uir, out_dir, reporter, &job_id, warnings),
        }
    }
}

impl ExportAdapter {
    fn run_zip(
        &self,
        uir: &Uir,
        out_dir: &Path,
        reporter: &dyn StageReporter,
        job_id: &str,
        warnings: &mut Vec<String>,
    ) -> AdapterResult {
        let output_dir = match resolve_output_dir(out_dir, "export") {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let output_path = output_dir.join("bundle.zip");
        let include = uir
            .modules
            .export
            .as_ref()
            .and_then(|e| e.include.clone());

        reporter.stage("collect", 0.3, "collecting export assets");
        let known = self.artifacts.artifacts(job_id);
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for (role, rel) in ZIP_ROLES {
            if include
                .as_ref()
                .is_some_and(|roles| !roles.iter().any(|r| r == role))
            {
                continue;
            }
            if let Some(path) = resolve_role_path(&known, out_dir, job_id, role, rel) {
                files.push((path, rel.to_string()));
            }
        }
        if files.is_empty() {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "no exportable assets found"),
            );
        }

        reporter.stage("running", 0.7, "building export zip");
        if let Err(err) = write_zip(&output_path, &files) {
            return AdapterResult::failure(self.provider_id(), err);
        }

        let artifact = match build_asset_ref(
            &output_path,
            out_dir,
            job_id,
            "export_zip",
            "application/zip",
            None,
        ) {
            Ok(artifact) => artifact,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        reporter.stage("finalize", 1.0, "export zip ready");
        AdapterResult::success(self.provider_id(), vec![artifact])
            .with_meta("format", "zip")
            .with_meta("files", files.len())
            .with_warnings(std::mem::take(warnings))
    }

    #[allow(clippy::too_many_lines)]
    fn run_mp4(
        &self,
        uir: &Uir,
        out_dir: &Path,
        reporter: &dyn StageReporter,
        job_id: &str,
        mut warnings: Vec<String>,
    ) -> AdapterResult {
        let export = uir.modules.export.clone().unwrap_or_default();
        let mut fps = export.fps;
        let (width, height) = match export.resolution.as_deref() {
            Some([w, h]) => (*w, *h),
            _ => (1920, 1080),
        };
        let mut duration_s = uir
            .modules
            .motion
            .as_ref()
            .and_then(|m| m.duration_s)
            .unwrap_or(uir.intent.duration_s);

        reporter.stage("collect", 0.2, "collecting export inputs");
        let known = self.artifacts.artifacts(job_id);

        let Some(scene_path) =
            resolve_role_path(&known, out_dir, job_id, "scene_panorama", "scene/panorama.png")
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "missing required artifacts")
                    .with_detail("missing", json!(["scene_panorama"])),
            );
        };
        let Some(motion_npy_path) =
            resolve_role_path(&known, out_dir, job_id, "motion_npy", "motion/motion_out.npy")
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "missing required artifacts")
                    .with_detail("missing", json!(["motion_npy"])),
            );
        };

        // Prefer the measured fps/duration the motion stage recorded.
        if let Some(meta) = read_json(&out_dir.join("motion/motion_meta.json")) {
            if let Some(meta_fps) = meta.get("fps").and_then(Value::as_u64) {
                fps = u32::try_from(meta_fps).unwrap_or(fps);
            }
            if let Some(meta_duration) = meta.get("duration_s").and_then(Value::as_f64) {
                duration_s = meta_duration;
            }
        }

        let music_path =
            resolve_role_path(&known, out_dir, job_id, "music_wav", "music/music.wav");
        if music_path.is_none() {
            warnings.push("music_wav missing; exporting silent video".into());
        }

        let Some(render_bin) = std::env::var_os(MOTION_RENDER_BIN_ENV).map(PathBuf::from) else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "motion renderer not configured")
                    .with_detail("env", MOTION_RENDER_BIN_ENV),
            );
        };
        let Some(ffmpeg_bin) = resolve_ffmpeg() else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "ffmpeg executable not found")
                    .with_detail("env", FFMPEG_BIN_ENV),
            );
        };

        let output_dir = match resolve_output_dir(out_dir, "export") {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let render_dir = output_dir.join("render");
        if let Err(e) = std::fs::create_dir_all(&render_dir) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to create render directory")
                    .with_detail("path", render_dir.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }
        let output_path = output_dir.join("final.mp4");
        let log_path = adapter_log_path(out_dir, self.modality());
        let timeout = timeout_from_uir(uir);

        reporter.stage("render", 0.45, "rendering motion video");
        let npy_dir = motion_npy_path
            .parent()
            .map_or_else(|| out_dir.join("motion"), Path::to_path_buf);
        let render_spec = CommandSpec::new(vec![
            render_bin.display().to_string(),
            "--npy-folder".into(),
            npy_dir.display().to_string(),
            "--mp4-folder".into(),
            render_dir.display().to_string(),
            "--fps".into(),
            fps.to_string(),
        ])
        .timeout(timeout);
        let outcome = match run_logged(&render_spec, &log_path, reporter, "render", "rendering motion video") {
            Ok(outcome) => outcome,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        if outcome.canceled {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ModelRuntime, "motion render canceled"),
            );
        }
        if !outcome.success() {
            return AdapterResult::failure(
                self.provider_id(),
                classify_failure(&outcome, &log_path, timeout, "motion render"),
            );
        }

        let Some(motion_video_path) =
            newest_file_matching(&render_dir, "mp4", self.discovery_window)
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "motion mp4 missing")
                    .with_detail("dir", render_dir.display().to_string()),
            );
        };

        reporter.stage("compose", 0.75, "compositing scene and music");
        let composite_spec = composite_spec(
            &ffmpeg_bin,
            &scene_path,
            &motion_video_path,
            music_path.as_deref(),
            &output_path,
            duration_s,
            fps,
            width,
            height,
            export.bitrate.as_deref(),
        )
        .timeout(timeout);
        let outcome = match run_logged(
            &composite_spec,
            &log_path,
            reporter,
            "compose",
            "compositing scene and music",
        ) {
            Ok(outcome) => outcome,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        if !outcome.success() {
            return AdapterResult::failure(
                self.provider_id(),
                classify_failure(&outcome, &log_path, timeout, "ffmpeg composition"),
            );
        }

        if !wait_for_file(&output_path, Duration::from_secs(5)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "export mp4 missing")
                    .with_detail("path", output_path.display().to_string()),
            );
        }

        let meta = json!({
            "provider": self.provider_id(),
            "format": "mp4",
            "duration_s": duration_s,
            "fps": fps,
            "resolution": [width, height],
        });
        let meta_path = output_dir.join("export_meta.json");
        if let Err(e) = std::fs::write(&meta_path, ascii_json_pretty(&meta)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write export_meta.json")
                    .with_detail("path", meta_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let mut artifacts = Vec::new();
        for (path, role, mime) in [
            (&output_path, "export_mp4", "video/mp4"),
            (&meta_path, "export_meta", "application/json"),
        ] {
            match build_asset_ref(path, out_dir, job_id, role, mime, None) {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => return AdapterResult::failure(self.provider_id(), err),
            }
        }

        reporter.stage("finalize", 1.0, "export mp4 ready");
        AdapterResult::success(self.provider_id(), artifacts)
            .with_meta("format", "mp4")
            .with_meta("duration_s", duration_s)
            .with_meta("fps", fps)
            .with_meta("resolution", json!([width, height]))
            .with_warnings(warnings)
    }
}

fn resolve_ffmpeg() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(FFMPEG_BIN_ENV).map(PathBuf::from) {
        if path.is_file() {
            return Some(path);
        }
    }
    which("ffmpeg")
}

/// The fixed composite filter graph.
#[allow(clippy::too_many_arguments)]
fn composite_spec(
    ffmpeg_bin: &Path,
    scene_path: &Path,
    motion_path: &Path,
    music_path: Option<&Path>,
    output_path: &Path,
    duration_s: f64,
    fps: u32,
    width: u32,
    height: u32,
    bitrate: Option<&str>,
) -> CommandSpec {
    let overlay_height = ((f64::from(height) * OVERLAY_HEIGHT_FRACTION) as u32).max(1);
    let filter_complex = format!(
        "[0:v]scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height}[bg];\
         [1:v]scale=-2:{overlay_height}[fg];\
         [bg][fg]overlay=W-w-{OVERLAY_MARGIN}:H-h-{OVERLAY_MARGIN}:shortest=1[v]"
    );

    let mut argv = vec![
        ffmpeg_bin.display().to_string(),
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-loop".into(),
        "1".into(),
        "-framerate".into(),
        fps.to_string(),
        "-i".into(),
        scene_path.display().to_string(),
        "-i".into(),
        motion_path.display().to_string(),
    ];
    if let Some(music) = music_path {
        argv.push("-i".into());
        argv.push(music.display().to_string());
    }
    argv.extend([
        "-t".into(),
        format!("{duration_s:.2}"),
        "-filter_complex".into(),
        filter_complex,
        "-map".into(),
        "[v]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-r".into(),
        fps.to_string(),
        "-movflags".into(),
        "+faststart".into(),
    ]);
    if let Some(bitrate) = bitrate {
        argv.push("-b:v".into());
        argv.push(bitrate.to_string());
    }
    if music_path.is_some() {
        argv.extend([
            "-map".into(),
            "2:a".into(),
            "-af".into(),
            "aformat=channel_layouts=stereo".into(),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
        ]);
    } else {
        argv.push("-an".into());
    }
    argv.push(output_path.display().to_string());
    CommandSpec::new(argv)
}

fn write_zip(output_path: &Path, files: &[(PathBuf, String)]) -> Result<(), AdapterError> {
    let io_err = |what: &str, e: &dyn std::fmt::Display| {
        AdapterError::new(ErrorCode::IoWrite, "failed to write export zip")
            .with_detail("path", output_path.display().to_string())
            .with_detail("step", what)
            .with_detail("error", e.to_string())
    };
    let file = std::fs::File::create(output_path).map_err(|e| io_err("create", &e))?;
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (path, arcname) in files {
        archive
            .start_file(arcname.clone(), options)
            .map_err(|e| io_err("start_file", &e))?;
        let mut src = std::fs::File::open(path).map_err(|e| io_err("open", &e))?;
        std::io::copy(&mut src, &mut archive).map_err(|e| io_err("copy", &e))?;
    }
    archive.finish().map_err(|e| io_err("finish", &e))?;
    Ok(())
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpl_adapter::{NoArtifacts, NullReporter};
    use mpl_core::parse_uir;
    use tempfile::TempDir;

    fn uir(format: &str) -> Uir {
        parse_uir(&json!({
            "uir_version": "1.0",
            "job": {"id": "j1", "created_at": "2025-01-01T00:00:00Z"},
            "input": {"raw_prompt": "dance"},
            "intent": {"targets": ["motion", "export"], "duration_s": 8},
            "modules": {
                "scene": {"enabled": false},
                "motion": {"enabled": true},
                "music": {"enabled": false},
                "character": {"enabled": false},
                "preview": {"enabled": false},
                "export": {"enabled": true, "format": format},
            },
        }))
        .unwrap()
    }

    fn adapter() -> ExportAdapter {
        ExportAdapter::new(Arc::new(NoArtifacts)).with_discovery_window(Duration::from_millis(50))
    }

    #[test]
    fn zip_bundles_present_artifacts() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("motion")).unwrap();
        std::fs::create_dir_all(tmp.path().join("music")).unwrap();
        std::fs::write(tmp.path().join("motion/motion.bvh"), "HIERARCHY").unwrap();
        std::fs::write(tmp.path().join("music/music.wav"), "RIFF").unwrap();

        let result = adapter().run(&uir("zip"), tmp.path(), &NullReporter);
        assert!(result.ok, "error: {:?}", result.error);
        assert_eq!(result.artifacts[0].role, "export_zip");
        assert_eq!(result.artifacts[0].uri, "/assets/j1/export/bundle.zip");
        assert_eq!(result.meta["files"], json!(2));
        assert!(tmp.path().join("export/bundle.zip").is_file());

        let archive =
            zip::ZipArchive::new(std::fs::File::open(tmp.path().join("export/bundle.zip")).unwrap())
                .unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert!(names.contains(&"motion/motion.bvh"));
        assert!(names.contains(&"music/music.wav"));
    }

    #[test]
    fn zip_respects_include_filter() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("motion")).unwrap();
        std::fs::create_dir_all(tmp.path().join("music")).unwrap();
        std::fs::write(tmp.path().join("motion/motion.bvh"), "HIERARCHY").unwrap();
        std::fs::write(tmp.path().join("music/music.wav"), "RIFF").unwrap();

        let mut uir = uir("zip");
        if let Some(export) = &mut uir.modules.export {
            export.include = Some(vec!["music_wav".into()]);
        }
        let result = adapter().run(&uir, tmp.path(), &NullReporter);
        assert!(result.ok);
        assert_eq!(result.meta["files"], json!(1));
    }

    #[test]
    fn zip_with_nothing_to_bundle_fails_dependency() {
        let tmp = TempDir::new().unwrap();
        let result = adapter().run(&uir("zip"), tmp.path(), &NullReporter);
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::DependencyMissing);
    }

    #[test]
    fn mp4_requires_scene_panorama() {
        let tmp = TempDir::new().unwrap();
        let result = adapter().run(&uir("mp4"), tmp.path(), &NullReporter);
        assert!(!result.ok);
        let err = result.error.unwrap();
        assert_eq!(err.code, ErrorCode::DependencyMissing);
        assert_eq!(err.detail["missing"], json!(["scene_panorama"]));
    }

    #[test]
    fn mp4_requires_motion_npy() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("scene")).unwrap();
        std::fs::write(tmp.path().join("scene/panorama.png"), b"png").unwrap();
        let result = adapter().run(&uir("mp4"), tmp.path(), &NullReporter);
        let err = result.error.unwrap();
        assert_eq!(err.code, ErrorCode::DependencyMissing);
        assert_eq!(err.detail["missing"], json!(["motion_npy"]));
    }

    #[test]
    fn composite_graph_shape() {
        let spec = composite_spec(
            Path::new("/usr/bin/ffmpeg"),
            Path::new("/j/scene/panorama.png"),
            Path::new("/j/export/render/m.mp4"),
            Some(Path::new("/j/music/music.wav")),
            Path::new("/j/export/final.mp4"),
            8.0,
            30,
            1920,
            1080,
            Some("8M"),
        );
        let argv = spec.argv.join(" ");
        assert!(argv.contains("scale=1920:1080:force_original_aspect_ratio=increase,crop=1920:1080[bg]"));
        assert!(argv.contains("scale=-2:486[fg]"));
        assert!(argv.contains("overlay=W-w-40:H-h-40:shortest=1[v]"));
        assert!(argv.contains("-t 8.00"));
        assert!(argv.contains("-b:v 8M"));
        assert!(argv.contains("-map 2:a"));
        assert!(argv.contains("-c:a aac"));
        assert!(argv.ends_with("/j/export/final.mp4"));
    }

    #[test]
    fn composite_graph_without_music_is_silent() {
        let spec = composite_spec(
            Path::new("ffmpeg"),
            Path::new("p.png"),
            Path::new("m.mp4"),
            None,
            Path::new("final.mp4"),
            12.0,
            24,
            1280,
            720,
            None,
        );
        let argv = spec.argv.join(" ");
        assert!(argv.contains("-an"));
        assert!(!argv.contains("-map 2:a"));
        assert!(argv.contains("scale=-2:324[fg]"));
    }

    #[test]
    fn zip_artifact_bytes_recorded() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("motion")).unwrap();
        std::fs::write(tmp.path().join("motion/motion.bvh"), "HIERARCHY").unwrap();
        let result = adapter().run(&uir("zip"), tmp.path(), &NullReporter);
        assert!(result.artifacts[0].bytes.is_some_and(|b| b > 0));
    }
}
