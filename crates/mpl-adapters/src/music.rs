// SPDX-License-Identifier: MIT OR Apache-2.0
//! Music CLI adapter.
//!
//! Wraps the MusicGPT-style command-line generator.  The CLI writes the wav
//! directly to the requested path; the meta file records the measured
//! duration when the RIFF header is readable.

use crate::common::{job_id_from_uir, timeout_from_uir};
use mpl_adapter::{
    CommandSpec, MediaAdapter, StageReporter, adapter_log_path, assert_dir_writable,
    build_asset_ref, classify_failure, resolve_output_dir, run_logged, wait_for_file,
};
use mpl_core::{AdapterResult, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::ascii_json_pretty;
use mpl_fs::paths::which;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the music CLI binary.
pub const MUSICGPT_BIN_ENV: &str = "ORCH_MUSICGPT_BIN";

/// Drives the music generation CLI.
pub struct MusicAdapter {
    discovery_window: Duration,
}

impl MusicAdapter {
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

impl Default for MusicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaAdapter for MusicAdapter {
    fn provider_id(&self) -> &str {
        "musicgpt_cli"
    }

    fn modality(&self) -> Modality {
        Modality::Music
    }

    fn validate(&self, uir: &Uir) -> Result<(), AdapterError> {
        let Some(music) = &uir.modules.music else {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.music is required",
            ));
        };
        if music.enabled
            && music
                .prompt
                .as_deref()
                .map(str::trim)
                .is_none_or(str::is_empty)
        {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.music.prompt is required when music is enabled",
            ));
        }
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let music = uir.modules.music.clone().unwrap_or_default();
        let Some(prompt) = music
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
        else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ValidationInput, "modules.music.prompt is required"),
            );
        };
        let duration_s = music.duration_s.unwrap_or(uir.intent.duration_s);

        let bin = std::env::var_os(MUSICGPT_BIN_ENV)
            .map(PathBuf::from)
            .or_else(|| which("musicgpt"));
        let Some(bin) = bin else {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::DependencyMissing, "music CLI not found")
                    .with_detail("env", MUSICGPT_BIN_ENV),
            );
        };

        let output_dir = match resolve_output_dir(out_dir, "music")
            .and_then(|dir| assert_dir_writable(&dir).map(|()| dir))
        {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let output_path = output_dir.join("music.wav");
        let log_path = adapter_log_path(out_dir, self.modality());
        let timeout = timeout_from_uir(uir);

        reporter.stage("prepare", 0.1, "preparing music input");
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = duration_s.round().max(1.0) as u64;
        let spec = CommandSpec::new(vec![
            bin.display().to_string(),
            prompt.clone(),
            "--secs".into(),
            secs.to_string(),
            "--no-playback".into(),
            "--no-interactive".into(),
            "--output".into(),
            output_path.display().to_string(),
        ])
        .timeout(timeout);

        reporter.stage("running", 0.5, "generating music");
        let outcome = match run_logged(&spec, &log_path, reporter, "running", "generating music") {
            Ok(outcome) => outcome,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        if outcome.canceled {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::ModelRuntime, "music generation canceled"),
            );
        }
        if !outcome.success() {
            return AdapterResult::failure(
                self.provider_id(),
                classify_failure(&outcome, &log_path, timeout, "music generation"),
            );
        }

        if !wait_for_file(&output_path, self.discovery_window) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "music.wav missing")
                    .with_detail("path", output_path.display().to_string()),
            );
        }

        reporter.stage("finalize", 0.9, "writing music metadata");
        let measured = wav_duration_s(&output_path);
        let meta = json!({
            "provider": self.provider_id(),
            "prompt_used": prompt,
            "requested_duration_s": duration_s,
            "duration_s": measured.unwrap_or(duration_s),
            "tempo_bpm": music.tempo_bpm,
            "genre": music.genre,
        });
        let meta_path = output_dir.join("music_meta.json");
        if let Err(e) = std::fs::write(&meta_path, ascii_json_pretty(&meta)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write music_meta.json")
                    .with_detail("path", meta_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let mut artifacts = Vec::new();
        for (path, role, mime) in [
            (&output_path, "music_wav", "audio/wav"),
            (&meta_path, "music_meta", "application/json"),
        ] {
            match build_asset_ref(path, out_dir, &job_id, role, mime, None) {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => return AdapterResult::failure(self.provider_id(), err),
            }
        }

        reporter.stage("finalize", 1.0, "music ready");
        AdapterResult::success(self.provider_id(), artifacts)
            .with_meta("duration_s", measured.unwrap_or(duration_s))
    }
}

/// Measured duration from a RIFF/WAVE header: data chunk size over byte rate.
fn wav_duration_s(path: &Path) -> Option<f64> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes(bytes.get(28..32)?.try_into().ok()?);
    if byte_rate == 0 {
        return None;
    }
    // Walk the chunk list for "data"; chunks start after the 12-byte header.
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size =
            u32::from_le_bytes(bytes.get(offset + 4..offset + 8)?.try_into().ok()?) as usize;
        if chunk_id == b"data" {
            return Some(chunk_size as f64 / f64::from(byte_rate));
        }
        offset += 8 + chunk_size + (chunk_size % 2);
    }
    None
}
