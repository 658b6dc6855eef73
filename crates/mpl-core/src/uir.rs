// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed Unified Intermediate Representation.
//!
//! The UIR is the pipeline's only inter-stage contract: the submit endpoint
//! produces one, the validator checks it, and every adapter reads its module
//! section from it.  All optional fields skip serialization when unset so the
//! canonical form used for hashing carries no `null`s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_duration_s() -> f64 {
    12.0
}

fn default_fps() -> u32 {
    30
}

/// Unified Intermediate Representation of a generation job.
///
/// Use [`crate::validate::parse_uir`] to obtain a validated instance; a
/// hand-constructed `Uir` has not been checked against the structural and
/// semantic rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uir {
    /// Contract version; must equal [`crate::UIR_VERSION`].
    #[serde(default)]
    pub uir_version: String,
    /// Job identity section; `id` is filled by the job store at creation.
    #[serde(default)]
    pub job: JobSection,
    /// Raw user input.
    #[serde(default)]
    pub input: InputSection,
    /// What the user asked the pipeline to produce.
    #[serde(default)]
    pub intent: IntentSection,
    /// Per-module configuration; all six module keys must be present.
    #[serde(default)]
    pub modules: Modules,
    /// Explicit provider selection per modality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<std::collections::BTreeMap<String, RoutingEntry>>,
    /// Execution constraints (runtime budget, quality tier).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    /// Runtime knobs (priority, locks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeSection>,
    /// Observability hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
}

impl Uir {
    /// The job id, when already assigned.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job.id.as_deref()
    }

    /// Whether `name` appears in `intent.targets`.
    #[must_use]
    pub fn is_target(&self, name: &str) -> bool {
        self.intent.targets.iter().any(|t| t == name)
    }

    /// Whether the module for `modality` is enabled *and* targeted.
    #[must_use]
    pub fn module_requested(&self, modality: crate::Modality) -> bool {
        self.modules.enabled(modality) && self.is_target(modality.as_str())
    }

    /// The explicit provider routed for `modality`, if any.
    #[must_use]
    pub fn routed_provider(&self, modality: crate::Modality) -> Option<&str> {
        self.routing
            .as_ref()
            .and_then(|r| r.get(modality.as_str()))
            .map(|entry| entry.provider.as_str())
    }

    /// The per-subprocess runtime budget in seconds, if constrained.
    #[must_use]
    pub fn max_runtime_s(&self) -> Option<f64> {
        self.constraints.as_ref().and_then(|c| c.max_runtime_s)
    }
}

/// Job identity metadata inside the UIR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSection {
    /// Opaque job identifier; assigned by the store when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Submission timestamp (excluded from the stable hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Raw user input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSection {
    /// The natural-language prompt as submitted.
    #[serde(default)]
    pub raw_prompt: String,
    /// BCP-47-ish language tag of the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Reference attachments (opaque to the core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Value>>,
    /// UI-side choices recorded for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_choices: Option<Map<String, Value>>,
}

/// What the user asked the pipeline to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSection {
    /// Module names to produce; non-empty, unique, each a known module.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Overall duration of the piece in seconds.
    #[serde(default = "default_duration_s")]
    pub duration_s: f64,
    /// Free-form style hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Free-form mood hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

impl Default for IntentSection {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            duration_s: default_duration_s(),
            style: None,
            mood: None,
        }
    }
}

/// Per-module configuration container.
///
/// Every field is optional at parse time so a missing key can be reported as
/// a validation issue instead of a deserialization failure; validation
/// guarantees all six are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modules {
    /// 360° panorama generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneModule>,
    /// Skeletal character animation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionModule>,
    /// Background audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<MusicModule>,
    /// Character model selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterModule>,
    /// Web preview configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewModule>,
    /// Final composited export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportModule>,
}

impl Modules {
    /// Whether the module for `modality` is present and enabled.
    #[must_use]
    pub fn enabled(&self, modality: crate::Modality) -> bool {
        use crate::Modality;
        match modality {
            Modality::Scene => self.scene.as_ref().is_some_and(|m| m.enabled),
            Modality::Motion => self.motion.as_ref().is_some_and(|m| m.enabled),
            Modality::Music => self.music.as_ref().is_some_and(|m| m.enabled),
            Modality::Character => self.character.as_ref().is_some_and(|m| m.enabled),
            Modality::Preview => self.preview.as_ref().is_some_and(|m| m.enabled),
            Modality::Export => self.export.as_ref().is_some_and(|m| m.enabled),
        }
    }
}

/// 360° panorama generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Module-specific prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Negative prompt for the diffusion model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// `[width, height]` with `width = 2 * height` (equirectangular).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Vec<u32>>,
    /// Deterministic seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Diffusion steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Classifier-free guidance scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    /// Whether to run the upscaler pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upscale: Option<bool>,
}

/// Skeletal character animation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Module-specific prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Frames per second, within `[15, 60]`.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Clip length in seconds; copied from `intent.duration_s` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    /// Motion style hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl Default for MotionModule {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: None,
            fps: default_fps(),
            duration_s: None,
            style: None,
        }
    }
}

/// Background audio settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Module-specific prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Track length in seconds; `[3, 60]` when the module is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    /// Tempo hint in beats per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_bpm: Option<f64>,
    /// Genre hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// Character model selection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Explicit character to use, bypassing tag matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    /// Character style hint, fed into tag matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// Web preview configuration settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Camera preset name; the builder defaults to `"orbit"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_preset: Option<String>,
    /// Whether playback starts automatically; the builder defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoplay: Option<bool>,
    /// Timeline override passed through to the preview client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Value>,
}

/// Final composited export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportModule {
    /// Whether this module runs.
    #[serde(default)]
    pub enabled: bool,
    /// Output container.
    #[serde(default)]
    pub format: ExportFormat,
    /// Target `[width, height]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Vec<u32>>,
    /// Output frame rate.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Video bitrate hint (e.g. `"8M"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    /// Roles to include in a zip bundle; all when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
}

impl Default for ExportModule {
    fn default() -> Self {
        Self {
            enabled: false,
            format: ExportFormat::default(),
            resolution: None,
            fps: default_fps(),
            bitrate: None,
            include: None,
        }
    }
}

/// Export container format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Composited H.264 video.
    #[default]
    Mp4,
    /// Deflate-compressed bundle of the produced artifacts.
    Zip,
}

/// Explicit provider selection for one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Provider id to use for this modality.
    pub provider: String,
}

/// Execution constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Per-subprocess runtime budget in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_s: Option<f64>,
    /// Quality tier traded against runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

/// Quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Fastest settings; lowest fidelity.
    Fast,
    /// Balanced defaults.
    Standard,
    /// Highest fidelity; slowest.
    High,
}

/// Runtime knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// Scheduling priority hint (unused by the FIFO queue, recorded as-is).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Key for grouping jobs that must not run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_key: Option<String>,
    /// Resource lock hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locks: Option<Locks>,
}

/// Resource lock hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Locks {
    /// GPU device hint forwarded to adapters (e.g. `"0"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

/// Observability hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    /// Whether the client intends to consume the push event stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_stream: Option<bool>,
}
