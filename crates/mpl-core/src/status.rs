// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job status and modality vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job.
///
/// Serialises to the exact screaming-snake wire strings clients and the
/// manifest use (`"RUNNING_SCENE"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in the FIFO queue.
    Queued,
    /// Stage plan being prepared.
    Planning,
    /// Panorama generation in flight.
    RunningScene,
    /// Motion generation in flight.
    RunningMotion,
    /// Music generation in flight.
    RunningMusic,
    /// Character selection in flight.
    RunningCharacter,
    /// Preview configuration being composed.
    ComposingPreview,
    /// Final video export in flight.
    ExportingVideo,
    /// All planned stages completed.
    Done,
    /// A stage failed; the error lives in the manifest.
    Failed,
    /// Canceled by a caller.
    Canceled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 11] = [
        Self::Queued,
        Self::Planning,
        Self::RunningScene,
        Self::RunningMotion,
        Self::RunningMusic,
        Self::RunningCharacter,
        Self::ComposingPreview,
        Self::ExportingVideo,
        Self::Done,
        Self::Failed,
        Self::Canceled,
    ];

    /// Stable wire string (e.g. `"RUNNING_SCENE"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Planning => "PLANNING",
            Self::RunningScene => "RUNNING_SCENE",
            Self::RunningMotion => "RUNNING_MOTION",
            Self::RunningMusic => "RUNNING_MUSIC",
            Self::RunningCharacter => "RUNNING_CHARACTER",
            Self::ComposingPreview => "COMPOSING_PREVIEW",
            Self::ExportingVideo => "EXPORTING_VIDEO",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Returns `true` if this status is a sink (`DONE`, `FAILED`, `CANCELED`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// The modality a running stage drives, if any.
    ///
    /// `QUEUED`, `PLANNING`, and the terminal statuses have none.
    #[must_use]
    pub fn modality(&self) -> Option<Modality> {
        match self {
            Self::RunningScene => Some(Modality::Scene),
            Self::RunningMotion => Some(Modality::Motion),
            Self::RunningMusic => Some(Modality::Music),
            Self::RunningCharacter => Some(Modality::Character),
            Self::ComposingPreview => Some(Modality::Preview),
            Self::ExportingVideo => Some(Modality::Export),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

/// One of the six generation modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// 360° panorama image.
    Scene,
    /// Skeletal character animation.
    Motion,
    /// Background audio.
    Music,
    /// Character model selection.
    Character,
    /// Web preview configuration.
    Preview,
    /// Final composited export.
    Export,
}

impl Modality {
    /// All modalities, in pipeline order.
    pub const ALL: [Modality; 6] = [
        Self::Scene,
        Self::Motion,
        Self::Music,
        Self::Character,
        Self::Preview,
        Self::Export,
    ];

    /// Stable lowercase name, matching the `modules` keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Motion => "motion",
            Self::Music => "music",
            Self::Character => "character",
            Self::Preview => "preview",
            Self::Export => "export",
        }
    }

    /// The stage status that runs this modality.
    #[must_use]
    pub fn stage(&self) -> JobStatus {
        match self {
            Self::Scene => JobStatus::RunningScene,
            Self::Motion => JobStatus::RunningMotion,
            Self::Music => JobStatus::RunningMusic,
            Self::Character => JobStatus::RunningCharacter,
            Self::Preview => JobStatus::ComposingPreview,
            Self::Export => JobStatus::ExportingVideo,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
