// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact references and adapter results.

use mpl_error::AdapterError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference to a file an adapter produced.
///
/// The `uri` is always job-relative (`/assets/<job_id>/<subdir>/<file>`); the
/// `role` is the symbolic identity downstream stages resolve artifacts by
/// (`"scene_panorama"`, `"motion_bvh"`, …), independent of the filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Stable identifier, `<job_id>:<role>` by convention.
    pub id: String,
    /// Symbolic artifact identity.
    pub role: String,
    /// Client-facing URI under `/assets/<job_id>/`.
    pub uri: String,
    /// MIME type.
    pub mime: String,
    /// File size in bytes, when known at reference time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Hex SHA-256 of the file contents, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Adapter-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    /// Whether the adapter produced its artifacts.
    pub ok: bool,
    /// Provider id that ran.
    pub provider: String,
    /// Artifacts produced, in emission order.
    pub artifacts: Vec<AssetRef>,
    /// Run metadata (parameters used, key output metrics).
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Non-fatal notes surfaced to the client.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// The failure, when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
}

impl AdapterResult {
    /// Successful result with the given artifacts.
    #[must_use]
    pub fn success(provider: impl Into<String>, artifacts: Vec<AssetRef>) -> Self {
        Self {
            ok: true,
            provider: provider.into(),
            artifacts,
            meta: Map::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Failed result carrying the given error.
    #[must_use]
    pub fn failure(provider: impl Into<String>, error: AdapterError) -> Self {
        Self {
            ok: false,
            provider: provider.into(),
            artifacts: Vec::new(),
            meta: Map::new(),
            warnings: Vec::new(),
            error: Some(error),
        }
    }

    /// Attach run metadata.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.meta.insert(key.into(), v);
        }
        self
    }

    /// Attach accumulated warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}
