// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and the UIR stable hash.

use crate::uir::Uir;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// This is not a full JCS implementation, but it is stable for our types:
/// - serialization routes through [`serde_json::Value`], whose object map is
///   a `BTreeMap` (the `preserve_order` feature is off), so every object's
///   keys come out sorted — struct fields included
/// - `None` fields are skipped, so no `null`s appear
/// - numbers are serialized consistently by serde_json
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the stable content hash of a validated UIR.
///
/// **Gotcha:** `created_at` is removed from the top-level `job` object (and
/// only there) before hashing, so two submissions of the same request at
/// different times produce the same digest.
///
/// # Examples
///
/// ```
/// # use serde_json::json;
/// let value = json!({
///     "uir_version": "1.0",
///     "job": {"created_at": "2025-01-01T00:00:00Z"},
///     "input": {"raw_prompt": "dance"},
///     "intent": {"targets": ["motion"], "duration_s": 8},
///     "modules": {
///         "scene": {"enabled": false}, "motion": {"enabled": true},
///         "music": {"enabled": false}, "character": {"enabled": false},
///         "preview": {"enabled": false}, "export": {"enabled": false},
///     },
/// });
/// let uir = mpl_core::parse_uir(&value).unwrap();
/// let hash = mpl_core::stable_hash(&uir).unwrap();
/// assert!(hash.starts_with("sha256:"));
/// assert_eq!(hash.len(), "sha256:".len() + 64);
///
/// // Hashing is deterministic — same UIR produces the same digest.
/// assert_eq!(hash, mpl_core::stable_hash(&uir).unwrap());
/// ```
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the UIR cannot be serialized.
pub fn stable_hash(uir: &Uir) -> Result<String, ContractError> {
    let mut v = serde_json::to_value(uir)?;
    if let Some(job) = v.get_mut("job").and_then(|j| j.as_object_mut()) {
        job.remove("created_at");
    }
    let json = canonical_json(&v)?;
    Ok(format!("sha256:{}", sha256_hex(json.as_bytes())))
}
