// SPDX-License-Identifier: MIT OR Apache-2.0
//! Closed adapter error taxonomy with stable `E_*` codes.
//!
//! Every failure an adapter or the scheduler surfaces to a client carries an
//! [`ErrorCode`] (a machine-readable, stable string tag), a human-readable
//! message, arbitrary key-value detail, and a retryability flag.  Use the
//! builder returned by [`AdapterError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to its fixed `E_*` wire string, guaranteed not to
/// change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// UIR or adapter input failed validation.
    #[serde(rename = "E_VALIDATION_INPUT")]
    ValidationInput,
    /// No provider resolvable for a modality.
    #[serde(rename = "E_VALIDATION_ROUTING")]
    ValidationRouting,
    /// Required adapter, model file, or external binary absent.
    #[serde(rename = "E_DEPENDENCY_MISSING")]
    DependencyMissing,
    /// Feature or combination not supported (e.g. modality mismatch).
    #[serde(rename = "E_UNSUPPORTED")]
    Unsupported,
    /// Subprocess failure, inference crash, OOM, corrupt output.
    #[serde(rename = "E_MODEL_RUNTIME")]
    ModelRuntime,
    /// Subprocess exceeded the configured runtime budget.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// Filesystem write, probe, or missing expected output.
    #[serde(rename = "E_IO_WRITE")]
    IoWrite,
}

impl ErrorCode {
    /// Stable `&'static str` representation of the code (e.g.
    /// `"E_VALIDATION_INPUT"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationInput => "E_VALIDATION_INPUT",
            Self::ValidationRouting => "E_VALIDATION_ROUTING",
            Self::DependencyMissing => "E_DEPENDENCY_MISSING",
            Self::Unsupported => "E_UNSUPPORTED",
            Self::ModelRuntime => "E_MODEL_RUNTIME",
            Self::Timeout => "E_TIMEOUT",
            Self::IoWrite => "E_IO_WRITE",
        }
    }

    /// Whether errors with this code are retryable by default.
    ///
    /// Validation, routing, and dependency errors will fail the same way on
    /// every attempt; runtime, timeout, and I/O errors may succeed on retry.
    #[must_use]
    pub fn default_retryable(&self) -> bool {
        matches!(self, Self::ModelRuntime | Self::Timeout | Self::IoWrite)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Typed error returned by adapters and attached to failed jobs.
///
/// # Builder usage
///
/// ```
/// use mpl_error::{AdapterError, ErrorCode};
///
/// let err = AdapterError::new(ErrorCode::Timeout, "generator timed out")
///     .with_detail("timeout_s", 120)
///     .with_detail("provider", "musicgpt_cli");
/// assert!(err.retryable);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Arbitrary structured context for diagnostics.
    #[serde(default)]
    pub detail: BTreeMap<String, serde_json::Value>,
    /// Whether a retry of the same stage may succeed.
    pub retryable: bool,
}

impl AdapterError {
    /// Create a new error with the given code and message.
    ///
    /// `retryable` starts from [`ErrorCode::default_retryable`].
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: BTreeMap::new(),
            retryable: code.default_retryable(),
        }
    }

    /// Attach a key-value pair to the diagnostic detail map.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.detail.insert(key.into(), v);
        }
        self
    }

    /// Override the retryability flag.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.detail.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(detail) = serde_json::to_string(&self.detail) {
                write!(f, " {detail}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
