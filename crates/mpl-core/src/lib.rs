// SPDX-License-Identifier: MIT OR Apache-2.0
//! mpl-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the mediaplane orchestrator: the Unified
//! Intermediate Representation (UIR) that every pipeline stage consumes, its
//! validator, the canonical stable hash, job status vocabulary, and the
//! artifact reference types adapters return.
//!
//! If you only take one dependency, take this one.

/// Artifact references and adapter results.
pub mod asset;
/// Canonical JSON serialization and the UIR stable hash.
pub mod hash;
/// Job status and modality vocabulary.
pub mod status;
/// UIR data model.
pub mod uir;
/// UIR structural and semantic validation.
pub mod validate;

pub use asset::{AdapterResult, AssetRef};
pub use hash::{ContractError, canonical_json, sha256_hex, stable_hash};
pub use status::{JobStatus, Modality};
pub use uir::{
    CharacterModule, Constraints, ExportFormat, ExportModule, Hooks, InputSection, IntentSection,
    JobSection, Modules, MotionModule, MusicModule, PreviewModule, Quality, RoutingEntry,
    RuntimeSection, SceneModule, Uir,
};
pub use validate::{KNOWN_MODULES, UirValidationError, ValidationIssue, parse_uir, validate_uir};

/// The only UIR contract version this orchestrator accepts.
///
/// # Examples
///
/// ```
/// assert_eq!(mpl_core::UIR_VERSION, "1.0");
/// ```
pub const UIR_VERSION: &str = "1.0";
