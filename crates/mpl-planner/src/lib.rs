// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stage planning and prompt-to-UIR construction.
//!
//! [`plan_stages`] is the pure function the scheduler consults: given a
//! validated UIR it returns the ordered list of stages the job will walk
//! through.  [`builder`] turns a `{prompt, options}` submission into a UIR
//! document for the validator.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Prompt-to-UIR construction.
pub mod builder;

pub use builder::{BuildError, build_uir_value};

use mpl_core::{JobStatus, Modality, Uir};

/// Compute the ordered stage plan for a validated UIR.
///
/// `PLANNING` always comes first.  Each generation stage is emitted iff its
/// module is enabled *and* named in `intent.targets`; preview and export come
/// last, in that order, so they can depend on upstream artifacts.  Stages not
/// emitted are skipped entirely.
#[must_use]
pub fn plan_stages(uir: &Uir) -> Vec<JobStatus> {
    let mut stages = vec![JobStatus::Planning];
    for modality in [
        Modality::Scene,
        Modality::Motion,
        Modality::Music,
        Modality::Character,
        Modality::Preview,
        Modality::Export,
    ] {
        if uir.module_requested(modality) {
            stages.push(modality.stage());
        }
    }
    stages
}
