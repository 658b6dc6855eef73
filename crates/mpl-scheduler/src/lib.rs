// SPDX-License-Identifier: MIT OR Apache-2.0
//! FIFO job scheduler with GPU and per-provider gating.
//!
//! One cooperative worker loop owns the queue and per-job orchestration;
//! blocking adapter work is dispatched to the blocking pool with a bridged
//! reporter marshalling progress back.  A single process-wide GPU semaphore
//! serializes the GPU-bound stages; per-provider semaphores bound each
//! provider to its declared concurrency.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Progress bands per stage.
pub mod bands;
/// Bridged reporter for blocking adapters.
pub mod bridge;
/// FIFO queue with position tracking.
pub mod queue;
/// The worker loop.
pub mod worker;

pub use bands::{map_progress, progress_band};
pub use queue::JobQueue;
pub use worker::Scheduler;

use mpl_adapter::ArtifactSource;
use mpl_core::AssetRef;
use mpl_store::JobStore;
use std::sync::Arc;

/// Store-backed [`ArtifactSource`] for composing adapters.
pub struct StoreArtifacts(pub Arc<JobStore>);

impl ArtifactSource for StoreArtifacts {
    fn artifacts(&self, job_id: &str) -> Vec<AssetRef> {
        self.0
            .get(job_id)
            .map(|job| job.artifacts())
            .unwrap_or_default()
    }
}
