// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory job registry, per-job event fan-out, and the reporter facade.
//!
//! Ownership is strict: the [`JobStore`] exclusively owns every [`Job`]
//! record and serializes all mutation behind one mutex; the [`EventBus`]
//! exclusively owns subscriber queues and never holds a job; the
//! [`ProgressReporter`] is a short-lived facade bound to
//! `(job_id, store, bus)` that mutates through the store and publishes
//! through the bus.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-job event fan-out.
pub mod bus;
/// The job record.
pub mod job;
/// Reporter facade.
pub mod reporter;
/// The job registry.
pub mod store;

pub use bus::{EventBus, JobEvent, Subscription};
pub use job::Job;
pub use reporter::{ProgressReporter, StageLabel, snapshot_data};
pub use store::{CreateError, JobStore, JobUpdate};

/// Maximum number of log lines retained per job.
pub const MAX_LOG_LINES: usize = 200;

/// Tail size used in client-facing projections.
pub const LOGS_TAIL_LIMIT: usize = 8;
