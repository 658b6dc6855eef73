// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bridged reporter for blocking adapters.
//!
//! Adapters run on the blocking pool but progress must flow through the
//! async reporter in publish order.  The bridge forwards every call over an
//! unbounded channel (send is non-blocking) and exposes the scheduler's
//! cancellation flag; the worker drains the channel while awaiting the
//! adapter.

use mpl_adapter::StageReporter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// One marshalled reporter call.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMsg {
    /// An intra-stage progress report.
    Stage {
        /// Adapter-side step name (`"prepare"`, `"running"`, …).
        name: String,
        /// Intra-stage progress in `[0, 1]` (or a percentage).
        progress: f64,
        /// Human-readable message.
        message: String,
    },
    /// A log line.
    Log(String),
}

/// Reporter handed to a blocking adapter run.
pub struct BridgedReporter {
    tx: mpsc::UnboundedSender<BridgeMsg>,
    cancel: Arc<AtomicBool>,
}

impl BridgedReporter {
    /// Build a bridge; the worker drains the receiving end.
    #[must_use]
    pub fn channel(
        cancel: Arc<AtomicBool>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }
}

impl StageReporter for BridgedReporter {
    fn stage(&self, name: &str, progress: f64, message: &str) {
        let _ = self.tx.send(BridgeMsg::Stage {
            name: name.to_string(),
            progress,
            message: message.to_string(),
        });
    }

    fn log(&self, line: &str) {
        let _ = self.tx.send(BridgeMsg::Log(line.to_string()));
    }

    fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}
