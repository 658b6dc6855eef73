// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job record.

use chrono::{DateTime, Utc};
use mpl_core::{AssetRef, JobStatus, Uir};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::PathBuf;

/// One unit of work, owned exclusively by the [`crate::JobStore`].
///
/// Clones are snapshots; mutation only happens through the store.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque unique identifier.
    pub job_id: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Human-readable stage label; mirrors the status unless set explicitly.
    pub stage: String,
    /// Overall progress in `[0, 1]`.
    pub progress: f64,
    /// Last status message.
    pub message: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job left the queue; set once.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status; set exactly once.
    pub ended_at: Option<DateTime<Utc>>,
    /// The validated UIR.
    pub uir: Uir,
    /// Stable content hash of the UIR.
    pub uir_hash: String,
    /// On-disk manifest path.
    pub manifest_path: Option<PathBuf>,
    /// Client-facing manifest URL.
    pub manifest_url: Option<String>,
    /// Ordered stages this job will walk through.
    pub stage_plan: Vec<JobStatus>,
    /// Bounded log ring, newest last.
    pub logs: VecDeque<String>,
    /// Asset tree; adapter artifacts accumulate under `"artifacts"`.
    pub assets: Map<String, Value>,
    /// 1-based position while queued.
    pub queue_position: Option<usize>,
    /// Queue size at the last broadcast while queued.
    pub queue_size: Option<usize>,
    /// Whether the submitter intends to consume the push stream.
    pub event_stream: bool,
}

impl Job {
    /// The accumulated artifact list, oldest first.
    #[must_use]
    pub fn artifacts(&self) -> Vec<AssetRef> {
        self.assets
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The raw artifact list as JSON (for event payloads).
    #[must_use]
    pub fn artifacts_value(&self) -> Value {
        self.assets
            .get("artifacts")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    /// The last `limit` log lines, oldest first.
    #[must_use]
    pub fn logs_tail(&self, limit: usize) -> Vec<String> {
        let skip = self.logs.len().saturating_sub(limit);
        self.logs.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_assets(assets: Map<String, Value>) -> Job {
        Job {
            job_id: "j1".into(),
            status: JobStatus::Queued,
            stage: "QUEUED".into(),
            progress: 0.0,
            message: String::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            uir: Uir::default(),
            uir_hash: String::new(),
            manifest_path: None,
            manifest_url: None,
            stage_plan: Vec::new(),
            logs: VecDeque::new(),
            assets,
            queue_position: None,
            queue_size: None,
            event_stream: false,
        }
    }

    #[test]
    fn artifacts_parse_from_assets_tree() {
        let mut assets = Map::new();
        assets.insert(
            "artifacts".into(),
            json!([{
                "id": "j1:motion_bvh",
                "role": "motion_bvh",
                "uri": "/assets/j1/motion/motion.bvh",
                "mime": "text/plain",
            }]),
        );
        let job = job_with_assets(assets);
        let artifacts = job.artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].role, "motion_bvh");
    }

    #[test]
    fn artifacts_default_empty() {
        let job = job_with_assets(Map::new());
        assert!(job.artifacts().is_empty());
        assert_eq!(job.artifacts_value(), json!([]));
    }

    #[test]
    fn logs_tail_returns_newest() {
        let mut job = job_with_assets(Map::new());
        for i in 0..10 {
            job.logs.push_back(format!("line {i}"));
        }
        let tail = job.logs_tail(3);
        assert_eq!(tail, vec!["line 7", "line 8", "line 9"]);
        assert_eq!(job.logs_tail(100).len(), 10);
    }
}
