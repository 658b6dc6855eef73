// SPDX-License-Identifier: MIT OR Apache-2.0
//! Progress bands per stage.
//!
//! Each stage owns a fixed `[start, end]` slice of the overall progress
//! scale; adapter-reported intra-stage progress is mapped into that band.
//! Progress is monotone within a stage, not across the whole job.

use mpl_core::JobStatus;

/// The `[start, end]` progress interval of a stage.
#[must_use]
pub fn progress_band(stage: JobStatus) -> (f64, f64) {
    match stage {
        JobStatus::Queued => (0.0, 0.0),
        JobStatus::Planning => (0.0, 0.10),
        JobStatus::RunningMotion => (0.10, 0.35),
        JobStatus::RunningScene => (0.35, 0.55),
        JobStatus::RunningMusic => (0.55, 0.70),
        JobStatus::RunningCharacter => (0.70, 0.78),
        JobStatus::ComposingPreview => (0.78, 0.90),
        JobStatus::ExportingVideo => (0.90, 0.99),
        JobStatus::Done => (1.0, 1.0),
        JobStatus::Failed | JobStatus::Canceled => (0.0, 1.0),
    }
}

/// Map adapter-reported progress `p` into a stage's band.
///
/// Values above 1 are reinterpreted as percentages, then clamped.
#[must_use]
pub fn map_progress(band: (f64, f64), p: f64) -> f64 {
    let p = if p > 1.0 { p / 100.0 } else { p };
    let p = p.clamp(0.0, 1.0);
    let (start, end) = band;
    start + (end - start) * p
}

/// Stages that must serialize on the single-GPU semaphore.
#[must_use]
pub fn is_gpu_bound(stage: JobStatus) -> bool {
    matches!(
        stage,
        JobStatus::RunningScene
            | JobStatus::RunningMotion
            | JobStatus::RunningMusic
            | JobStatus::ComposingPreview
            | JobStatus::ExportingVideo
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_cover_the_unit_interval() {
        assert_eq!(progress_band(JobStatus::Planning), (0.0, 0.10));
        assert_eq!(progress_band(JobStatus::RunningMotion), (0.10, 0.35));
        assert_eq!(progress_band(JobStatus::RunningScene), (0.35, 0.55));
        assert_eq!(progress_band(JobStatus::RunningMusic), (0.55, 0.70));
        assert_eq!(progress_band(JobStatus::RunningCharacter), (0.70, 0.78));
        assert_eq!(progress_band(JobStatus::ComposingPreview), (0.78, 0.90));
        assert_eq!(progress_band(JobStatus::ExportingVideo), (0.90, 0.99));
        assert_eq!(progress_band(JobStatus::Done), (1.0, 1.0));
    }

    #[test]
    fn band_edges_are_ordered() {
        for stage in JobStatus::ALL {
            let (start, end) = progress_band(stage);
            assert!(start <= end, "{stage} band reversed");
            assert!((0.0..=1.0).contains(&start));
            assert!((0.0..=1.0).contains(&end));
        }
    }

    #[test]
    fn progress_maps_linearly_into_band() {
        let band = (0.10, 0.35);
        assert_eq!(map_progress(band, 0.0), 0.10);
        assert_eq!(map_progress(band, 1.0), 0.35);
        let mid = map_progress(band, 0.5);
        assert!((mid - 0.225).abs() < 1e-12);
    }

    #[test]
    fn percentages_are_rescaled() {
        let band = (0.0, 1.0);
        assert!((map_progress(band, 50.0) - 0.5).abs() < 1e-12);
        assert_eq!(map_progress(band, 250.0), 1.0);
    }

    #[test]
    fn out_of_range_is_clamped() {
        let band = (0.55, 0.70);
        assert_eq!(map_progress(band, -3.0), 0.55);
        assert_eq!(map_progress(band, 1.0), 0.70);
    }

    #[test]
    fn gpu_bound_set() {
        assert!(is_gpu_bound(JobStatus::RunningScene));
        assert!(is_gpu_bound(JobStatus::RunningMotion));
        assert!(is_gpu_bound(JobStatus::RunningMusic));
        assert!(is_gpu_bound(JobStatus::ComposingPreview));
        assert!(is_gpu_bound(JobStatus::ExportingVideo));
        assert!(!is_gpu_bound(JobStatus::RunningCharacter));
        assert!(!is_gpu_bound(JobStatus::Planning));
        assert!(!is_gpu_bound(JobStatus::Queued));
    }
}
