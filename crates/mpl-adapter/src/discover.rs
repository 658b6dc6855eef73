// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output discovery with bounded polling.
//!
//! External generators write their outputs with noticeable filesystem
//! latency (network mounts, WSL bridges).  Discovery therefore polls within
//! a bounded window instead of checking once.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Default window a generator's output is awaited for.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(60);
/// Discovery poll period.
const POLL_PERIOD: Duration = Duration::from_millis(500);

/// Wait for a file to appear (and be non-empty) within the window.
///
/// Returns `true` as soon as the file is a regular file; `false` when the
/// window elapses first.
#[must_use]
pub fn wait_for_file(path: &Path, window: Duration) -> bool {
    let deadline = Instant::now() + window;
    loop {
        if path.is_file() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_PERIOD.min(window));
    }
}

/// Find the newest regular file with the given extension under `dir`,
/// polling within the window until at least one appears.
#[must_use]
pub fn newest_file_matching(dir: &Path, extension: &str, window: Duration) -> Option<PathBuf> {
    let deadline = Instant::now() + window;
    loop {
        if let Some(found) = scan_newest(dir, extension) {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL_PERIOD.min(window));
    }
}

fn scan_newest(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = newest
            .as_ref()
            .is_none_or(|(best, _)| modified > *best);
        if newer {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}
