//! Per-path change statistics: sliding-window rate and acceleration.
//!
//! A `FileStat` accumulates `(timestamp, delta_lines)` entries and derives
//! two user-visible numbers over the trailing five minutes: lines-per-minute
//! and the difference between the second-half and first-half rates. The
//! arithmetic here is telemetry the operator watches, so it is kept exact.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Width of the statistics window in seconds.
const WINDOW_SECS: f64 = 300.0;

/// Mutable per-path record. Owned exclusively by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
    #[serde(default)]
    pub last_line_count: Option<u64>,
    /// `(timestamp, delta_lines)` pairs, pruned to the trailing window on
    /// every insert.
    #[serde(default)]
    pub changes: Vec<(f64, i64)>,
}

impl FileStat {
    /// Record a line-count delta and prune entries older than the window.
    pub fn add_delta(&mut self, ts: f64, delta: i64) {
        self.changes.push((ts, delta));
        let cutoff = ts - WINDOW_SECS;
        self.changes.retain(|(t, _)| *t >= cutoff);
    }

    /// Average rate (lines/min) and acceleration (lines/min²) over the last
    /// five minutes, both rounded to 3 decimal places.
    ///
    /// The window is re-derived from the newest entry even though inserts
    /// already prune, so stale persisted state cannot skew the numbers. The
    /// acceleration splits the window at its chronological midpoint, not the
    /// midpoint of the observed data.
    pub fn rates(&self) -> (f64, f64) {
        if self.changes.is_empty() {
            return (0.0, 0.0);
        }
        let now = self
            .changes
            .iter()
            .map(|(t, _)| *t)
            .fold(f64::MIN, f64::max);
        let cutoff = now - WINDOW_SECS;
        let window: Vec<(f64, i64)> = self
            .changes
            .iter()
            .copied()
            .filter(|(t, _)| *t >= cutoff)
            .collect();
        if window.is_empty() {
            return (0.0, 0.0);
        }
        let rate = Self::rate_of(&window);
        let mid = cutoff + WINDOW_SECS / 2.0;
        let first: Vec<(f64, i64)> = window.iter().copied().filter(|(t, _)| *t < mid).collect();
        let second: Vec<(f64, i64)> = window.iter().copied().filter(|(t, _)| *t >= mid).collect();
        let accel = (Self::rate_of(&second) - Self::rate_of(&first)) / 5.0;
        (round3(rate), round3(accel))
    }

    /// Per-minute rate of one group of entries, with a 1-second elapsed floor.
    fn rate_of(group: &[(f64, i64)]) -> f64 {
        if group.is_empty() {
            return 0.0;
        }
        let total: i64 = group.iter().map(|(_, d)| *d).sum();
        let max_ts = group.iter().map(|(t, _)| *t).fold(f64::MIN, f64::max);
        let min_ts = group.iter().map(|(t, _)| *t).fold(f64::MAX, f64::min);
        let elapsed = (max_ts - min_ts).max(1.0);
        total as f64 / (elapsed / 60.0)
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Load the persisted statistics map, tolerating a missing or corrupt file.
pub fn load_stats(path: &Path) -> BTreeMap<String, FileStat> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
    {
        Ok(map) => map,
        Err(e) => {
            warn!("Ignoring unreadable stats file {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

/// Persist the full statistics map. Called after every update; durability is
/// favored over throughput because updates are rare relative to polling.
pub fn save_stats(path: &Path, stats: &BTreeMap<String, FileStat>) -> Result<()> {
    let text = serde_json::to_string(stats).context("Failed to serialize file stats")?;
    fs::write(path, text)
        .with_context(|| format!("Failed to write stats file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_reference_vector() {
        // 30 lines over 150s -> 12 lines/min; empty first half vs 12 -> 2.4.
        let stat = FileStat {
            last_line_count: Some(30),
            changes: vec![(0.0, 10), (150.0, 20)],
        };
        let (rate, accel) = stat.rates();
        assert_eq!(rate, 12.0);
        assert_eq!(accel, 2.4);
    }

    #[test]
    fn test_rates_empty() {
        assert_eq!(FileStat::default().rates(), (0.0, 0.0));
    }

    #[test]
    fn test_rates_single_entry_uses_elapsed_floor() {
        let mut stat = FileStat::default();
        stat.add_delta(100.0, 6);
        // 6 lines over a floored 1s window -> 360 lines/min, all second half.
        let (rate, accel) = stat.rates();
        assert_eq!(rate, 360.0);
        assert_eq!(accel, 72.0);
    }

    #[test]
    fn test_add_delta_prunes_old_entries() {
        let mut stat = FileStat::default();
        stat.add_delta(0.0, 1);
        stat.add_delta(100.0, 2);
        stat.add_delta(400.0, 3);
        assert_eq!(stat.changes, vec![(100.0, 2), (400.0, 3)]);
    }

    #[test]
    fn test_stats_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("file_stats.json");
        let mut stats = BTreeMap::new();
        stats.insert(
            "/tmp/app.log".to_string(),
            FileStat {
                last_line_count: Some(7),
                changes: vec![(1.5, 3)],
            },
        );
        save_stats(&path, &stats).unwrap();
        assert_eq!(load_stats(&path), stats);
    }

    #[test]
    fn test_load_stats_tolerates_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("file_stats.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_stats(&path).is_empty());
    }
}
