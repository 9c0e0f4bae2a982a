//! Snapshot-diff directory poller.
//!
//! Each cycle re-enumerates the watched tree, diffs against the previous
//! snapshot, and emits `FileEvent`s in a fixed category order (created,
//! modified, deleted, dir_created, dir_deleted), lexicographically sorted by
//! path within each category. Deletion is only ever inferred from the
//! before/after comparison; a file that vanishes mid-scan is skipped for
//! that cycle, not reported.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::debug;
use walkdir::WalkDir;

use crate::events::{now_ts, FileEvent, FileEventKind};

/// One cycle's view of the tree: file mtimes plus the directory set.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub files: BTreeMap<String, SystemTime>,
    pub dirs: BTreeSet<String>,
}

/// True when `path` equals an excluded prefix or is nested under one.
fn is_excluded(path: &str, exclude_prefixes: &[String]) -> bool {
    exclude_prefixes.iter().any(|prefix| {
        path == prefix
            || (path.starts_with(prefix)
                && path[prefix.len()..].starts_with(MAIN_SEPARATOR))
    })
}

/// Enumerate the tree under `root`, pruning excluded subtrees. Stat races
/// and unreadable entries are skipped for the cycle.
pub fn scan(root: &Path, exclude_prefixes: &[String]) -> Snapshot {
    let mut snap = Snapshot::default();
    if !root.exists() {
        return snap;
    }
    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|e| {
        !is_excluded(&e.path().to_string_lossy(), exclude_prefixes)
    });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry during scan: {}", e);
                continue;
            }
        };
        let path = entry.path().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            snap.dirs.insert(path);
        } else if entry.file_type().is_file() {
            let mtime = entry.metadata().ok().and_then(|m| m.modified().ok());
            match mtime {
                Some(mtime) => {
                    snap.files.insert(path, mtime);
                }
                None => debug!("Skipping {} during scan: stat failed", path),
            }
        }
    }
    snap
}

/// Diff two snapshots into ordered events, all stamped with `ts`.
pub fn diff(old: &Snapshot, new: &Snapshot, ts: f64) -> Vec<FileEvent> {
    let mut events = Vec::new();
    for path in new.files.keys() {
        if !old.files.contains_key(path) {
            events.push(FileEvent::new(FileEventKind::Created, path.clone(), ts));
        }
    }
    for (path, mtime) in &new.files {
        if let Some(old_mtime) = old.files.get(path) {
            if mtime > old_mtime {
                events.push(FileEvent::new(FileEventKind::Modified, path.clone(), ts));
            }
        }
    }
    for path in old.files.keys() {
        if !new.files.contains_key(path) {
            events.push(FileEvent::new(FileEventKind::Deleted, path.clone(), ts));
        }
    }
    for path in new.dirs.difference(&old.dirs) {
        events.push(FileEvent::new(FileEventKind::DirCreated, path.clone(), ts));
    }
    for path in old.dirs.difference(&new.dirs) {
        events.push(FileEvent::new(FileEventKind::DirDeleted, path.clone(), ts));
    }
    events
}

/// Continuous poller over one watched root.
pub struct DirectoryPoller {
    root: std::path::PathBuf,
    poll: Duration,
    exclude_prefixes: Vec<String>,
    running: Arc<AtomicBool>,
}

impl DirectoryPoller {
    pub fn new(
        root: impl Into<std::path::PathBuf>,
        poll: Duration,
        exclude_prefixes: Vec<String>,
    ) -> Self {
        Self {
            root: root.into(),
            poll,
            exclude_prefixes,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared stop flag; clearing it ends the loop at the next poll boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Poll until stopped or the receiver goes away. The first scan seeds
    /// the snapshot without emitting events for pre-existing entries.
    pub async fn run(self, tx: mpsc::Sender<FileEvent>) {
        let mut snapshot = scan(&self.root, &self.exclude_prefixes);
        loop {
            tokio::time::sleep(self.poll).await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let new = scan(&self.root, &self.exclude_prefixes);
            let ts = now_ts();
            for event in diff(&snapshot, &new, ts) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            snapshot = new;
        }
    }
}
