//! Offset/identity-tracking incremental log reader.
//!
//! The tailer remembers a byte offset plus the identity of the open file and
//! yields only newly appended lines. Rotation is detected by an identity
//! change (Unix inode); where identities are unavailable, or when the file
//! shrinks below the tracked offset (truncate-in-place), the tailer reopens
//! at offset 0. On first start an existing file is tailed from end-of-file,
//! with no backlog replay. Decoding is lossy, so undecodable bytes never
//! abort tailing.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{now_ts, LogLine};

#[cfg(unix)]
fn identity_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn identity_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}

/// Incremental tailer for one log file.
pub struct LogTailer {
    path: PathBuf,
    poll: Duration,
    running: Arc<AtomicBool>,
    file: Option<File>,
    offset: u64,
    identity: Option<u64>,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            path: path.into(),
            poll,
            running: Arc::new(AtomicBool::new(true)),
            file: None,
            offset: 0,
            identity: None,
        }
    }

    /// Shared stop flag; clearing it ends the loop at the next poll boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Open an already-existing file and position at end-of-file so only
    /// future growth is tailed. A missing file is left for `poll_once`.
    pub fn start_at_end(&mut self) {
        if let Ok(meta) = fs::metadata(&self.path) {
            match File::open(&self.path) {
                Ok(file) => {
                    self.offset = meta.len();
                    self.identity = identity_of(&meta);
                    self.file = Some(file);
                }
                Err(e) => debug!("Deferring open of {}: {}", self.path.display(), e),
            }
        }
    }

    /// One poll cycle: detect rotation, read new bytes, split into lines.
    /// Transient I/O failures skip the cycle and are retried next time.
    pub fn poll_once(&mut self) -> Vec<LogLine> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(_) => return Vec::new(),
        };
        let identity = identity_of(&meta);
        let rotated = match (&self.file, self.identity, identity) {
            (None, _, _) => true,
            (Some(_), Some(old), Some(new)) if old != new => true,
            // Identity unavailable or unchanged: a shrink below the tracked
            // offset means truncate-and-recreate.
            _ => meta.len() < self.offset,
        };
        if rotated {
            match File::open(&self.path) {
                Ok(file) => {
                    self.file = Some(file);
                    self.identity = identity;
                    self.offset = 0;
                }
                Err(e) => {
                    debug!("Cannot open {}: {}", self.path.display(), e);
                    return Vec::new();
                }
            }
        }
        let file = self.file.as_mut().expect("handle opened above");
        if let Err(e) = file.seek(SeekFrom::Start(self.offset)) {
            debug!("Seek failed on {}: {}", self.path.display(), e);
            return Vec::new();
        }
        let mut buf = Vec::new();
        if let Err(e) = file.read_to_end(&mut buf) {
            debug!("Read failed on {}: {}", self.path.display(), e);
            return Vec::new();
        }
        if buf.is_empty() {
            return Vec::new();
        }
        self.offset += buf.len() as u64;
        let ts = now_ts();
        let path = self.path.to_string_lossy().into_owned();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|line| LogLine {
                path: path.clone(),
                line: line.to_string(),
                ts,
            })
            .collect()
    }

    /// Tail until stopped or the receiver goes away.
    pub async fn run(mut self, tx: mpsc::Sender<LogLine>) {
        self.start_at_end();
        loop {
            tokio::time::sleep(self.poll).await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            for item in self.poll_once() {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tailer_for(path: &std::path::Path) -> LogTailer {
        LogTailer::new(path, Duration::from_millis(10))
    }

    #[test]
    fn test_never_redelivers_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();
        let mut tailer = tailer_for(&path);
        tailer.start_at_end();

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "first").unwrap();
        let lines: Vec<String> = tailer.poll_once().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["first"]);

        writeln!(f, "second").unwrap();
        let lines: Vec<String> = tailer.poll_once().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["second"]);
        assert!(tailer.poll_once().is_empty());
    }

    #[test]
    fn test_existing_content_is_not_replayed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old line\n").unwrap();
        let mut tailer = tailer_for(&path);
        tailer.start_at_end();
        assert!(tailer.poll_once().is_empty());
    }

    #[test]
    fn test_rotation_restarts_at_offset_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\ntwo\n").unwrap();
        let mut tailer = tailer_for(&path);
        tailer.start_at_end();

        // Replace the file: new identity, shorter content.
        fs::remove_file(&path).unwrap();
        fs::write(&path, "new\n").unwrap();
        let lines: Vec<String> = tailer.poll_once().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["new"]);
    }

    #[test]
    fn test_missing_path_skips_cycle() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("not-yet.log");
        let mut tailer = tailer_for(&path);
        tailer.start_at_end();
        assert!(tailer.poll_once().is_empty());

        // Once the file appears it is read from the beginning.
        fs::write(&path, "hello\n").unwrap();
        let lines: Vec<String> = tailer.poll_once().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["hello"]);
    }

    #[test]
    fn test_lossy_decoding_survives_bad_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();
        let mut tailer = tailer_for(&path);
        tailer.start_at_end();

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"ok \xff\xfe bytes\n").unwrap();
        let lines = tailer.poll_once();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].line.starts_with("ok "));
    }
}
