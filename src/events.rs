//! Event value types and the stream wire envelope.
//!
//! `FileEvent` and `LogLine` are produced by the pollers and consumed once by
//! the orchestrator. `StreamEvent` is the tagged wire representation of
//! everything the orchestrator republishes: it is both the SSE `data:`
//! payload and the line format of the persisted event log.

use serde::{Deserialize, Serialize};

use crate::rules::{MatchKind, RuleHit};

/// Current wall-clock time as float seconds since the epoch.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Kind of change observed by the directory poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    DirCreated,
    DirDeleted,
}

impl FileEventKind {
    /// Directory events bypass rule evaluation and stat tracking.
    pub fn is_dir_event(self) -> bool {
        matches!(self, FileEventKind::DirCreated | FileEventKind::DirDeleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Deleted => "deleted",
            FileEventKind::DirCreated => "dir_created",
            FileEventKind::DirDeleted => "dir_deleted",
        }
    }
}

/// A single change observed by a directory poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: String,
    pub ts: f64,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>, ts: f64) -> Self {
        Self {
            kind,
            path: path.into(),
            ts,
        }
    }
}

/// A newly appended line observed by a log tailer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub path: String,
    pub line: String,
    pub ts: f64,
}

/// Everything the orchestrator produces, tagged for subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    FileEvent {
        path: String,
        kind: FileEventKind,
        ts: f64,
    },
    DirEvent {
        path: String,
        kind: FileEventKind,
        ts: f64,
    },
    LogLine {
        path: String,
        line: String,
        ts: f64,
    },
    RuleHit {
        path: String,
        rule: String,
        kind: MatchKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        term: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        similarity: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<[usize; 2]>,
        ts: f64,
    },
    FileStats {
        path: String,
        delta_lines: i64,
        rate_5m: f64,
        accel_5m: f64,
        ts: f64,
    },
}

impl StreamEvent {
    pub fn from_file_event(ev: &FileEvent) -> Self {
        if ev.kind.is_dir_event() {
            StreamEvent::DirEvent {
                path: ev.path.clone(),
                kind: ev.kind,
                ts: ev.ts,
            }
        } else {
            StreamEvent::FileEvent {
                path: ev.path.clone(),
                kind: ev.kind,
                ts: ev.ts,
            }
        }
    }

    pub fn from_log_line(item: &LogLine) -> Self {
        StreamEvent::LogLine {
            path: item.path.clone(),
            line: item.line.clone(),
            ts: item.ts,
        }
    }

    pub fn from_rule_hit(path: &str, hit: &RuleHit, ts: f64) -> Self {
        StreamEvent::RuleHit {
            path: path.to_string(),
            rule: hit.rule.clone(),
            kind: hit.kind,
            term: hit.term.clone(),
            similarity: hit.similarity,
            span: hit.span,
            ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_envelope_has_type_and_ts() {
        let ev = FileEvent::new(FileEventKind::Created, "/tmp/a.txt", 42.0);
        let json = serde_json::to_value(StreamEvent::from_file_event(&ev)).unwrap();
        assert_eq!(json["type"], "file_event");
        assert_eq!(json["kind"], "created");
        assert_eq!(json["ts"], 42.0);
    }

    #[test]
    fn test_dir_events_use_dir_envelope() {
        let ev = FileEvent::new(FileEventKind::DirCreated, "/tmp/d", 1.0);
        let json = serde_json::to_value(StreamEvent::from_file_event(&ev)).unwrap();
        assert_eq!(json["type"], "dir_event");
        assert_eq!(json["kind"], "dir_created");
    }

    #[test]
    fn test_optional_hit_fields_are_omitted() {
        let hit = RuleHit::regex("Errors in logs", serde_json::json!({"type": "notify"}));
        let json = serde_json::to_value(StreamEvent::from_rule_hit("/var/log/app.log", &hit, 5.0))
            .unwrap();
        assert_eq!(json["type"], "rule_hit");
        assert_eq!(json["kind"], "regex");
        assert!(json.get("term").is_none());
        assert!(json.get("similarity").is_none());
    }
}
