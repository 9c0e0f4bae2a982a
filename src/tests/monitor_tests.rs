//! Orchestrator pipeline tests: idempotent adds, event routing, stats.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::ToolRegistry;
use crate::events::{now_ts, FileEvent, FileEventKind, LogLine, StreamEvent};
use crate::monitor::Monitor;
use crate::stats;

fn new_monitor(state: &std::path::Path) -> Arc<Monitor> {
    // A long poll interval keeps background pollers quiet during the test.
    Monitor::new(
        Duration::from_secs(3600),
        state.to_path_buf(),
        ToolRegistry::with_builtins(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_add_watch_and_add_log_are_idempotent() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);

    let watched = dir.path().join("src");
    fs::create_dir(&watched).unwrap();
    let log = dir.path().join("app.log");
    fs::write(&log, "").unwrap();

    monitor.add_watch(watched.to_str().unwrap()).await;
    monitor.add_watch(watched.to_str().unwrap()).await;
    monitor.add_log(log.to_str().unwrap()).await;
    monitor.add_log(log.to_str().unwrap()).await;

    assert_eq!(monitor.task_count().await, 2);
    let status = monitor.status().await;
    assert_eq!(status.dirs.len(), 1);
    assert_eq!(status.logs.len(), 1);
    monitor.stop().await;
}

#[tokio::test]
async fn test_modified_file_flows_to_stream_rules_and_stats() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);
    let sub = monitor.broadcaster().add_subscriber().await;

    // Matches the default "Errors in logs" rule.
    let target = dir.path().join("worker.log");
    fs::write(&target, "ok\nERROR: database timeout\n").unwrap();

    let event = FileEvent::new(
        FileEventKind::Modified,
        target.to_string_lossy().into_owned(),
        now_ts(),
    );
    monitor.on_file_event(event).await;

    match sub.try_recv() {
        Some(StreamEvent::FileEvent { kind, .. }) => assert_eq!(kind, FileEventKind::Modified),
        other => panic!("expected file_event, got {other:?}"),
    }
    match sub.try_recv() {
        Some(StreamEvent::RuleHit { rule, .. }) => assert_eq!(rule, "Errors in logs"),
        other => panic!("expected rule_hit, got {other:?}"),
    }
    match sub.try_recv() {
        // First observation of a path records a zero delta.
        Some(StreamEvent::FileStats { delta_lines, .. }) => assert_eq!(delta_lines, 0),
        other => panic!("expected file_stats, got {other:?}"),
    }

    // The stats map was persisted with the recounted line total.
    let persisted = stats::load_stats(&state.join("file_stats.json"));
    let stat = persisted.get(&target.to_string_lossy().into_owned()).unwrap();
    assert_eq!(stat.last_line_count, Some(2));
    monitor.stop().await;
}

#[tokio::test]
async fn test_second_modification_reports_line_delta() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);

    let target = dir.path().join("notes.txt");
    fs::write(&target, "one\n").unwrap();
    let path = target.to_string_lossy().into_owned();

    monitor
        .on_file_event(FileEvent::new(FileEventKind::Modified, path.clone(), 10.0))
        .await;
    fs::write(&target, "one\ntwo\nthree\n").unwrap();
    let sub = monitor.broadcaster().add_subscriber().await;
    monitor
        .on_file_event(FileEvent::new(FileEventKind::Modified, path.clone(), 20.0))
        .await;

    let mut saw_delta = None;
    while let Some(event) = sub.try_recv() {
        if let StreamEvent::FileStats { delta_lines, .. } = event {
            saw_delta = Some(delta_lines);
        }
    }
    assert_eq!(saw_delta, Some(2));
    monitor.stop().await;
}

#[tokio::test]
async fn test_tailed_path_is_never_recounted() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);

    let log = dir.path().join("app.log");
    fs::write(&log, "a\nb\nc\n").unwrap();
    let path = log.to_string_lossy().into_owned();
    monitor.add_log(&path).await;

    let sub = monitor.broadcaster().add_subscriber().await;
    monitor
        .on_file_event(FileEvent::new(FileEventKind::Modified, path.clone(), 5.0))
        .await;

    let mut stats_delta = None;
    while let Some(event) = sub.try_recv() {
        if let StreamEvent::FileStats { delta_lines, .. } = event {
            stats_delta = Some(delta_lines);
        }
    }
    // The tailer owns this path's count; the poller path records zero.
    assert_eq!(stats_delta, Some(0));
    monitor.stop().await;
}

#[tokio::test]
async fn test_log_line_updates_count_and_publishes() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);
    let sub = monitor.broadcaster().add_subscriber().await;

    let item = LogLine {
        path: "/var/log/app.log".to_string(),
        line: "ERROR: database timeout".to_string(),
        ts: 30.0,
    };
    monitor.on_log_line(item).await;

    let mut types = Vec::new();
    while let Some(event) = sub.try_recv() {
        types.push(match event {
            StreamEvent::LogLine { .. } => "log_line",
            StreamEvent::RuleHit { .. } => "rule_hit",
            StreamEvent::FileStats { delta_lines, .. } => {
                assert_eq!(delta_lines, 1);
                "file_stats"
            }
            _ => "other",
        });
    }
    assert_eq!(types, vec!["log_line", "rule_hit", "file_stats"]);

    let persisted = stats::load_stats(&state.join("file_stats.json"));
    assert_eq!(
        persisted.get("/var/log/app.log").unwrap().last_line_count,
        Some(1)
    );
    monitor.stop().await;
}

#[tokio::test]
async fn test_event_log_records_everything() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join(".vigil");
    let monitor = new_monitor(&state);

    monitor
        .on_file_event(FileEvent::new(FileEventKind::DirCreated, "/p/newdir", 1.0))
        .await;
    monitor
        .on_file_event(FileEvent::new(FileEventKind::Created, "/p/a.txt", 2.0))
        .await;

    let entries = monitor.event_log().tail(10);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["type"], "dir_event");
    assert_eq!(entries[1]["type"], "file_event");
    monitor.stop().await;
}
