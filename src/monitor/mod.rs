//! Monitor orchestrator.
//!
//! Owns the mutable process-wide state: watched directories, tailed logs,
//! one background task per root/log, cumulative counters, the loaded rule
//! set and the per-path statistics map. Pollers push onto channels; a single
//! pump task consumes them, routes every event through the broadcaster and
//! the append-only event log, and drives rule evaluation, action dispatch
//! and statistics updates. Events from one source stay totally ordered;
//! ordering across sources is undefined.

pub mod broadcaster;
pub mod dir_poller;
pub mod log_tailer;

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actions::{dispatch, ActionContext, ToolRegistry};
use crate::events::{FileEvent, FileEventKind, LogLine, StreamEvent};
use crate::rules::{self, MatchRule, RuleHit, SimilarityScorer, WHOLE_TEXT_CAP, WINDOW_SIZE};
use crate::state::{load_exclude_names, EventLog};
use crate::stats::{self, FileStat};

pub use broadcaster::{Broadcaster, Subscriber, DEFAULT_CAPACITY};
pub use dir_poller::DirectoryPoller;
pub use log_tailer::LogTailer;

/// Tailers poll faster than directory scans.
const LOG_POLL: Duration = Duration::from_millis(500);

/// Files above this size are never fully re-read for a line recount.
const RECOUNT_CAP: u64 = 10_000_000;

struct TaskEntry {
    // Held so the task stays attributable; cancellation goes through the
    // cooperative flag, not abort().
    #[allow(dead_code)]
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

#[derive(Default)]
struct MonitorInner {
    watched_dirs: BTreeMap<String, TaskEntry>,
    tailed_logs: BTreeMap<String, TaskEntry>,
    file_stats: BTreeMap<String, FileStat>,
}

/// Point-in-time view for `status` commands.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub dirs: Vec<String>,
    pub logs: Vec<String>,
    pub events: u64,
    pub lines: u64,
}

pub struct Monitor {
    poll_interval: Duration,
    state_dir: PathBuf,
    stats_path: PathBuf,
    rules: Vec<MatchRule>,
    scorer: Box<dyn SimilarityScorer>,
    registry: ToolRegistry,
    broadcaster: Broadcaster,
    event_log: EventLog,
    exclude_names: Vec<String>,
    inner: Mutex<MonitorInner>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
    event_count: AtomicU64,
    line_count: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    file_tx: mpsc::Sender<FileEvent>,
    log_tx: mpsc::Sender<LogLine>,
}

impl Monitor {
    /// Build the orchestrator and start its event pump. Rules are loaded
    /// from the state directory (created with defaults on first run); a
    /// malformed rules file disables classification with a warning rather
    /// than aborting the monitor.
    pub fn new(
        poll_interval: Duration,
        state_dir: PathBuf,
        registry: ToolRegistry,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;
        let rules = match rules::load_or_create(&state_dir.join("rules.toml")) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Rules disabled: {e}");
                Vec::new()
            }
        };
        let stats_path = state_dir.join("file_stats.json");
        let file_stats = stats::load_stats(&stats_path);
        let exclude_names = load_exclude_names(&state_dir);
        let event_log = EventLog::new(&state_dir);

        let (file_tx, file_rx) = mpsc::channel(1024);
        let (log_tx, log_rx) = mpsc::channel(1024);

        let monitor = Arc::new(Self {
            poll_interval,
            state_dir,
            stats_path,
            rules,
            scorer: rules::default_scorer(),
            registry,
            broadcaster: Broadcaster::default(),
            event_log,
            exclude_names,
            inner: Mutex::new(MonitorInner {
                file_stats,
                ..MonitorInner::default()
            }),
            pump: std::sync::Mutex::new(None),
            event_count: AtomicU64::new(0),
            line_count: AtomicU64::new(0),
            shutdown_tx: watch::channel(false).0,
            file_tx,
            log_tx,
        });
        monitor.spawn_pump(file_rx, log_rx);
        Ok(monitor)
    }

    fn spawn_pump(
        self: &Arc<Self>,
        mut file_rx: mpsc::Receiver<FileEvent>,
        mut log_rx: mpsc::Receiver<LogLine>,
    ) {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = file_rx.recv() => {
                        monitor.event_count.fetch_add(1, Ordering::Relaxed);
                        monitor.on_file_event(event).await;
                    }
                    Some(line) = log_rx.recv() => {
                        monitor.line_count.fetch_add(1, Ordering::Relaxed);
                        monitor.on_log_line(line).await;
                    }
                    else => break,
                }
            }
        });
        *self.pump.lock().expect("pump handle poisoned") = Some(handle);
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Start watching a directory tree. Idempotent by resolved absolute
    /// path; returns the resolved path.
    pub async fn add_watch(&self, path: &str) -> String {
        let root = absolutize(path);
        let key = root.to_string_lossy().into_owned();
        let mut inner = self.inner.lock().await;
        if inner.watched_dirs.contains_key(&key) {
            return key;
        }
        // The state dir plus configured noise names under this root are
        // pruned from every scan.
        let mut excludes = vec![self.state_dir.to_string_lossy().into_owned()];
        for name in &self.exclude_names {
            excludes.push(root.join(name).to_string_lossy().into_owned());
        }
        let poller = DirectoryPoller::new(root, self.poll_interval, excludes);
        let running = poller.stop_handle();
        let handle = tokio::spawn(poller.run(self.file_tx.clone()));
        inner.watched_dirs.insert(key.clone(), TaskEntry { handle, running });
        info!("Watching directory {}", key);
        key
    }

    /// Start tailing a log file. Idempotent by resolved absolute path;
    /// returns the resolved path.
    pub async fn add_log(&self, path: &str) -> String {
        let file = absolutize(path);
        let key = file.to_string_lossy().into_owned();
        let mut inner = self.inner.lock().await;
        if inner.tailed_logs.contains_key(&key) {
            return key;
        }
        let tailer = LogTailer::new(file, LOG_POLL);
        let running = tailer.stop_handle();
        let handle = tokio::spawn(tailer.run(self.log_tx.clone()));
        inner.tailed_logs.insert(key.clone(), TaskEntry { handle, running });
        info!("Tailing log {}", key);
        key
    }

    pub async fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        StatusSnapshot {
            dirs: inner.watched_dirs.keys().cloned().collect(),
            logs: inner.tailed_logs.keys().cloned().collect(),
            events: self.event_count.load(Ordering::Relaxed),
            lines: self.line_count.load(Ordering::Relaxed),
        }
    }

    /// Cooperatively stop every background task. Pollers observe the flag
    /// at their next poll boundary.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        for entry in inner.watched_dirs.values().chain(inner.tailed_logs.values()) {
            entry.running.store(false, Ordering::Release);
        }
        drop(inner);
        if let Some(pump) = self.pump.lock().expect("pump handle poisoned").take() {
            pump.abort();
        }
        let _ = self.shutdown_tx.send(true);
        info!("Monitor stopping");
    }

    /// Resolves when `stop` has been requested, even if it already was.
    pub async fn wait_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Number of live poller tasks (watched roots + tailed logs).
    pub async fn task_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.watched_dirs.len() + inner.tailed_logs.len()
    }

    async fn publish_and_log(&self, event: StreamEvent) {
        if let Err(e) = self.event_log.append(&event) {
            warn!("Event log append failed: {e:#}");
        }
        self.broadcaster.publish(event).await;
    }

    pub async fn on_file_event(&self, event: FileEvent) {
        self.publish_and_log(StreamEvent::from_file_event(&event)).await;
        if event.kind.is_dir_event() {
            info!("[dir] {} {}", event.kind.as_str(), event.path);
            return;
        }
        info!("[file] {} {}", event.kind.as_str(), event.path);
        if event.kind != FileEventKind::Modified {
            return;
        }
        if !self.rules.is_empty() {
            for hit in self.scan_path(&event.path) {
                self.handle_hit(&event.path, &hit, None, event.ts).await;
            }
        }
        self.update_file_stat(&event).await;
    }

    pub async fn on_log_line(&self, item: LogLine) {
        let name = Path::new(&item.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.path.clone());
        info!("[log] {}: {}", name, item.line);
        self.publish_and_log(StreamEvent::from_log_line(&item)).await;
        if !self.rules.is_empty() {
            let hits = rules::evaluate_log_line(
                &item.path,
                &item.line,
                &self.rules,
                self.scorer.as_ref(),
            );
            for hit in hits {
                self.handle_hit(&item.path, &hit, Some(&item.line), item.ts).await;
            }
        }
        // Tailed logs grow by exactly one counted line per callback; the
        // full-recount path never runs for them.
        let mut inner = self.inner.lock().await;
        let mut stat = inner.file_stats.get(&item.path).cloned().unwrap_or_default();
        stat.last_line_count = Some(stat.last_line_count.unwrap_or(0) + 1);
        stat.add_delta(item.ts, 1);
        let (rate_5m, accel_5m) = stat.rates();
        inner.file_stats.insert(item.path.clone(), stat);
        self.persist_stats(&inner);
        drop(inner);
        self.publish_and_log(StreamEvent::FileStats {
            path: item.path.clone(),
            delta_lines: 1,
            rate_5m,
            accel_5m,
            ts: item.ts,
        })
        .await;
    }

    /// Dispatch one hit and republish it on the stream.
    async fn handle_hit(&self, path: &str, hit: &RuleHit, line: Option<&str>, ts: f64) {
        let context = ActionContext {
            path,
            rule: &hit.rule,
            hit: hit_fields(hit),
            line,
        };
        dispatch(&hit.action, &context, &self.registry);
        self.publish_and_log(StreamEvent::from_rule_hit(path, hit, ts)).await;
    }

    /// Bounded-read rule scan: whole file below the cap, seeked windows
    /// above it. Read failures skip the scan for this event.
    fn scan_path(&self, path: &str) -> Vec<RuleHit> {
        let p = Path::new(path);
        let size = match fs::metadata(p) {
            Ok(meta) => meta.len(),
            Err(_) => return Vec::new(),
        };
        if size as usize <= WHOLE_TEXT_CAP {
            match fs::read(p) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    rules::evaluate_file_text(path, &text, &self.rules, self.scorer.as_ref())
                }
                Err(e) => {
                    debug!("Skipping rule scan of {}: {}", path, e);
                    Vec::new()
                }
            }
        } else {
            let mut hits = Vec::new();
            let Ok(mut file) = fs::File::open(p) else {
                return hits;
            };
            for (a, b) in rules::windows_for_len(size as usize, WINDOW_SIZE) {
                let mut buf = vec![0u8; b - a];
                let ok = file.seek(SeekFrom::Start(a as u64)).is_ok()
                    && file.read_exact(&mut buf).is_ok();
                if !ok {
                    debug!("Skipping window {a}..{b} of {path}");
                    continue;
                }
                let chunk = String::from_utf8_lossy(&buf);
                hits.extend(rules::evaluate_chunk(
                    path,
                    &chunk,
                    (a, b),
                    &self.rules,
                    self.scorer.as_ref(),
                ));
            }
            hits
        }
    }

    /// Track line-count deltas for a modified file. A path currently tailed
    /// as a log is never recounted here; its tailer owns the count.
    async fn update_file_stat(&self, event: &FileEvent) {
        let mut inner = self.inner.lock().await;
        let tailed = inner.tailed_logs.contains_key(&event.path);
        let mut stat = inner.file_stats.get(&event.path).cloned().unwrap_or_default();

        let delta = if tailed {
            if stat.last_line_count.is_none() {
                stat.last_line_count = Some(0);
            }
            Some(0)
        } else {
            match count_lines_bounded(Path::new(&event.path)) {
                Ok(Some(count)) => {
                    let delta = stat
                        .last_line_count
                        .map(|prev| count as i64 - prev as i64)
                        .unwrap_or(0);
                    stat.last_line_count = Some(count);
                    Some(delta)
                }
                // Large file: growth is unknown without an unbounded read.
                Ok(None) => {
                    if stat.last_line_count.is_none() {
                        stat.last_line_count = Some(0);
                    }
                    Some(0)
                }
                Err(e) => {
                    debug!("Line recount failed for {}: {}", event.path, e);
                    None
                }
            }
        };

        let Some(delta) = delta else { return };
        stat.add_delta(event.ts, delta);
        let (rate_5m, accel_5m) = stat.rates();
        inner.file_stats.insert(event.path.clone(), stat);
        self.persist_stats(&inner);
        drop(inner);
        info!(
            "[file] Δlines={} rate_5m={} l/m accel_5m={} l/m^2",
            delta, rate_5m, accel_5m
        );
        self.publish_and_log(StreamEvent::FileStats {
            path: event.path.clone(),
            delta_lines: delta,
            rate_5m,
            accel_5m,
            ts: event.ts,
        })
        .await;
    }

    fn persist_stats(&self, inner: &MonitorInner) {
        if let Err(e) = stats::save_stats(&self.stats_path, &inner.file_stats) {
            warn!("Stats persist failed: {e:#}");
        }
    }
}

/// Serialized hit fields for the dispatcher context.
fn hit_fields(hit: &RuleHit) -> serde_json::Value {
    let mut value = json!({
        "rule": hit.rule,
        "kind": hit.kind,
    });
    if let Some(term) = &hit.term {
        value["term"] = json!(term);
    }
    if let Some(similarity) = hit.similarity {
        value["similarity"] = json!(similarity);
    }
    if let Some(span) = hit.span {
        value["span"] = json!(span);
    }
    value
}

/// Line count for files at or below the recount cap; `None` above it.
fn count_lines_bounded(path: &Path) -> std::io::Result<Option<u64>> {
    let meta = fs::metadata(path)?;
    if meta.len() > RECOUNT_CAP {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(String::from_utf8_lossy(&bytes).lines().count() as u64))
}

fn absolutize(path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    }
}
