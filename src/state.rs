//! State directory resolution and persisted-state helpers.
//!
//! All collaborators locate persisted state through the `VIGIL_STATE_DIR`
//! environment variable, falling back to `.vigil/` under the current
//! directory. The state directory holds the rules file, the statistics map,
//! the append-only event log, the optional excludes file, and log output.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::StreamEvent;

/// Environment variable collaborators read to locate persisted state.
pub const STATE_DIR_ENV: &str = "VIGIL_STATE_DIR";

/// Name of the state directory created under a project root.
pub const STATE_DIR_NAME: &str = ".vigil";

/// Resolve the state directory from the environment, falling back to
/// `<cwd>/.vigil`.
pub fn state_dir() -> PathBuf {
    match env::var(STATE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(STATE_DIR_NAME),
    }
}

/// Create `<root>/.vigil` (and parents) if needed.
pub fn ensure_state_dir(root: &Path) -> Result<PathBuf> {
    let state = root.join(STATE_DIR_NAME);
    fs::create_dir_all(&state)
        .with_context(|| format!("Failed to create state directory {}", state.display()))?;
    Ok(state)
}

/// State directory for a project root: the `VIGIL_STATE_DIR` override when
/// set, otherwise `<root>/.vigil`. Created if needed.
pub fn resolve_state_dir(root: &Path) -> Result<PathBuf> {
    match env::var(STATE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let state = PathBuf::from(dir);
            fs::create_dir_all(&state).with_context(|| {
                format!("Failed to create state directory {}", state.display())
            })?;
            Ok(state)
        }
        _ => ensure_state_dir(root),
    }
}

pub fn is_git_repo(root: &Path) -> bool {
    root.join(".git").exists()
}

/// Append `entry` to the root's `.gitignore` once. Returns whether a write
/// happened.
pub fn add_to_gitignore(root: &Path, entry: &str) -> Result<bool> {
    let gitignore = root.join(".gitignore");
    if gitignore.exists() {
        let content = fs::read_to_string(&gitignore)
            .with_context(|| format!("Failed to read {}", gitignore.display()))?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(false);
        }
        let mut f = OpenOptions::new().append(true).open(&gitignore)?;
        if !content.is_empty() && !content.ends_with('\n') {
            writeln!(f)?;
        }
        writeln!(f, "{entry}")?;
    } else {
        fs::write(&gitignore, format!("{entry}\n"))?;
    }
    Ok(true)
}

/// Directory names pruned from every watched root by default.
pub const DEFAULT_EXCLUDE_NAMES: &[&str] = &[".git", "node_modules", ".venv", "target", ".vigil"];

#[derive(Debug, Serialize, Deserialize)]
struct ExcludesFile {
    #[serde(default)]
    names: Vec<String>,
}

/// Exclusion names from `<state>/excludes.toml`, or the defaults when the
/// file is absent. A malformed file falls back to the defaults with a
/// warning rather than disabling exclusion.
pub fn load_exclude_names(state_dir: &Path) -> Vec<String> {
    let path = state_dir.join("excludes.toml");
    let defaults = || DEFAULT_EXCLUDE_NAMES.iter().map(|s| s.to_string()).collect();
    if !path.exists() {
        return defaults();
    }
    match fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|text| toml::from_str::<ExcludesFile>(&text).map_err(anyhow::Error::from))
    {
        Ok(file) => file.names,
        Err(e) => {
            warn!("Ignoring malformed excludes file {}: {}", path.display(), e);
            defaults()
        }
    }
}

/// Append-only newline-delimited event log.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("events.ndjson"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a JSON line.
    pub fn append(&self, event: &StreamEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("Failed to serialize stream event")?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open event log {}", self.path.display()))?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Last `limit` entries, oldest first. Unparsable lines are skipped.
    pub fn tail(&self, limit: usize) -> Vec<serde_json::Value> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}
