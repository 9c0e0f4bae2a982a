//! Rule matching engine: regex + fuzzy classification of lines and text.
//!
//! Rules are loaded once at startup from `rules.toml` in the state directory
//! (created with documented defaults on first run) and compiled into
//! `MatchRule` values. Evaluation is pure: a slice of rules plus a line or a
//! block of text in, a list of hits out. Large text is never scanned whole;
//! bounded windows keep per-event cost flat regardless of file size.

pub mod similarity;

use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use similarity::{default_scorer, EditDistanceScorer, SimilarityScorer};

/// Bytes per scan window for large text.
pub const WINDOW_SIZE: usize = 64 * 1024;

/// Above this size, only windowed scanning is applied.
pub const WHOLE_TEXT_CAP: usize = 10_000_000;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{name}': invalid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule '{name}': invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        name: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to read rules file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse rules file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where a rule applies: log lines, file scans, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Log,
    File,
    #[default]
    Auto,
}

/// One rule as written in `rules.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub fuzzy: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default = "default_lines_before")]
    pub lines_before: u32,
    #[serde(default = "default_lines_after")]
    pub lines_after: u32,
    #[serde(default = "default_action")]
    pub action: serde_json::Value,
}

fn default_threshold() -> f64 {
    0.8
}
fn default_lines_before() -> u32 {
    1
}
fn default_lines_after() -> u32 {
    3
}
fn default_action() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

/// A rule compiled for evaluation. Immutable after load.
#[derive(Debug)]
pub struct MatchRule {
    pub name: String,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    regex: Option<Regex>,
    pub fuzzy: Vec<String>,
    pub threshold: f64,
    pub scope: RuleScope,
    pub lines_before: u32,
    pub lines_after: u32,
    /// Opaque action descriptor, handed to the dispatcher untouched.
    pub action: serde_json::Value,
}

impl MatchRule {
    pub fn compile(spec: RuleSpec) -> Result<Self, RuleError> {
        let regex = match &spec.regex {
            Some(pat) => Some(
                RegexBuilder::new(pat)
                    .case_insensitive(true)
                    .multi_line(true)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|source| RuleError::InvalidRegex {
                        name: spec.name.clone(),
                        source,
                    })?,
            ),
            None => None,
        };
        let compile_globs = |patterns: &[String]| -> Result<Vec<glob::Pattern>, RuleError> {
            patterns
                .iter()
                .map(|p| {
                    glob::Pattern::new(p).map_err(|source| RuleError::InvalidGlob {
                        name: spec.name.clone(),
                        pattern: p.clone(),
                        source,
                    })
                })
                .collect()
        };
        let include = compile_globs(&spec.include)?;
        let exclude = compile_globs(&spec.exclude)?;
        Ok(Self {
            name: spec.name,
            include,
            exclude,
            regex,
            fuzzy: spec.fuzzy,
            threshold: spec.threshold,
            scope: spec.scope,
            lines_before: spec.lines_before,
            lines_after: spec.lines_after,
            action: spec.action,
        })
    }

    /// Include/exclude glob filter. A non-empty include list requires at
    /// least one match; any exclude match rejects regardless.
    pub fn path_matches(&self, path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(path)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(path))
    }

    fn applies_to_logs(&self) -> bool {
        matches!(self.scope, RuleScope::Log | RuleScope::Auto)
    }

    fn applies_to_files(&self) -> bool {
        matches!(self.scope, RuleScope::File | RuleScope::Auto)
    }
}

/// How a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Regex,
    Fuzzy,
}

/// One match produced by an evaluation call. Transient.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub rule: String,
    pub kind: MatchKind,
    pub action: serde_json::Value,
    pub term: Option<String>,
    pub similarity: Option<f64>,
    pub span: Option<[usize; 2]>,
}

impl RuleHit {
    pub fn regex(rule: &str, action: serde_json::Value) -> Self {
        Self {
            rule: rule.to_string(),
            kind: MatchKind::Regex,
            action,
            term: None,
            similarity: None,
            span: None,
        }
    }

    fn regex_span(rule: &str, action: serde_json::Value, span: [usize; 2]) -> Self {
        Self {
            span: Some(span),
            ..Self::regex(rule, action)
        }
    }

    fn fuzzy(rule: &str, action: serde_json::Value, term: &str, similarity: f64) -> Self {
        Self {
            rule: rule.to_string(),
            kind: MatchKind::Fuzzy,
            action,
            term: Some(term.to_string()),
            similarity: Some(similarity),
            span: None,
        }
    }
}

/// Best fuzzy candidate for a line, if it clears the relaxed floor
/// `max(0.6, threshold - 0.2)`. The floor sits below the configured
/// threshold so "close" matches still surface.
pub fn fuzzy_best(
    line: &str,
    terms: &[String],
    threshold: f64,
    scorer: &dyn SimilarityScorer,
) -> Option<(String, f64)> {
    if terms.is_empty() {
        return None;
    }
    let line_lower = line.to_lowercase();
    let mut best: (f64, Option<&String>) = (0.0, None);
    for term in terms {
        let s = scorer.ratio(&term.to_lowercase(), &line_lower);
        if s > best.0 {
            best = (s, Some(term));
        }
    }
    let floor = (threshold - 0.2).max(0.6);
    match best {
        (s, Some(term)) if s >= floor => Some((term.clone(), (s * 1000.0).round() / 1000.0)),
        _ => None,
    }
}

/// Evaluate every rule against a single log line.
///
/// A regex match short-circuits fuzzy checking for that rule on that line.
pub fn evaluate_log_line(
    path: &str,
    line: &str,
    rules: &[MatchRule],
    scorer: &dyn SimilarityScorer,
) -> Vec<RuleHit> {
    let mut hits = Vec::new();
    for rule in rules {
        if !rule.applies_to_logs() || !rule.path_matches(path) {
            continue;
        }
        if let Some(re) = &rule.regex {
            if re.is_match(line) {
                hits.push(RuleHit::regex(&rule.name, rule.action.clone()));
                continue;
            }
        }
        if let Some((term, similarity)) = fuzzy_best(line, &rule.fuzzy, rule.threshold, scorer) {
            hits.push(RuleHit::fuzzy(
                &rule.name,
                rule.action.clone(),
                &term,
                similarity,
            ));
        }
    }
    hits
}

/// Byte windows to scan for text of length `n`: the whole text below the
/// cap; otherwise the head, the tail, and windows centered at the 1/4, 2/4
/// and 3/4 offsets.
pub fn windows_for_len(n: usize, window: usize) -> Vec<(usize, usize)> {
    if n <= WHOLE_TEXT_CAP {
        return vec![(0, n)];
    }
    let mut windows = vec![(0, window.min(n)), (n.saturating_sub(window), n)];
    for k in 1..4 {
        let center = n / 4 * k;
        windows.push((center.saturating_sub(window / 2), (center + window / 2).min(n)));
    }
    windows
}

/// Largest char boundary at or below `i`.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    (0..=i).rev().find(|&j| s.is_char_boundary(j)).unwrap_or(0)
}

/// Evaluate one window of text against every file-scoped rule.
///
/// `span` is the window's byte range in the original text; regex hits carry
/// it, and the first fuzzy hit per rule ends that rule's line scan.
pub fn evaluate_chunk(
    path: &str,
    chunk: &str,
    span: (usize, usize),
    rules: &[MatchRule],
    scorer: &dyn SimilarityScorer,
) -> Vec<RuleHit> {
    let mut hits = Vec::new();
    for rule in rules {
        if !rule.applies_to_files() || !rule.path_matches(path) {
            continue;
        }
        if let Some(re) = &rule.regex {
            if re.is_match(chunk) {
                hits.push(RuleHit::regex_span(
                    &rule.name,
                    rule.action.clone(),
                    [span.0, span.1],
                ));
                continue;
            }
        }
        if !rule.fuzzy.is_empty() {
            for line in chunk.lines() {
                if let Some((term, similarity)) =
                    fuzzy_best(line, &rule.fuzzy, rule.threshold, scorer)
                {
                    hits.push(RuleHit::fuzzy(
                        &rule.name,
                        rule.action.clone(),
                        &term,
                        similarity,
                    ));
                    break;
                }
            }
        }
    }
    hits
}

/// Windowed scan of a block of text.
pub fn evaluate_file_text(
    path: &str,
    text: &str,
    rules: &[MatchRule],
    scorer: &dyn SimilarityScorer,
) -> Vec<RuleHit> {
    let mut hits = Vec::new();
    for (a, b) in windows_for_len(text.len(), WINDOW_SIZE) {
        let a = floor_char_boundary(text, a);
        let b = floor_char_boundary(text, b);
        if a >= b {
            continue;
        }
        hits.extend(evaluate_chunk(path, &text[a..b], (a, b), rules, scorer));
    }
    hits
}

/// Documented default rule set, written on first run.
pub const DEFAULT_RULES_TOML: &str = r#"# Vigil rule configuration.
#
# Each [[rules]] entry classifies activity on matching paths. `regex` is
# compiled case-insensitive; `fuzzy` terms match by similarity against
# `threshold`. The action table is handed to the dispatcher as-is.

[[rules]]
name = "Errors in logs"
include = ["**/*.log"]
regex = "(ERROR|CRITICAL)"
lines_before = 2
lines_after = 5

[rules.action]
type = "notify"

[[rules]]
name = "DB failures"
include = ["**/*.log"]
fuzzy = ["failed to connect", "timeout contacting db", "connection refused"]
threshold = 0.85
lines_before = 1
lines_after = 4

[rules.action]
type = "ai_tool"
provider = "anthropic"
model = "opus"
prompt = "Summarize the error and propose a fix with steps."
"#;

/// Load compiled rules from `path`, creating the file with defaults first if
/// it does not exist.
pub fn load_or_create(path: &Path) -> Result<Vec<MatchRule>, RuleError> {
    if !path.exists() {
        fs::write(path, DEFAULT_RULES_TOML)?;
        info!("Created default rules file at {}", path.display());
    }
    load_rules(path)
}

/// Load compiled rules from `path`; a missing file is an empty rule set.
pub fn load_rules(path: &Path) -> Result<Vec<MatchRule>, RuleError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let file: RulesFile = toml::from_str(&text)?;
    file.rules.into_iter().map(MatchRule::compile).collect()
}
