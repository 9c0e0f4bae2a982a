//! Action dispatch: the boundary between rule hits and side effects.
//!
//! The core calls `dispatch(action, context, registry)` and nothing else.
//! Action descriptors are opaque JSON; the dispatcher interprets the `type`
//! field and absorbs every failure: a broken action can never stall event
//! delivery for other paths.

pub mod registry;

use serde_json::{json, Value};
use tracing::{info, warn};

pub use registry::{render_args, PluginTool, ToolRegistry};

/// Match context handed to the dispatcher with every hit.
#[derive(Debug, Clone)]
pub struct ActionContext<'a> {
    pub path: &'a str,
    pub rule: &'a str,
    /// Serialized hit fields (kind, term, similarity, span).
    pub hit: Value,
    /// The matched log line, for log-scope hits.
    pub line: Option<&'a str>,
}

impl ActionContext<'_> {
    fn to_value(&self) -> Value {
        json!({
            "path": self.path,
            "rule": self.rule,
            "hit": self.hit,
            "line": self.line,
        })
    }
}

/// Perform the side effect described by `action`. Fire-and-forget: errors
/// are logged here and never propagate.
pub fn dispatch(action: &Value, context: &ActionContext<'_>, registry: &ToolRegistry) {
    let kind = action["type"].as_str().unwrap_or("notify");
    match kind {
        "notify" => notify(action, context),
        "shell" => {
            // Stub: shell actions are disabled; nothing is executed.
            info!("[shell-disabled] {}", truncate(&action.to_string(), 500));
        }
        "ai_tool" => {
            // Placeholder until a real provider is wired up.
            let prompt_len = action["prompt"].as_str().map(str::len).unwrap_or(0);
            info!(
                "[ai_tool] provider={} model={} prompt={} chars",
                action["provider"].as_str().unwrap_or("?"),
                action["model"].as_str().unwrap_or("?"),
                prompt_len
            );
        }
        "plugin_tool" => plugin_tool(action, context, registry),
        _ => notify(&json!({"type": "unknown"}), context),
    }
}

fn notify(action: &Value, context: &ActionContext<'_>) {
    let mut payload = context.to_value();
    payload["action"] = action.clone();
    info!("[notify] {}", truncate(&payload.to_string(), 2000));
}

fn plugin_tool(action: &Value, context: &ActionContext<'_>, registry: &ToolRegistry) {
    let Some(name) = action["name"].as_str() else {
        warn!("[plugin_tool] missing 'name' in action");
        return;
    };
    let Some(tool) = registry.get(name) else {
        warn!("[plugin_tool] tool not found: {name}");
        return;
    };
    let raw_args = action.get("args").cloned().unwrap_or_else(|| json!({}));
    let args = render_args(&raw_args, &context.to_value());
    match tool.run(&args) {
        Ok(result) => info!("[plugin_tool] {name} -> {}", truncate(&result.to_string(), 500)),
        Err(e) => warn!("[plugin_tool] {name} failed: {e:#}"),
    }
}

/// Truncate on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ActionContext<'static> {
        ActionContext {
            path: "/var/log/app.log",
            rule: "Errors in logs",
            hit: json!({"kind": "regex"}),
            line: Some("ERROR: boom"),
        }
    }

    #[test]
    fn test_dispatch_swallows_unknown_types() {
        let registry = ToolRegistry::with_builtins();
        dispatch(&json!({"type": "no_such_action"}), &context(), &registry);
        dispatch(&json!({}), &context(), &registry);
        dispatch(&json!(null), &context(), &registry);
    }

    #[test]
    fn test_plugin_tool_runs_with_rendered_args() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("hits.txt");
        let registry = ToolRegistry::with_builtins();
        let action = json!({
            "type": "plugin_tool",
            "name": "file.append_line",
            "args": {"path": out.to_str().unwrap(), "line": "{{rule}}: {{line}}"},
        });
        dispatch(&action, &context(), &registry);
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "Errors in logs: ERROR: boom\n");
    }

    #[test]
    fn test_plugin_tool_failure_does_not_propagate() {
        let registry = ToolRegistry::with_builtins();
        // echo.text without its required argument fails inside the tool.
        let action = json!({"type": "plugin_tool", "name": "echo.text", "args": {}});
        dispatch(&action, &context(), &registry);
        // Unknown tool name is also absorbed.
        let action = json!({"type": "plugin_tool", "name": "nope"});
        dispatch(&action, &context(), &registry);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "héllo";
        assert_eq!(truncate(s, 2), "h");
        assert_eq!(truncate(s, 100), "héllo");
    }
}
