//! Explicit plugin-tool registry.
//!
//! The registry is an ordinary value constructed at startup and passed by
//! reference into the dispatcher; there is no ambient global. Tools are
//! invoked with JSON args whose `{{placeholder}}` strings are rendered from
//! the match context before the call.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

/// A named side-effect tool invocable from `plugin_tool` actions.
pub trait PluginTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn run(&self, args: &Value) -> Result<Value>;
}

/// Registry of plugin tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn PluginTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Box::new(EchoTool))
            .expect("builtin registration cannot collide");
        registry
            .register(Box::new(AppendLineTool))
            .expect("builtin registration cannot collide");
        registry
    }

    pub fn register(&mut self, tool: Box<dyn PluginTool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            bail!("tool '{name}' already registered");
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn PluginTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }
}

/// Echo back provided text with an optional prefix.
struct EchoTool;

impl PluginTool for EchoTool {
    fn name(&self) -> &str {
        "echo.text"
    }

    fn description(&self) -> &str {
        "Echo back provided text with optional prefix"
    }

    fn run(&self, args: &Value) -> Result<Value> {
        let text = args["text"].as_str().context("missing 'text' argument")?;
        let prefix = args["prefix"].as_str().unwrap_or("");
        Ok(Value::String(format!("{prefix}{text}")))
    }
}

/// Append a line to a file (UTF-8).
struct AppendLineTool;

impl PluginTool for AppendLineTool {
    fn name(&self) -> &str {
        "file.append_line"
    }

    fn description(&self) -> &str {
        "Append a line to a file (UTF-8)"
    }

    fn run(&self, args: &Value) -> Result<Value> {
        let path = args["path"].as_str().context("missing 'path' argument")?;
        let line = args["line"].as_str().context("missing 'line' argument")?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {path}"))?;
        writeln!(f, "{line}")?;
        Ok(Value::String(format!("appended to {path}")))
    }
}

/// Substitutable `(key, value)` pairs from the context: scalar top-level
/// fields plus scalar fields of the nested `hit` object.
fn substitutions(context: &Value) -> Vec<(String, String)> {
    fn scalars(map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
        for (k, v) in map {
            match v {
                Value::String(s) => out.push((k.clone(), s.clone())),
                Value::Number(n) => out.push((k.clone(), n.to_string())),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    if let Value::Object(map) = context {
        scalars(map, &mut out);
        if let Some(Value::Object(hit)) = map.get("hit") {
            scalars(hit, &mut out);
        }
    }
    out
}

/// Render `{{placeholder}}` strings in `args` from context fields.
///
/// The context exposes top-level keys like `path`, `line` and `rule`, and
/// nested `hit.*` scalar fields.
pub fn render_args(args: &Value, context: &Value) -> Value {
    let subs = substitutions(context);
    render_value(args, &subs)
}

fn render_value(val: &Value, subs: &[(String, String)]) -> Value {
    match val {
        Value::String(s) => {
            let mut out = s.clone();
            for (key, replacement) in subs {
                out = out.replace(&format!("{{{{{key}}}}}"), replacement);
            }
            Value::String(out)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, subs)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_value(v, subs)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_echo_tool() {
        let registry = ToolRegistry::with_builtins();
        let tool = registry.get("echo.text").unwrap();
        let out = tool
            .run(&json!({"text": "hello", "prefix": ">> "}))
            .unwrap();
        assert_eq!(out, json!(">> hello"));
    }

    #[test]
    fn test_append_line_tool_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let registry = ToolRegistry::with_builtins();
        let tool = registry.get("file.append_line").unwrap();
        tool.run(&json!({"path": path.to_str().unwrap(), "line": "a"}))
            .unwrap();
        tool.run(&json!({"path": path.to_str().unwrap(), "line": "b"}))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::with_builtins();
        assert!(registry.register(Box::new(EchoTool)).is_err());
    }

    #[test]
    fn test_render_args_substitutes_context_and_hit_fields() {
        let args = json!({
            "message": "{{rule}} fired on {{path}} (sim {{similarity}})",
            "nested": {"line": "{{line}}"},
        });
        let context = json!({
            "path": "/var/log/app.log",
            "rule": "DB failures",
            "line": "failed too connect",
            "hit": {"similarity": 0.944},
        });
        let rendered = render_args(&args, &context);
        assert_eq!(
            rendered["message"],
            "DB failures fired on /var/log/app.log (sim 0.944)"
        );
        assert_eq!(rendered["nested"]["line"], "failed too connect");
    }
}
