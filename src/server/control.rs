//! Control protocol: line-delimited JSON over TCP.
//!
//! One request per connection: read a line of UTF-8 JSON, dispatch, write a
//! line of JSON back, close. Commands form a closed tagged union; an unknown
//! tag is answered with a structured error, never a protocol-level failure.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::monitor::Monitor;

/// Commands accepted over the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    AddLog { path: String },
    AddWatch { path: String },
    Status,
    Stop,
}

/// One-line JSON responses.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Added {
        ok: bool,
        added: String,
    },
    Status {
        ok: bool,
        dirs: Vec<String>,
        logs: Vec<String>,
        events: u64,
        lines: u64,
    },
    Stopping {
        ok: bool,
        stopping: bool,
    },
    Error {
        ok: bool,
        error: String,
    },
}

impl ControlResponse {
    fn error(message: impl Into<String>) -> Self {
        ControlResponse::Error {
            ok: false,
            error: message.into(),
        }
    }
}

/// Parse one request line into a command, mapping malformed input to the
/// error message the response carries.
pub fn parse_command(line: &str) -> Result<ControlCommand, String> {
    match serde_json::from_str::<ControlCommand>(line) {
        Ok(cmd) => Ok(cmd),
        Err(_) => {
            let value: serde_json::Value = serde_json::from_str(line).unwrap_or_default();
            match value.get("cmd").and_then(|v| v.as_str()) {
                Some("add_log") | Some("add_watch") => Err("missing path".to_string()),
                _ => Err("unknown cmd".to_string()),
            }
        }
    }
}

/// Execute a parsed request line against the monitor.
pub async fn dispatch_command(line: &str, monitor: &Monitor) -> ControlResponse {
    match parse_command(line.trim()) {
        Ok(ControlCommand::AddLog { path }) if path.is_empty() => {
            ControlResponse::error("missing path")
        }
        Ok(ControlCommand::AddLog { path }) => ControlResponse::Added {
            ok: true,
            added: monitor.add_log(&path).await,
        },
        Ok(ControlCommand::AddWatch { path }) if path.is_empty() => {
            ControlResponse::error("missing path")
        }
        Ok(ControlCommand::AddWatch { path }) => ControlResponse::Added {
            ok: true,
            added: monitor.add_watch(&path).await,
        },
        Ok(ControlCommand::Status) => {
            let snapshot = monitor.status().await;
            ControlResponse::Status {
                ok: true,
                dirs: snapshot.dirs,
                logs: snapshot.logs,
                events: snapshot.events,
                lines: snapshot.lines,
            }
        }
        Ok(ControlCommand::Stop) => {
            monitor.stop().await;
            ControlResponse::Stopping {
                ok: true,
                stopping: true,
            }
        }
        Err(message) => ControlResponse::error(message),
    }
}

/// TCP listener for control commands.
pub struct ControlServer {
    listener: TcpListener,
    monitor: Arc<Monitor>,
}

impl ControlServer {
    /// Bind the control socket. Failure here is fatal for startup: the
    /// service has no value without control reachability.
    pub async fn bind(host: &str, port: u16, monitor: Arc<Monitor>) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind control socket on {host}:{port}"))?;
        info!("Control server listening on {}", listener.local_addr()?);
        Ok(Self { listener, monitor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Each connection is served by its own task.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Control connection from {peer}");
                    let monitor = self.monitor.clone();
                    tokio::spawn(handle_conn(stream, monitor));
                }
                Err(e) => {
                    warn!("Control accept failed: {e}");
                }
            }
        }
    }
}

async fn handle_conn(stream: TcpStream, monitor: Arc<Monitor>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }
    let response = dispatch_command(&line, &monitor).await;
    let mut payload = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"internal"}"#.to_string());
    payload.push('\n');
    let _ = write.write_all(payload.as_bytes()).await;
    let _ = write.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_commands_parse() {
        assert_eq!(
            parse_command(r#"{"cmd":"add_log","path":"/var/log/app.log"}"#).unwrap(),
            ControlCommand::AddLog {
                path: "/var/log/app.log".into()
            }
        );
        assert_eq!(parse_command(r#"{"cmd":"status"}"#).unwrap(), ControlCommand::Status);
        assert_eq!(parse_command(r#"{"cmd":"stop"}"#).unwrap(), ControlCommand::Stop);
    }

    #[test]
    fn test_unknown_tag_is_structured_error() {
        assert_eq!(parse_command(r#"{"cmd":"reboot"}"#).unwrap_err(), "unknown cmd");
        assert_eq!(parse_command("").unwrap_err(), "unknown cmd");
        assert_eq!(parse_command("not json").unwrap_err(), "unknown cmd");
    }

    #[test]
    fn test_missing_path_is_reported_as_such() {
        assert_eq!(
            parse_command(r#"{"cmd":"add_log"}"#).unwrap_err(),
            "missing path"
        );
        assert_eq!(
            parse_command(r#"{"cmd":"add_watch"}"#).unwrap_err(),
            "missing path"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(ControlResponse::error("unknown cmd")).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "unknown cmd");
    }
}
