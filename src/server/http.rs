//! Minimal hand-rolled HTTP/1.1 status and stream server.
//!
//! A small fixed route table over raw TCP, no web framework. `/stream` is
//! the one long-lived route: a Server-Sent-Events feed that writes a `hello`
//! event on connect, frames broadcast events as `data:` messages, and emits
//! a comment heartbeat whenever 15 seconds pass without traffic so
//! intermediaries keep the connection open.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::assets;
use crate::monitor::Monitor;

/// Queue wait before a heartbeat comment is written.
const HEARTBEAT: Duration = Duration::from_secs(15);

/// Default and maximum entry counts for `/events`.
const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

/// Method and target of a request line, e.g. `("GET", "/status")`.
pub fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

/// `limit` query parameter of an `/events` target, bounded and defaulted.
pub fn parse_event_limit(target: &str) -> usize {
    let limit = target
        .split_once('?')
        .map(|(_, query)| query)
        .and_then(|query| {
            query.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (key == "limit").then(|| value.parse::<usize>().ok()).flatten()
            })
        })
        .unwrap_or(DEFAULT_EVENT_LIMIT);
    limit.min(MAX_EVENT_LIMIT)
}

/// HTTP listener for status, recent-event replay and the live stream.
pub struct HttpServer {
    listener: TcpListener,
    monitor: Arc<Monitor>,
}

impl HttpServer {
    /// Bind the HTTP listener. Failure here is fatal for startup.
    pub async fn bind(host: &str, port: u16, monitor: Arc<Monitor>) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind HTTP server on {host}:{port}"))?;
        info!("HTTP status server listening on {}", listener.local_addr()?);
        Ok(Self { listener, monitor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("HTTP connection from {peer}");
                    let monitor = self.monitor.clone();
                    tokio::spawn(handle_conn(stream, monitor));
                }
                Err(e) => {
                    warn!("HTTP accept failed: {e}");
                }
            }
        }
    }
}

async fn handle_conn(stream: TcpStream, monitor: Arc<Monitor>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut request_line = String::new();
    match reader.read_line(&mut request_line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }
    // Drain headers; the route table only needs the request line.
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => {}
        }
    }
    let Some((_method, target)) = parse_request_line(&request_line) else {
        return;
    };

    if target.starts_with("/status") {
        let snapshot = monitor.status().await;
        let body = json!({
            "ok": true,
            "dirs": snapshot.dirs,
            "logs": snapshot.logs,
            "events": snapshot.events,
            "lines": snapshot.lines,
        })
        .to_string();
        let _ = write_response(&mut write, "application/json", body.as_bytes()).await;
    } else if target.starts_with("/console.js") {
        let _ = write_response(
            &mut write,
            "application/javascript; charset=utf-8",
            assets::CONSOLE_JS.as_bytes(),
        )
        .await;
    } else if target.starts_with("/console.css") {
        let _ = write_response(
            &mut write,
            "text/css; charset=utf-8",
            assets::CONSOLE_CSS.as_bytes(),
        )
        .await;
    } else if target.starts_with("/events") {
        let limit = parse_event_limit(target);
        let entries = monitor.event_log().tail(limit);
        let body = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());
        let _ = write_response(&mut write, "application/json", body.as_bytes()).await;
    } else if target.starts_with("/stream") {
        serve_stream(&mut write, &monitor).await;
    } else if target.starts_with("/console") || target == "/" {
        let _ = write_response(
            &mut write,
            "text/html; charset=utf-8",
            assets::CONSOLE_HTML.as_bytes(),
        )
        .await;
    } else {
        let _ = write_response(&mut write, "text/plain; charset=utf-8", b"OK").await;
    }
    let _ = write.shutdown().await;
}

async fn write_response(
    write: &mut OwnedWriteHalf,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n",
        content_type,
        body.len()
    );
    write.write_all(headers.as_bytes()).await?;
    write.write_all(body).await
}

/// The SSE feed: unbounded lifetime, ended only by a write failure or the
/// client going away. The subscription is removed on every exit path.
async fn serve_stream(write: &mut OwnedWriteHalf, monitor: &Monitor) {
    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nAccess-Control-Allow-Origin: *\r\n\r\n";
    if write.write_all(headers.as_bytes()).await.is_err() {
        return;
    }
    let sub = monitor.broadcaster().add_subscriber().await;
    let id = sub.id();
    if write.write_all(b"event: hello\ndata: {}\n\n").await.is_err() {
        monitor.broadcaster().remove_subscriber(id).await;
        return;
    }
    loop {
        match timeout(HEARTBEAT, sub.recv()).await {
            Ok(event) => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping unserializable stream event: {e}");
                        continue;
                    }
                };
                let frame = format!("data: {payload}\n\n");
                if write.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
            Err(_elapsed) => {
                if write.write_all(b": keep-alive\n\n").await.is_err() {
                    break;
                }
            }
        }
    }
    monitor.broadcaster().remove_subscriber(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        assert_eq!(
            parse_request_line("GET /status HTTP/1.1\r\n"),
            Some(("GET", "/status"))
        );
        assert_eq!(parse_request_line("\r\n"), None);
    }

    #[test]
    fn test_event_limit_default_and_bounds() {
        assert_eq!(parse_event_limit("/events"), DEFAULT_EVENT_LIMIT);
        assert_eq!(parse_event_limit("/events?limit=5"), 5);
        assert_eq!(parse_event_limit("/events?limit=junk"), DEFAULT_EVENT_LIMIT);
        assert_eq!(parse_event_limit("/events?limit=999999"), MAX_EVENT_LIMIT);
        assert_eq!(parse_event_limit("/events?foo=1&limit=7"), 7);
    }
}
