// Vigil CLI: run the monitor, or drive a running one over its control socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil::actions::ToolRegistry;
use vigil::monitor::Monitor;
use vigil::server::{ControlCommand, ControlServer, HttpServer};
use vigil::state;

#[derive(Parser)]
#[command(
    name = "vigil",
    version,
    about = "Vigil: file/log activity monitor with rule-triggered actions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor in single-project mode
    Start {
        /// Project directory to run in (defaults to the current directory)
        #[arg(long)]
        dir: Option<String>,
        /// Log file to tail (repeatable)
        #[arg(long)]
        log: Vec<String>,
        /// Control server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Control server port
        #[arg(long, default_value_t = 8765)]
        port: u16,
        /// Polling interval in seconds
        #[arg(long, default_value_t = 1.0)]
        poll: f64,
        /// Expose the HTTP status/stream server
        #[arg(long)]
        http: bool,
        /// HTTP status port when --http is enabled
        #[arg(long, default_value_t = 8766)]
        http_port: u16,
        /// Skip .gitignore bookkeeping
        #[arg(long)]
        no_gitignore: bool,
    },
    /// Add a log file to tail in the running monitor
    AddLog {
        path: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
    /// Add a directory to watch for file changes in the running monitor
    AddWatch {
        path: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
    /// Get current monitor status: watched dirs/logs and counters
    Status {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
    /// Ask the running monitor to stop gracefully
    Stop {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Start {
            dir,
            log,
            host,
            port,
            poll,
            http,
            http_port,
            no_gitignore,
        } => start(dir, log, host, port, poll, http, http_port, no_gitignore).await,
        Command::AddLog { path, host, port } => {
            let path = expand_path(&path);
            send_command(&ControlCommand::AddLog { path }, &host, port).await
        }
        Command::AddWatch { path, host, port } => {
            let path = expand_path(&path);
            send_command(&ControlCommand::AddWatch { path }, &host, port).await
        }
        Command::Status { host, port } => send_command(&ControlCommand::Status, &host, port).await,
        Command::Stop { host, port } => send_command(&ControlCommand::Stop, &host, port).await,
    }
}

fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

#[allow(clippy::too_many_arguments)]
async fn start(
    dir: Option<String>,
    logs: Vec<String>,
    host: String,
    port: u16,
    poll: f64,
    http: bool,
    http_port: u16,
    no_gitignore: bool,
) -> Result<()> {
    let project = match dir {
        Some(dir) => PathBuf::from(expand_path(&dir)),
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let state_dir = state::resolve_state_dir(&project)?;
    let _log_guards = init_tracing(&state_dir);

    if state::is_git_repo(&project) && !no_gitignore {
        match state::add_to_gitignore(&project, state::STATE_DIR_NAME) {
            Ok(true) => info!("Added {} to .gitignore", state::STATE_DIR_NAME),
            Ok(false) => {}
            Err(e) => info!("Skipping .gitignore update: {e}"),
        }
    }

    let monitor = Monitor::new(
        Duration::from_secs_f64(poll),
        state_dir,
        ToolRegistry::with_builtins(),
    )?;

    // Bind before watching anything: a dead control socket makes the
    // service unreachable, so it aborts startup.
    let control = ControlServer::bind(&host, port, monitor.clone()).await?;
    let http_server = if http {
        Some(HttpServer::bind(&host, http_port, monitor.clone()).await?)
    } else {
        None
    };

    monitor.add_watch(&project.to_string_lossy()).await;
    for log in &logs {
        monitor.add_log(&expand_path(log)).await;
    }

    tokio::spawn(control.run());
    if let Some(server) = http_server {
        tokio::spawn(server.run());
    }

    let mut message = format!("Monitor running. Control server on {host}:{port}.");
    if http {
        message.push_str(&format!(" HTTP status on http://{host}:{http_port}/status."));
    }
    message.push_str(" Press Ctrl-C to stop.");
    println!("{message}");

    run_until_shutdown(&monitor).await;
    println!("Monitor stopped.");
    Ok(())
}

async fn run_until_shutdown(monitor: &Arc<Monitor>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            monitor.stop().await;
        }
        _ = monitor.wait_shutdown() => {}
    }
}

/// Console plus daily-rolling file output under `<state>/logs/`.
fn init_tracing(
    state_dir: &std::path::Path,
) -> (non_blocking::WorkerGuard, non_blocking::WorkerGuard) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("vigil=info"))
        .unwrap();

    let logs_dir = state_dir.join("logs");
    std::fs::create_dir_all(&logs_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create logs directory: {e}");
    });

    let file_appender = rolling::daily(&logs_dir, "vigil.log");
    let (non_blocking_file, file_guard) = non_blocking(file_appender);
    let (non_blocking_console, console_guard) = non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking_console)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_ansi(false),
        )
        .init();

    (file_guard, console_guard)
}

/// Send one command over the control socket and print the JSON reply.
async fn send_command(cmd: &ControlCommand, host: &str, port: u16) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("Cannot reach monitor control socket on {host}:{port}"))?;
    let (read, mut write) = stream.into_split();
    let mut line = serde_json::to_string(cmd)?;
    line.push('\n');
    write.write_all(line.as_bytes()).await?;
    write.shutdown().await?;

    let mut reader = BufReader::new(read);
    let mut response = String::new();
    reader.read_line(&mut response).await?;
    match serde_json::from_str::<serde_json::Value>(&response) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.trim_end()),
    }
    Ok(())
}
