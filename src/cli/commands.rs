//! CLI command implementations
//!
//! `init` prepares a binlog directory, `serve` runs a stream node and
//! `tail` is a thin consumer that prints events as JSON lines.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

use crate::binlog::{Binlog, BinlogResult, BinlogWriter, DEFAULT_MAX_SEGMENT_BYTES};
use crate::dispatcher::{StreamServer, StreamServerConfig, UpdateStreamConnection};
use crate::http_server::{HttpServer, HttpServerConfig};
use crate::observability::{log_event, log_event_with_fields, Event as LogEvent, Logger};
use crate::updatestream::{Event, NodeRole, UpdateStreamControl, UpdateStreamService};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_requests, write_error, write_json, write_response};

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binlog directory (required)
    pub binlog_dir: String,

    /// Stream server host (optional, default "0.0.0.0")
    #[serde(default = "default_stream_host")]
    pub stream_host: String,

    /// Stream server port (optional, default 4000)
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// HTTP status server
    #[serde(default)]
    pub http: HttpServerConfig,

    /// Role the node starts in (optional, default "spare")
    #[serde(default = "default_initial_role")]
    pub initial_role: String,

    /// Heartbeat interval on stream connections (optional, default 30)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Segment size that triggers rotation (optional, default 1GB)
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,
}

fn default_stream_host() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    4000
}
fn default_initial_role() -> String {
    "spare".to_string()
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_max_segment_bytes() -> u64 {
    DEFAULT_MAX_SEGMENT_BYTES
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        let path = path.display().to_string();
        log_event_with_fields(LogEvent::ConfigLoaded, &[("path", path.as_str())]);
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.binlog_dir.trim().is_empty() {
            return Err(CliError::config_error("binlog_dir must not be empty"));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(CliError::config_error("heartbeat_interval_secs must be > 0"));
        }

        if self.max_segment_bytes == 0 {
            return Err(CliError::config_error("max_segment_bytes must be > 0"));
        }

        self.role()?;
        Ok(())
    }

    /// Get binlog directory as Path
    pub fn binlog_path(&self) -> &Path {
        Path::new(&self.binlog_dir)
    }

    /// Role the controller starts in.
    pub fn role(&self) -> CliResult<NodeRole> {
        self.initial_role
            .parse()
            .map_err(|e: String| CliError::config_error(format!("Invalid initial_role: {}", e)))
    }

    pub fn stream_server_config(&self) -> StreamServerConfig {
        StreamServerConfig {
            bind_addr: format!("{}:{}", self.stream_host, self.stream_port),
            heartbeat_interval_secs: self.heartbeat_interval_secs,
        }
    }
}

/// A write fed to `serve` on stdin, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IngestRequest {
    /// `{"op":"commit","statements":["insert ...", ...]}`
    Commit { statements: Vec<String> },
    /// `{"op":"ddl","sql":"create table ..."}`
    Ddl { sql: String },
    /// `{"op":"rotate"}`
    Rotate,
    /// `{"op":"purge","before":"binlog.000003"}`
    Purge { before: String },
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Serve { config } => serve(&config),
        Command::Tail {
            url,
            position,
            count,
        } => tail(&url, &position, count),
    }
}

/// Create the binlog directory and its genesis segment.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let dir = config.binlog_path();

    if is_initialized(dir) {
        return Err(CliError::already_initialized());
    }

    let binlog = Binlog::create(dir)?;
    write_response(json!({
        "initialized": true,
        "head": binlog.head(),
    }))?;

    Ok(())
}

/// Run a stream node.
///
/// Opens the binlog, starts the update stream controller at the configured
/// role, then serves the WebSocket stream and the HTTP status endpoints.
/// Writes arrive as `IngestRequest` lines on stdin. Runs until Ctrl-C.
pub fn serve(config_path: &Path) -> CliResult<()> {
    log_event(LogEvent::BootStart);
    let config = Config::load(config_path)?;

    if !is_initialized(config.binlog_path()) {
        return Err(CliError::not_initialized());
    }
    let binlog = Binlog::open(config.binlog_path())?;
    let writer = binlog
        .writer()?
        .with_max_segment_bytes(config.max_segment_bytes);

    let rt = runtime()?;
    let result = rt.block_on(run_node(config, binlog, writer));

    // The stdin reader may still be blocked in a read
    rt.shutdown_background();
    result
}

async fn run_node(config: Config, binlog: Arc<Binlog>, writer: BinlogWriter) -> CliResult<()> {
    let control = Arc::new(UpdateStreamControl::with_role(config.role()?));
    let service = UpdateStreamService::new(binlog, control);

    let stream_server = Arc::new(
        StreamServer::bind(config.stream_server_config(), service.clone())
            .await
            .map_err(|e| CliError::boot_failed(format!("Stream server failed: {}", e)))?,
    );
    let http_server = HttpServer::new(config.http.clone(), service)
        .bind()
        .await
        .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let http_task = tokio::spawn(http_server.serve(shutdown_tx.subscribe()));
    let stream_task = {
        let server = Arc::clone(&stream_server);
        tokio::spawn(async move { server.run().await })
    };
    tokio::task::spawn_blocking(move || {
        if let Err(e) = ingest(writer) {
            Logger::error("INGEST_FAILED", &[("error", e.to_string().as_str())]);
        }
    });

    log_event(LogEvent::BootComplete);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::io_error(format!("Failed to wait for Ctrl-C: {}", e)))?;

    log_event(LogEvent::ShutdownStart);
    stream_server.shutdown();
    let _ = shutdown_tx.send(());

    stream_task
        .await
        .map_err(|e| CliError::boot_failed(e.to_string()))?
        .map_err(|e| CliError::boot_failed(format!("Stream server failed: {}", e)))?;
    http_task
        .await
        .map_err(|e| CliError::boot_failed(e.to_string()))?
        .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))?;

    log_event(LogEvent::ShutdownComplete);
    Ok(())
}

/// Applies stdin writes until EOF.
///
/// Malformed lines and non-fatal binlog errors are reported on stdout and
/// skipped; a fatal binlog error stops ingestion.
fn ingest(mut writer: BinlogWriter) -> CliResult<()> {
    for request in read_requests() {
        let parsed = request
            .and_then(|value| serde_json::from_value::<IngestRequest>(value).map_err(CliError::from));
        let request = match parsed {
            Ok(request) => request,
            Err(e) => {
                write_error(e.code_str(), e.message())?;
                continue;
            }
        };

        match apply_ingest(&mut writer, request) {
            Ok(data) => write_response(data)?,
            Err(e) => {
                write_error(e.code().code(), e.message())?;
                if e.is_fatal() {
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

/// Applies one ingest request to the binlog.
pub fn apply_ingest(writer: &mut BinlogWriter, request: IngestRequest) -> BinlogResult<Value> {
    match request {
        IngestRequest::Commit { statements } => {
            let group_id = writer.commit_transaction(&statements)?;
            Ok(json!({ "group_id": group_id }))
        }
        IngestRequest::Ddl { sql } => {
            let group_id = writer.execute_ddl(&sql)?;
            Ok(json!({ "group_id": group_id }))
        }
        IngestRequest::Rotate => {
            let segment = writer.rotate()?;
            Ok(json!({ "segment": segment }))
        }
        IngestRequest::Purge { before } => {
            let purged = writer.purge_before(&before)?;
            Ok(json!({ "purged": purged }))
        }
    }
}

/// Stream events from a node and print them, one JSON object per line.
///
/// Stops after `count` events when given. A terminal `ERR` event is printed
/// and then reported as the command's error.
pub fn tail(url: &str, position: &str, count: Option<usize>) -> CliResult<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let mut conn = UpdateStreamConnection::dial(url).await?;
        let mut event = conn.stream_start(position).await?;
        let mut printed = 0;

        loop {
            write_json(&event)?;
            printed += 1;

            if let Event::Error { message } = &event {
                return Err(CliError::stream_failed(message.clone()));
            }
            if count.is_some_and(|n| printed >= n) {
                break;
            }
            event = conn.stream_next().await?;
        }

        conn.close().await?;
        Ok::<(), CliError>(())
    })
}

fn runtime() -> CliResult<Runtime> {
    Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

fn is_initialized(dir: &Path) -> bool {
    dir.is_dir() && Binlog::open(dir).is_ok()
}
