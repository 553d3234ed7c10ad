//! Audit records for access decisions and upstream failures.
//!
//! # Responsibilities
//! - Define the audit event payload
//! - Route each event to the attempts log (denials) or the error log
//!   (errors, warnings, lifecycle notices)
//! - Append JSON lines without blocking request tasks, through a bounded
//!   queue that drops (and counts) events when the writer falls behind
//!
//! # Design Decisions
//! - The sink is a trait so deployments can ship events elsewhere
//! - File sink uses a single writer task per process, so concurrent
//!   appends never interleave

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// File name for access denials.
pub const ATTEMPT_LOG: &str = "attempts.log";
/// File name for errors, warnings and lifecycle notices.
pub const ERROR_LOG: &str = "errors.log";

/// Severity of a non-decision event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Which log an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLog {
    Attempts,
    Errors,
}

/// One structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(rename = "clientIp", skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "connectHost", skip_serializing_if = "Option::is_none")]
    pub connect_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl AuditEvent {
    fn blank() -> Self {
        Self {
            ts: Utc::now(),
            action: None,
            reason: None,
            level: None,
            msg: None,
            request_id: None,
            client_ip: None,
            method: None,
            url: None,
            connect_host: None,
            route: None,
            user_id: None,
            dest: None,
            error: None,
            missing: Vec::new(),
            port: None,
        }
    }

    /// An access denial with the given reason code.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            action: Some("denied"),
            reason: Some(reason.into()),
            ..Self::blank()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::logged(Level::Error, msg)
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self::logged(Level::Warning, msg)
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self::logged(Level::Info, msg)
    }

    fn logged(level: Level, msg: impl Into<String>) -> Self {
        Self {
            level: Some(level),
            msg: Some(msg.into()),
            ..Self::blank()
        }
    }

    pub fn request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn client(mut self, addr: SocketAddr) -> Self {
        self.client_ip = Some(addr.ip().to_string());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn connect_host(mut self, target: impl Into<String>) -> Self {
        self.connect_host = Some(target.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn maybe_route(mut self, route: Option<&str>) -> Self {
        self.route = route.map(str::to_string);
        self
    }

    pub fn user(mut self, user: Option<&str>) -> Self {
        self.user_id = user.map(str::to_string);
        self
    }

    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn cause(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn missing(mut self, missing: Vec<String>) -> Self {
        self.missing = missing;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Reason code for denials, message code otherwise.
    pub fn code(&self) -> &str {
        self.reason
            .as_deref()
            .or(self.msg.as_deref())
            .unwrap_or_default()
    }

    pub fn log(&self) -> AuditLog {
        if self.action.is_some() {
            AuditLog::Attempts
        } else {
            AuditLog::Errors
        }
    }
}

/// Destination for audit events.
///
/// Implementations must be cheap to call from request tasks and safe
/// under concurrent use.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: AuditEvent);
}

/// Events queued for the file writer before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Appends events as JSON lines to `attempts.log` / `errors.log`.
///
/// Recording never waits: when the writer falls behind and the queue is
/// full, the event is dropped and counted.
pub struct JsonLinesSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl JsonLinesSink {
    /// Create the log directory and spawn the writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::with_capacity(dir, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(dir: impl AsRef<Path>, capacity: usize) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_loop(dir, rx));
        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Events dropped because the queue was full or the writer stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for JsonLinesSink {
    fn record(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                super::metrics::record_audit_dropped();
                tracing::warn!(code = event.code(), "Audit queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Audit writer stopped, dropping event");
            }
        }
    }
}

/// Open append handles, one per log file.
struct LogFiles {
    dir: PathBuf,
    attempts: Option<File>,
    errors: Option<File>,
}

impl LogFiles {
    async fn get(&mut self, log: AuditLog) -> std::io::Result<&mut File> {
        let (slot, name) = match log {
            AuditLog::Attempts => (&mut self.attempts, ATTEMPT_LOG),
            AuditLog::Errors => (&mut self.errors, ERROR_LOG),
        };
        if slot.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(name))
                .await?;
            *slot = Some(file);
        }
        slot.as_mut()
            .ok_or_else(|| std::io::Error::other("log file not open"))
    }

    /// Forget a handle after a failed write so the next event reopens it.
    fn reset(&mut self, log: AuditLog) {
        match log {
            AuditLog::Attempts => self.attempts = None,
            AuditLog::Errors => self.errors = None,
        }
    }
}

async fn write_loop(dir: PathBuf, mut rx: mpsc::Receiver<AuditEvent>) {
    let mut files = LogFiles {
        dir,
        attempts: None,
        errors: None,
    };

    while let Some(event) = rx.recv().await {
        let log = event.log();
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = append(&mut files, log, &line).await {
            tracing::error!(log = ?log, error = %e, "Log write error");
            files.reset(log);
        }
    }
}

async fn append(files: &mut LogFiles, log: AuditLog, line: &[u8]) -> std::io::Result<()> {
    let file = files.get(log).await?;
    file.write_all(line).await?;
    file.flush().await
}

/// Mirrors audit events into the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: AuditEvent) {
        let code = event.code();
        let route = event.route.as_deref().unwrap_or("-");
        let user = event.user_id.as_deref().unwrap_or("-");
        let client = event.client_ip.as_deref().unwrap_or("-");

        match (event.action, event.level) {
            (Some(_), _) => tracing::warn!(reason = code, route, user, client, "Request denied"),
            (None, Some(Level::Error)) => tracing::error!(
                msg = code,
                route,
                user,
                client,
                error = event.error.as_deref().unwrap_or("-"),
                "Proxy error"
            ),
            (None, Some(Level::Warning)) => tracing::warn!(msg = code, route, "Proxy warning"),
            _ => tracing::info!(msg = code, "Proxy notice"),
        }
    }
}

/// Keeps events in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

/// Sends every event to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutSink {
    fn record(&self, event: AuditEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}
