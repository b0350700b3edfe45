//! Structured JSONL log sink, bound per-session.
//!
//! `tracing` drives in-process diagnostics; this module additionally fans
//! every record out to a per-session `logs/session.jsonl` file and an
//! in-memory subscriber queue (the shape a future SSE façade would drain),
//! via a bounded channel with a drop-oldest overflow policy so a slow
//! consumer can never block a producer.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Matches the wire-level severities in spec §6's log record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

/// One JSONL record. `extra` carries `agent`, `node`, `session_id`,
/// `event_type`, and any event-specific fields — never interpolated into
/// `message`, so LLM-derived text can never corrupt a format string (spec
/// §4.2, §9: "escape before formatting").
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub time: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
    pub extra: Value,
}

/// Queue capacity before the drop-oldest policy kicks in.
const QUEUE_CAPACITY: usize = 1000;

/// A session-bound log sink: writes JSONL to disk and fans out to any
/// attached subscriber queue. Cheap to clone (`Arc` inside); every agent
/// task holds a clone.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    session_id: String,
    agent: String,
    file_tx: mpsc::Sender<LogRecord>,
    dropped: AtomicU64,
}

impl LogSink {
    /// Spawn the background writer task that owns the session's log file
    /// and drains `file_tx`. Returns the sink handle; dropping every clone
    /// of it closes the channel and lets the writer task exit.
    pub fn spawn(session_id: impl Into<String>, agent: impl Into<String>, log_path: std::path::PathBuf) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .await;

            let mut file = match file {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(path = %log_path.display(), error = %e, "failed to open session log file");
                    return;
                }
            };

            while let Some(record) = rx.recv().await {
                if let Ok(mut line) = serde_json::to_vec(&record) {
                    line.push(b'\n');
                    if let Err(e) = file.write_all(&line).await {
                        tracing::error!(error = %e, "failed to write log record");
                    }
                }
            }
        });

        Self {
            inner: Arc::new(SinkInner {
                session_id: session_id.into(),
                agent: agent.into(),
                file_tx: tx,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// A sink bound to no file, for unit tests and dry runs; records are
    /// only forwarded to `tracing`.
    pub fn noop(session_id: impl Into<String>, agent: impl Into<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(QUEUE_CAPACITY);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Self {
            inner: Arc::new(SinkInner {
                session_id: session_id.into(),
                agent: agent.into(),
                file_tx: tx,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// A sink scoped to a different node/agent label, sharing the same
    /// underlying writer — used when a ReAct mission logs under its own
    /// `node` name while still writing to the parent session file.
    pub fn for_agent(&self, agent: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                session_id: self.inner.session_id.clone(),
                agent: agent.into(),
                file_tx: self.inner.file_tx.clone(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn log(&self, level: LogLevel, node: &str, message: impl Into<String>, event_type: Option<&str>, fields: Value) {
        let message = message.into();

        let mut extra = serde_json::json!({
            "agent": self.inner.agent,
            "node": node,
            "session_id": self.inner.session_id,
        });
        if let Some(event_type) = event_type {
            extra["event_type"] = Value::String(event_type.to_string());
        }
        if let Value::Object(fields) = fields {
            if let Value::Object(extra_obj) = &mut extra {
                extra_obj.extend(fields);
            }
        }

        match level {
            LogLevel::Trace => tracing::trace!(node, message = %message),
            LogLevel::Debug => tracing::debug!(node, message = %message),
            LogLevel::Info | LogLevel::Success => tracing::info!(node, message = %message),
            LogLevel::Warning => tracing::warn!(node, message = %message),
            LogLevel::Error | LogLevel::Critical => tracing::error!(node, message = %message),
        }

        let record = LogRecord {
            time: chrono::Utc::now(),
            level,
            message,
            extra,
        };

        // Drop-oldest: a full channel means try_send fails immediately;
        // producers never await a slow consumer.
        if self.inner.file_tx.try_send(record).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn info(&self, node: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, node, message, None, Value::Null);
    }

    pub fn event(&self, node: &str, event_type: &str, fields: Value) {
        self.log(LogLevel::Info, node, event_type, Some(event_type), fields);
    }

    pub fn warn(&self, node: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, node, message, None, Value::Null);
    }

    pub fn error(&self, node: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, node, message, None, Value::Null);
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }
}
