//! Structured JSONL logging for copy runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, an arbitrary writer, memory
//!   (tests), or nowhere.
//!
//! Required fields are `timestamp`, `trace_id`, `level` and `event`. Trace ids
//! have the shape `<component>::<run_id>::<seq>`.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Run outcome attached to terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// Canonical structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Bytes per read chosen by the advisor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_size: Option<usize>,
    /// Buffer alignment in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            policy: None,
            path: None,
            transfer_size: None,
            alignment: None,
            bytes: None,
            outcome: None,
            error_kind: None,
            errno: None,
            exit_code: None,
            duration_ms: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_transfer_size(mut self, size: usize) -> Self {
        self.transfer_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Attach an error kind and, when present, its errno.
    #[must_use]
    pub fn with_error(mut self, kind: impl Into<String>, errno: Option<i32>) -> Self {
        self.error_kind = Some(kind.into());
        self.errno = errno;
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

enum Target {
    Disabled,
    Writer(Box<dyn Write>),
    Memory(Vec<u8>),
}

type WarningHook = Box<dyn FnMut(&LogEntry)>;

/// Writes [`LogEntry`] records as JSONL with sequential trace ids.
pub struct LogEmitter {
    target: Target,
    seq: u64,
    component: String,
    run_id: String,
    on_warning: Option<WarningHook>,
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target {
            Target::Disabled => "disabled",
            Target::Writer(_) => "writer",
            Target::Memory(_) => "memory",
        };
        f.debug_struct("LogEmitter")
            .field("target", &target)
            .field("seq", &self.seq)
            .field("component", &self.component)
            .field("run_id", &self.run_id)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

impl LogEmitter {
    /// Emitter that drops every record.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_target(Target::Disabled, "pagecat", "run")
    }

    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, component: &str, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(
            Box::new(std::io::BufWriter::new(file)),
            component,
            run_id,
        ))
    }

    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, component: &str, run_id: &str) -> Self {
        Self::with_target(Target::Writer(writer), component, run_id)
    }

    /// Create an emitter that keeps records in memory (for testing).
    #[must_use]
    pub fn to_buffer(component: &str, run_id: &str) -> Self {
        Self::with_target(Target::Memory(Vec::new()), component, run_id)
    }

    fn with_target(target: Target, component: &str, run_id: &str) -> Self {
        Self {
            target,
            seq: 0,
            component: component.to_string(),
            run_id: run_id.to_string(),
            on_warning: None,
        }
    }

    /// Call `hook` for every warn-level record passed to [`record`](Self::record),
    /// whatever the target. Disabled emitters still invoke it.
    #[must_use]
    pub fn on_warning(mut self, hook: impl FnMut(&LogEntry) + 'static) -> Self {
        self.on_warning = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.target, Target::Disabled)
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.component, self.run_id, self.seq)
    }

    /// Start an entry with the next trace id.
    pub fn entry(&mut self, level: LogLevel, event: &str) -> LogEntry {
        let trace_id = self.next_trace_id();
        LogEntry::new(trace_id, level, event)
    }

    /// Emit a fully-populated log entry.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        match &mut self.target {
            Target::Disabled => Ok(()),
            Target::Writer(w) => writeln!(w, "{line}"),
            Target::Memory(buf) => writeln!(buf, "{line}"),
        }
    }

    /// Emit an entry and swallow I/O failures; logging never fails a copy.
    pub fn record(&mut self, entry: LogEntry) {
        if entry.level == LogLevel::Warn {
            if let Some(hook) = self.on_warning.as_mut() {
                hook(&entry);
            }
        }
        let _ = self.emit_entry(entry);
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.target {
            Target::Writer(w) => w.flush(),
            Target::Disabled | Target::Memory(_) => Ok(()),
        }
    }

    /// Records captured by a [`to_buffer`](Self::to_buffer) emitter.
    #[must_use]
    pub fn captured(&self) -> Vec<LogEntry> {
        match &self.target {
            Target::Memory(buf) => String::from_utf8_lossy(buf)
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect(),
            Target::Disabled | Target::Writer(_) => Vec::new(),
        }
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
