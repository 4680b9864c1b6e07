//! Structured JSONL diagnostics.
//!
//! Every message this workspace prints (error reports, leak dumps, harness
//! results) goes through a [`LogEntry`] serialized as one JSON object per line.
//!
//! - [`LogEntry`]: record with required `timestamp`, `seq`, `level`, `event`.
//! - [`LogEmitter`]: writes entries to stderr, a file or an in-memory buffer.
//! - [`validate_log_line`]: schema check for a single line.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

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
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

/// Process-wide sequence so interleaved emitters still order globally.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Structured log record.
///
/// Required fields: `timestamp`, `seq`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub seq: u64,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form payload (stats snapshots, leak tables, scenario results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create an entry with required fields only.
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            level,
            event: event.into(),
            function: None,
            file: None,
            line: None,
            message: None,
            details: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, function: &str, file: &str, line: u32) -> Self {
        if !function.is_empty() {
            self.function = Some(function.to_string());
        }
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
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

/// Writes [`LogEntry`] lines to a sink.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    emitted: u64,
}

impl LogEmitter {
    /// Emitter writing to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            emitted: 0,
        }
    }

    /// Emitter writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
            emitted: 0,
        }
    }

    /// Emitter appending to a file (created if missing).
    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(std::io::BufWriter::new(file)),
            emitted: 0,
        })
    }

    /// Emitter writing into a caller-supplied sink (tests, in-memory capture).
    #[must_use]
    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        Self { writer, emitted: 0 }
    }

    /// Emit a simple event with an optional message.
    pub fn emit(
        &mut self,
        level: LogLevel,
        event: &str,
        message: Option<&str>,
    ) -> std::io::Result<()> {
        let mut entry = LogEntry::new(level, event);
        if let Some(message) = message {
            entry = entry.with_message(message);
        }
        self.emit_entry(&entry)
    }

    /// Emit a fully built entry.
    pub fn emit_entry(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.emitted += 1;
        Ok(())
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

/// Validate one JSONL line against the entry schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![error("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![error("<root>", "expected JSON object".to_string())]);
    };

    for field in ["timestamp", "seq", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(error(field, "required field missing".to_string()));
        }
    }
    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error", "fatal"].contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(value).map_err(|e| vec![error("<schema>", e.to_string())])
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub(crate) fn now_utc() -> String {
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

/// Days since 1970-01-01 to a proleptic Gregorian date.
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

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn entry_serializes_required_fields_only() {
        let entry = LogEntry::new(LogLevel::Info, "alloc");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "alloc");
        assert!(parsed.get("function").is_none());
        assert!(parsed.get("details").is_none());
    }

    #[test]
    fn location_and_message_round_trip_through_validation() {
        let entry = LogEntry::new(LogLevel::Error, "memory.error")
            .with_location("free", "src/engine.rs", 42)
            .with_message("null pointer");
        let line = entry.to_jsonl().unwrap();
        let parsed = validate_log_line(&line, 1).expect("valid line");
        assert_eq!(parsed.function.as_deref(), Some("free"));
        assert_eq!(parsed.line, Some(42));
        assert_eq!(parsed.message.as_deref(), Some("null pointer"));
    }

    #[test]
    fn validation_reports_missing_fields_and_bad_level() {
        let errs = validate_log_line(r#"{"level":"loud"}"#, 7).unwrap_err();
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"timestamp"));
        assert!(fields.contains(&"event"));
        assert!(fields.contains(&"level"));
        assert!(errs.iter().all(|e| e.line_number == 7));

        let errs = validate_log_line("not json", 1).unwrap_err();
        assert_eq!(errs[0].field, "<json>");
    }

    #[test]
    fn emitter_writes_one_line_per_entry() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = LogEmitter::to_writer(Box::new(SharedBuf(Arc::clone(&buf))));
        emitter.emit(LogLevel::Warn, "stats", Some("usage high")).unwrap();
        emitter
            .emit_entry(&LogEntry::new(LogLevel::Info, "done"))
            .unwrap();
        emitter.flush().unwrap();
        assert_eq!(emitter.emitted(), 2);

        let text = String::from_utf8(buf.lock().clone()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for (i, line) in lines.iter().enumerate() {
            assert!(validate_log_line(line, i + 1).is_ok());
        }
    }

    #[test]
    fn sequence_numbers_increase() {
        let a = LogEntry::new(LogLevel::Debug, "a");
        let b = LogEntry::new(LogLevel::Debug, "b");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }
}
