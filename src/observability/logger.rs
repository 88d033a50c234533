//! Structured JSON logger
//!
//! Every event is written as a single JSON object on its own line. Field
//! keys are sorted so identical events render identically. Lines at ERROR
//! and above go to stderr, the rest to stdout, filtered by a process-wide
//! minimum severity.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Per-element detail (skips, kind filtering)
    Trace,
    Info,
    /// Degraded execution, e.g. a path fallback
    Warn,
    Error,
    /// Unrecoverable document or plan errors
    Fatal,
}

const LEVELS: [Severity; 5] = [
    Severity::Trace,
    Severity::Info,
    Severity::Warn,
    Severity::Error,
    Severity::Fatal,
];

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Process-wide JSON-lines logger
pub struct Logger;

impl Logger {
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        let level = MIN_SEVERITY.load(Ordering::Relaxed) as usize;
        LEVELS.get(level).copied().unwrap_or(Severity::Fatal)
    }

    /// Whether a line at `severity` would be written
    pub fn enabled(severity: Severity) -> bool {
        severity >= Self::min_severity()
    }

    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if !Self::enabled(severity) {
            return;
        }
        let line = render(severity, event, fields);
        if severity >= Severity::Error {
            write_line(&mut io::stderr().lock(), &line);
        } else {
            write_line(&mut io::stdout().lock(), &line);
        }
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }
}

/// Renders one JSON line; `event` and `severity` win over same-named fields
fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    let mut line = Map::new();
    for (key, value) in sorted {
        line.insert((*key).to_string(), Value::from(*value));
    }
    line.insert("event".to_string(), Value::from(event));
    line.insert("severity".to_string(), Value::from(severity.as_str()));

    let mut rendered = Value::Object(line).to_string();
    rendered.push('\n');
    rendered
}

fn write_line<W: Write>(writer: &mut W, line: &str) {
    // one write per line; a failing sink never fails the query
    let _ = writer.write_all(line.as_bytes());
    let _ = writer.flush();
}
