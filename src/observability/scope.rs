//! Lifecycle scopes
//!
//! A scope logs `{NAME}_BEGIN` when opened and exactly one closing line:
//! `{NAME}_COMPLETE`, `{NAME}_FAILED`, or `{NAME}_INCOMPLETE` when it is
//! dropped unclosed. Fields given at open time are repeated on every line
//! so a single query's lines can be correlated.

use std::time::Instant;

use super::logger::{Logger, Severity};

/// Begin/complete logging around one execution
///
/// ```ignore
/// let scope = ObservationScope::with_fields("QUERY", &[("query_id", &id)]);
/// // ... execute ...
/// scope.complete_with_fields(&[("yielded", "3")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    fields: Vec<(&'a str, String)>,
    started: Instant,
    closed: bool,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Opens a scope whose fields are carried on every line it logs
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        let scope = Self {
            name,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
            closed: false,
        };
        scope.emit(Severity::Info, "BEGIN", &[]);
        scope
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Closes the scope successfully, adding `elapsed_us`
    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.closed = true;
        let elapsed = self.elapsed_us().to_string();
        let mut fields = extra.to_vec();
        fields.push(("elapsed_us", elapsed.as_str()));
        self.emit(Severity::Info, "COMPLETE", &fields);
    }

    /// Closes the scope as failed, at FATAL or ERROR
    pub fn fail(mut self, code: &str, reason: &str, fatal: bool) {
        self.closed = true;
        let severity = if fatal { Severity::Fatal } else { Severity::Error };
        self.emit(severity, "FAILED", &[("code", code), ("reason", reason)]);
    }

    pub fn is_completed(&self) -> bool {
        self.closed
    }

    pub fn elapsed_us(&self) -> u128 {
        self.started.elapsed().as_micros()
    }

    fn emit(&self, severity: Severity, phase: &str, extra: &[(&str, &str)]) {
        if !Logger::enabled(severity) {
            return;
        }
        let event = format!("{}_{}", self.name, phase);
        let mut fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.extend_from_slice(extra);
        Logger::log(severity, &event, &fields);
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.emit(
                Severity::Warn,
                "INCOMPLETE",
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}
