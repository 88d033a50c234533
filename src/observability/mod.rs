//! Observability for query execution
//!
//! - Structured logging (JSON lines)
//! - Counter metrics
//! - Lifecycle scopes per execution
//!
//! Observability is read-only: it never changes what a query returns.
//!
//! ```ignore
//! use aerostream::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::EarlyTermination, &[("yielded", "10")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
///
/// Fatal events go out at FATAL, per-element events at TRACE, the rest at INFO.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else if event.is_per_element() {
        Severity::Trace
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

/// Log a lifecycle event that signals degraded execution
pub fn warn_event(event: Event, fields: &[(&str, &str)]) {
    Logger::warn(event.as_str(), fields);
}
