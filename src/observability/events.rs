//! Observable query execution events
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events emitted while executing queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Plan lifecycle
    /// Plan failed validation before any reading began
    PlanRejected,
    /// Path expression classified for an executor instance
    PathClassified,

    // Execution routing
    /// Plan needs a global view; elements are buffered
    Materialization,
    /// Wildcard before the terminal segment; branches collected depth-first
    PathBranchCollection,
    /// Direct navigation failed and the tree route took over
    PathFallback,
    /// Advanced path handed to the external evaluator
    AdvancedPathDelegated,

    // Per-element
    /// Element skipped because its shape did not match the source type
    ElementSkipped,

    // Termination
    /// Bound satisfied; reading stopped early
    EarlyTermination,
    /// Reader dropped at the end of an execution call
    ReaderReleased,
    /// Execution cancelled at an element boundary
    QueryCancelled,
    /// Document could not be parsed (FATAL)
    DocumentParseFailed,
}

impl Event {
    /// Returns the string representation used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PlanRejected => "PLAN_REJECTED",
            Event::PathClassified => "PATH_CLASSIFIED",
            Event::Materialization => "MATERIALIZATION",
            Event::PathBranchCollection => "PATH_BRANCH_COLLECTION",
            Event::PathFallback => "PATH_FALLBACK",
            Event::AdvancedPathDelegated => "ADVANCED_PATH_DELEGATED",
            Event::ElementSkipped => "ELEMENT_SKIPPED",
            Event::EarlyTermination => "EARLY_TERMINATION",
            Event::ReaderReleased => "READER_RELEASED",
            Event::QueryCancelled => "QUERY_CANCELLED",
            Event::DocumentParseFailed => "DOCUMENT_PARSE_FAILED",
        }
    }

    /// Returns true if this event aborts the query
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::DocumentParseFailed)
    }

    /// Returns true for high-volume events logged below INFO
    pub fn is_per_element(&self) -> bool {
        matches!(self, Event::ElementSkipped | Event::ReaderReleased)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
