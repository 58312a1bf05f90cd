//! Error taxonomy for the extraction engine.
//!
//! Per-record failures (`Extraction`) are isolated by the assembler; everything
//! else is fatal to the current unit of work. `Blocked` carries its own
//! classification so the host can pause or back off the source instead of
//! retrying blindly.

use serde::{Deserialize, Serialize};

/// A validation error anchored to a location inside the checked value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathedError {
    /// Dotted path from the value root, e.g. `"reviews.3.rating"`. Empty for
    /// errors on the root itself.
    pub path: String,
    /// What failed at that path.
    pub message: String,
}

impl std::fmt::Display for PathedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All errors the engine can produce.
#[derive(thiserror::Error, Debug)]
pub enum GleanerError {
    /// Inbound unit-of-work parameters failed their schema. Fatal before any
    /// extraction begins.
    #[error("config validation failed: {}", format_errors(.errors))]
    ConfigValidation { errors: Vec<PathedError> },

    /// Content never satisfied the completion predicate within the bound.
    #[error("materialization timed out after {waited_ms}ms")]
    MaterializationTimeout { waited_ms: u64 },

    /// The change-notification subscription closed before content settled.
    #[error("watch interrupted: change subscription closed before settling")]
    WatchInterrupted,

    /// A required field's selector matched nothing. Fatal to the single
    /// record being built, not to the batch.
    #[error("extraction failed for field '{field}' (selector '{selector}')")]
    Extraction { field: String, selector: String },

    /// An anti-automation challenge was detected. Never retried internally.
    #[error("blocked by anti-automation challenge: {reason}")]
    Blocked { reason: String },

    /// The view-tree backend failed (browser gone, evaluate error, ...).
    #[error("view provider error: {0}")]
    Provider(String),

    /// Handing a work unit to the host scheduler failed.
    #[error("scheduler hand-off failed: {0}")]
    Schedule(String),
}

impl GleanerError {
    /// Shorthand for a required-field extraction failure.
    pub fn extraction(field: &str, selector: &str) -> Self {
        GleanerError::Extraction {
            field: field.to_string(),
            selector: selector.to_string(),
        }
    }

    /// Whether this error should stop continuation planning for the unit.
    ///
    /// Per-record extraction failures are recoverable (the assembler skips
    /// the record); everything else poisons the unit of work.
    pub fn is_fatal_to_unit(&self) -> bool {
        !matches!(self, GleanerError::Extraction { .. })
    }
}

fn format_errors(errors: &[PathedError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type GleanerResult<T> = Result<T, GleanerError>;
