//! # Streaming Error Taxonomy
//!
//! One fatal variant (`Analysis`) and three per-asset variants that are
//! isolated to the failing asset: the plan keeps loading around them.
//!
//! Errors are `Clone` so a deduplicated in-flight load can hand the same
//! failure to every caller awaiting it.

use thiserror::Error;

/// Errors produced by the streaming pipeline.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Scene description malformed. Fatal: aborts plan creation before
    /// any loading begins. No partial analysis is attempted.
    #[error("scene analysis failed: {0}")]
    Analysis(String),

    /// Byte retrieval failed for one asset.
    #[error("fetch failed for '{locator}': {reason}")]
    Fetch { locator: String, reason: String },

    /// A single load attempt exceeded its time budget.
    #[error("load of '{locator}' timed out after {secs}s")]
    Timeout { locator: String, secs: u64 },

    /// Bytes were retrieved but are not valid for the declared kind.
    #[error("decode failed for '{locator}': {reason}")]
    Decode { locator: String, reason: String },

    /// Loading was cancelled before the asset settled.
    #[error("loading cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this error aborts the whole `execute` call rather than a
    /// single asset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Analysis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_analysis_is_fatal() {
        assert!(StreamError::Analysis("bad".into()).is_fatal());
        assert!(!StreamError::Cancelled.is_fatal());
        assert!(!StreamError::Timeout { locator: "a.png".into(), secs: 30 }.is_fatal());
    }
}
