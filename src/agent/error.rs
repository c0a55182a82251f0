//! Agent-side error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while an agent talks to the collector or inspects its site.
///
/// None of these abort the agent loop: each is logged and the cycle moves on
/// to its next step.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection refused, DNS failure or other transport error.
    #[error("collector unavailable: {0}")]
    Unavailable(String),

    /// No complete response within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The collector answered with a non-2xx status.
    #[error("collector rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A 2xx answer whose body is not what the collector sends.
    #[error("unexpected collector response: {0}")]
    InvalidResponse(String),

    /// Network discovery failed.
    #[error("scan failed: {0}")]
    Scan(String),

    /// Local file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid agent settings.
    #[error("config error: {0}")]
    Config(String),
}
