//! Typed errors for contract violations.
//!
//! Recoverable conditions (degenerate numeric input, collaborator hiccups,
//! persistence I/O) are handled where they occur and never reach these types.

use thiserror::Error;

/// Invalid inputs to position sizing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("equity must be a finite non-negative amount, got {0}")]
    InvalidEquity(f64),
    #[error("malformed instrument spec: {0}")]
    MalformedSpec(String),
}

/// Bandit selection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BanditError {
    #[error("no candidate strategies for regime {0}")]
    NoCandidates(String),
}

/// Failures at the collaborator boundary.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("{source_name} unavailable for {instrument}: {message}")]
    Unavailable {
        source_name: &'static str,
        instrument: String,
        message: String,
    },
}

impl MarketDataError {
    pub fn unavailable(
        source_name: &'static str,
        instrument: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            source_name,
            instrument: instrument.to_string(),
            message: message.into(),
        }
    }
}
