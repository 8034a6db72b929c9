//! Crank error types

use leasehold_ledger::LedgerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrankError>;

/// Errors that stop a run, or a single member of a batch
#[derive(Error, Debug, Clone)]
pub enum CrankError {
    /// Bad configuration or credential; fatal before anything is submitted
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The candidate list could not be fetched; the run reports one failure
    #[error("Failed to fetch candidates: {source}")]
    FetchCandidates {
        #[source]
        source: LedgerError,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// One member's instructions could not be assembled
    #[error("Failed to build instructions for {subject}: {reason}")]
    Build { subject: String, reason: String },
}

impl CrankError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
