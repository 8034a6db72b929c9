//! Ledger error types

use leasehold_types::LeaseholdError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors from reading or writing the ledger
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // ========================================================================
    // Infrastructure (transient)
    // ========================================================================

    #[error("Ledger unavailable: {message}")]
    Unavailable { message: String },

    #[error("Ledger request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    // ========================================================================
    // Refusals
    // ========================================================================

    /// The program refused one instruction; nothing in the operation applied
    #[error("Instruction {index} ({instruction}) rejected: {source}")]
    Rejected {
        index: usize,
        instruction: String,
        #[source]
        source: LeaseholdError,
    },

    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    #[error("Operation {operation} already processed")]
    Duplicate { operation: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    // ========================================================================
    // Decoding
    // ========================================================================

    #[error("Malformed account {address}: {reason}")]
    Malformed { address: String, reason: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl LedgerError {
    /// Worth retrying: the request may not have reached the ledger
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// The program refused because a policy said "not yet" or "too far"
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::Rejected { source, .. } if source.is_policy_rejection())
    }

    /// Position of the refused instruction within its operation
    pub fn rejected_index(&self) -> Option<usize> {
        match self {
            Self::Rejected { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
