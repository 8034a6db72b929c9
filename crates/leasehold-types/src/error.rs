//! Error types for Leasehold
//!
//! Rejections are explicit and deterministic: the same record and the same
//! clock always produce the same error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Leasehold operations
pub type Result<T> = std::result::Result<T, LeaseholdError>;

/// Leasehold error types
///
/// Serializable so a remote ledger can report exactly why it refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeaseholdError {
    // ========================================================================
    // Record Errors
    // ========================================================================

    /// Escrow record does not exist (never issued, or already removed)
    #[error("Escrow {escrow_id} not found")]
    EscrowNotFound { escrow_id: String },

    /// Invalidator record does not exist
    #[error("Invalidator {invalidator_id} not found")]
    InvalidatorNotFound { invalidator_id: String },

    /// Token account does not exist
    #[error("Token account {account} not found")]
    TokenAccountNotFound { account: String },

    /// Record already exists at this address
    #[error("Record {address} already exists")]
    AlreadyExists { address: String },

    // ========================================================================
    // State Machine Errors
    // ========================================================================

    /// Operation not legal in the escrow's current state
    #[error("Escrow {escrow_id} is {state}, cannot {operation}")]
    InvalidState {
        escrow_id: String,
        state: String,
        operation: String,
    },

    /// Caller is not permitted to perform this operation
    #[error("{caller} is not authorized to {operation}")]
    Unauthorized { caller: String, operation: String },

    /// Escrow policy has not expired yet
    #[error("Escrow {escrow_id} has not expired: {pending}")]
    NotExpired { escrow_id: String, pending: String },

    /// Usage budget exhausted
    #[error("Usage budget exhausted: {usages} used of {total}, requested {requested}")]
    InsufficientUsages { usages: u64, total: u64, requested: u64 },

    // ========================================================================
    // Extension Errors
    // ========================================================================

    /// Invalidator has no extension configured
    #[error("Invalidator {invalidator_id} does not support extensions")]
    ExtensionNotConfigured { invalidator_id: String },

    /// Extension amount is zero, fractional, or not a whole multiple of the unit
    #[error("Invalid extension amount {requested}: {reason}")]
    InvalidExtensionAmount { requested: u64, reason: String },

    /// Extension would push expiration past its hard cap
    #[error("Extension to {requested} exceeds max expiration {max_expiration}")]
    ExceedsMaxExpiration { requested: i64, max_expiration: i64 },

    /// Extension would push the usage budget past its hard cap
    #[error("Extension to {requested} usages exceeds max usages {max_usages}")]
    ExceedsMaxUsages { requested: u64, max_usages: u64 },

    /// Max expiration update would move the cap backwards
    #[error("New max expiration {requested} is before {floor}")]
    InvalidMaxExpiration { requested: i64, floor: i64 },

    // ========================================================================
    // Custody & Payment Errors
    // ========================================================================

    /// Holder lacks custody of the asset
    #[error("Account {account} holds {available} of {mint}, needs {required}")]
    InsufficientCustody {
        account: String,
        mint: String,
        available: u64,
        required: u64,
    },

    /// Account is owned by someone else or holds another mint
    #[error("Account {account} mismatch: {reason}")]
    AccountMismatch { account: String, reason: String },

    /// Mint cannot be frozen, so managed custody cannot be enforced
    #[error("Mint {mint} cannot be frozen by the escrow")]
    FreezeUnavailable { mint: String },

    /// Account is frozen
    #[error("Account {account} is frozen")]
    AccountFrozen { account: String },

    /// Payment settlement failed
    #[error("Payment of {amount} {mint} failed: {reason}")]
    PaymentFailed {
        amount: u64,
        mint: String,
        reason: String,
    },

    // ========================================================================
    // Configuration & Arithmetic Errors
    // ========================================================================

    /// Issue request or policy configuration is invalid
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Checked arithmetic overflowed
    #[error("Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: String },
}

impl LeaseholdError {
    /// Deterministic refusals that retrying cannot change.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotExpired { .. }
                | Self::InsufficientUsages { .. }
                | Self::ExceedsMaxExpiration { .. }
                | Self::ExceedsMaxUsages { .. }
                | Self::InvalidExtensionAmount { .. }
                | Self::InvalidMaxExpiration { .. }
        )
    }

    /// The record the operation targeted is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EscrowNotFound { .. }
                | Self::InvalidatorNotFound { .. }
                | Self::TokenAccountNotFound { .. }
        )
    }

    pub(crate) fn overflow(context: &str) -> Self {
        Self::ArithmeticOverflow {
            context: context.to_string(),
        }
    }
}

/// Checked addition that reports where it overflowed
pub fn checked_add_i64(a: i64, b: i64, context: &str) -> Result<i64> {
    a.checked_add(b).ok_or_else(|| LeaseholdError::overflow(context))
}

/// Checked addition that reports where it overflowed
pub fn checked_add_u64(a: u64, b: u64, context: &str) -> Result<u64> {
    a.checked_add(b).ok_or_else(|| LeaseholdError::overflow(context))
}
