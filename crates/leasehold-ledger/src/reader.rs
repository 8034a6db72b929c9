//! Ledger read and write interfaces

use async_trait::async_trait;
use leasehold_escrow::TokenAccount;
use leasehold_types::{EscrowId, EscrowRecord, TimeInvalidator, TokenAccountId, UnixTimestamp, UsageInvalidator};
use serde::{Deserialize, Serialize};

use crate::credential::SignedOperation;
use crate::error::Result;
use crate::instruction::{Commitment, OperationReceipt};

/// A decoded account and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData<T> {
    pub address: String,
    pub data: T,
}

/// A fetched account, which may not decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fetched<T> {
    Parsed(AccountData<T>),
    Malformed { address: String, reason: String },
}

impl<T> Fetched<T> {
    pub fn parsed(address: impl Into<String>, data: T) -> Self {
        Self::Parsed(AccountData {
            address: address.into(),
            data,
        })
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Parsed(account) => &account.address,
            Self::Malformed { address, .. } => address,
        }
    }

    /// The decoded data, dropping malformed accounts
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Parsed(account) => Some(account.data),
            Self::Malformed { .. } => None,
        }
    }
}

/// Ledger read interface. Results may be empty, partial, or stale but
/// internally consistent.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Every time invalidator on the ledger
    async fn list_time_invalidators(&self) -> Result<Vec<Fetched<TimeInvalidator>>>;

    /// Every usage invalidator on the ledger
    async fn list_usage_invalidators(&self) -> Result<Vec<Fetched<UsageInvalidator>>>;

    /// Escrows by address, aligned with `ids`; `None` where nothing exists
    async fn get_escrows(&self, ids: &[EscrowId]) -> Result<Vec<Option<Fetched<EscrowRecord>>>>;

    /// Token accounts by address, aligned with `ids`
    async fn get_token_accounts(&self, ids: &[TokenAccountId]) -> Result<Vec<Option<TokenAccount>>>;

    /// The ledger's current time
    async fn ledger_time(&self) -> Result<UnixTimestamp>;
}

/// Ledger write interface
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Submit a signed operation and wait for `commitment`
    async fn submit(&self, operation: &SignedOperation, commitment: Commitment) -> Result<OperationReceipt>;
}
