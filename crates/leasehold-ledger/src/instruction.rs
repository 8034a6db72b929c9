//! Operations submitted to the ledger

use std::fmt;

use leasehold_types::{
    EscrowId, InvalidationType, InvalidatorId, IssueRequest, MintId, OperationId, UnixTimestamp,
    WalletId,
};
use serde::{Deserialize, Serialize};

/// One state-machine call. The operation's payer is the caller of every
/// instruction it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Issue {
        escrow: EscrowId,
        request: IssueRequest,
    },
    Claim {
        escrow: EscrowId,
    },
    Invalidate {
        escrow: EscrowId,
    },
    UpdateInvalidationType {
        escrow: EscrowId,
        invalidation_type: InvalidationType,
    },
    IncrementUsages {
        escrow: EscrowId,
        usages: u64,
    },
    ExtendExpiration {
        escrow: EscrowId,
        seconds: u64,
    },
    ExtendUsages {
        escrow: EscrowId,
        usages: u64,
    },
    UpdateMaxExpiration {
        escrow: EscrowId,
        max_expiration: UnixTimestamp,
    },
    CloseTimeInvalidator {
        invalidator: InvalidatorId,
    },
    CloseUsageInvalidator {
        invalidator: InvalidatorId,
    },
    Unissue {
        escrow: EscrowId,
    },
    /// Open `owner`'s associated account for `mint` if it does not exist
    CreateAssociatedAccount {
        owner: WalletId,
        mint: MintId,
    },
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Issue { .. } => "issue",
            Self::Claim { .. } => "claim",
            Self::Invalidate { .. } => "invalidate",
            Self::UpdateInvalidationType { .. } => "update_invalidation_type",
            Self::IncrementUsages { .. } => "increment_usages",
            Self::ExtendExpiration { .. } => "extend_expiration",
            Self::ExtendUsages { .. } => "extend_usages",
            Self::UpdateMaxExpiration { .. } => "update_max_expiration",
            Self::CloseTimeInvalidator { .. } => "close_time_invalidator",
            Self::CloseUsageInvalidator { .. } => "close_usage_invalidator",
            Self::Unissue { .. } => "unissue",
            Self::CreateAssociatedAccount { .. } => "create_associated_account",
        }
    }
}

/// An ordered list of instructions, applied atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Signer; the caller of every instruction
    pub payer: WalletId,
    pub instructions: Vec<Instruction>,
}

impl Operation {
    pub fn new(payer: WalletId, instructions: Vec<Instruction>) -> Self {
        Self {
            id: OperationId::new(),
            payer,
            instructions,
        }
    }
}

/// Durability level to wait for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => write!(f, "processed"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Proof that an operation landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub operation: OperationId,
    /// Hex signature the operation was submitted with
    pub signature: String,
    pub commitment: Commitment,
    /// Ledger sequence number the operation landed in
    pub slot: u64,
    pub instructions: usize,
}
