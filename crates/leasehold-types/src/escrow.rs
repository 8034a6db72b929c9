//! Escrow record types for Leasehold
//!
//! An escrow record holds one asset under rental custody. The issuer locks
//! the asset, a recipient claims it, and attached invalidators decide when
//! it comes back.

use crate::{ClaimApproverId, EscrowId, InvalidatorId, MintId, TokenAccountId, UnixTimestamp, WalletId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowState {
    /// No record exists (never issued, or removed by invalidation)
    Uninitialized,
    /// Asset is locked in escrow and waiting for a claimant
    Issued,
    /// Asset has been claimed and is held by the recipient
    Claimed,
}

impl EscrowState {
    /// Whether the record is live on the ledger
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Issued | Self::Claimed)
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Issued => write!(f, "issued"),
            Self::Claimed => write!(f, "claimed"),
        }
    }
}

/// What happens to the asset once the escrow is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationType {
    /// Asset is burned and the record deleted
    Invalidate,
    /// Asset goes back to the issuer and the record is deleted
    Return,
    /// Asset stays in escrow and the record resets to `Issued`
    Reissue,
}

impl InvalidationType {
    /// Whether invalidation removes the escrow record
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reissue)
    }
}

/// Asset-handling mode; selects the custody primitive, not the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowKind {
    /// Recipient holds the asset frozen; escrow can always take it back
    Managed,
    /// Recipient holds the asset freely until expiration
    Unmanaged,
    /// Fixed edition asset, always a single unit, frozen while claimed
    Edition,
    /// Transfers gated by the escrow, frozen while claimed
    Permissioned,
}

impl EscrowKind {
    /// Whether the claimed asset must be frozen in the recipient's account
    pub fn requires_freeze(&self) -> bool {
        !matches!(self, Self::Unmanaged)
    }
}

/// Reference to an attached invalidator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidatorRef {
    Time(InvalidatorId),
    Usage(InvalidatorId),
}

impl InvalidatorRef {
    pub fn id(&self) -> InvalidatorId {
        match self {
            Self::Time(id) | Self::Usage(id) => *id,
        }
    }
}

impl fmt::Display for InvalidatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(id) => write!(f, "time:{}", id),
            Self::Usage(id) => write!(f, "usage:{}", id),
        }
    }
}

/// An escrow record ("token manager")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Unique escrow address
    pub id: EscrowId,
    /// Identity that created the escrow
    pub issuer: WalletId,
    /// Asset held in escrow
    pub mint: MintId,
    /// Amount of the asset under escrow
    pub amount: u64,
    /// Asset-handling mode
    pub kind: EscrowKind,
    /// Current lifecycle state
    pub state: EscrowState,
    /// Outcome on invalidation
    pub invalidation_type: InvalidationType,
    /// Account the escrow itself holds the asset in while unclaimed
    pub custody_account: TokenAccountId,
    /// Destination once claimed; `None` before claim
    pub recipient_token_account: Option<TokenAccountId>,
    /// Payment gate that must settle atomically with claim
    pub claim_approver: Option<ClaimApproverId>,
    /// Attached expiration policies, at most one of each kind
    pub invalidators: Vec<InvalidatorRef>,
    /// Last `Issued -> Claimed` or `Claimed -> Issued` transition
    pub state_changed_at: UnixTimestamp,
}

impl EscrowRecord {
    /// Attached time invalidator, if any
    pub fn time_invalidator(&self) -> Option<InvalidatorId> {
        self.invalidators.iter().find_map(|r| match r {
            InvalidatorRef::Time(id) => Some(*id),
            _ => None,
        })
    }

    /// Attached usage invalidator, if any
    pub fn usage_invalidator(&self) -> Option<InvalidatorId> {
        self.invalidators.iter().find_map(|r| match r {
            InvalidatorRef::Usage(id) => Some(*id),
            _ => None,
        })
    }

    /// Whether this escrow lists the given invalidator
    pub fn lists(&self, invalidator: &InvalidatorId) -> bool {
        self.invalidators.iter().any(|r| r.id() == *invalidator)
    }

    /// No invalidators attached; only the issuer may end it
    pub fn is_manual_only(&self) -> bool {
        self.invalidators.is_empty()
    }
}

/// Payment-gated claim approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimApprover {
    pub id: ClaimApproverId,
    pub escrow: EscrowId,
    pub payment_mint: MintId,
    pub payment_amount: u64,
    /// Receives the claim payment
    pub collector: WalletId,
}
