//! Invalidator records
//!
//! Invalidators are the policies attached to an escrow that decide when it
//! may be ended. An escrow has at most one of each kind.

use crate::{EscrowId, InvalidatorId, MintId, UnixTimestamp, WalletId};
use serde::{Deserialize, Serialize};

/// Paid extension terms for a time invalidator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeExtension {
    /// Price of one extension unit
    pub payment_amount: u64,
    /// Length of one extension unit in seconds
    pub duration_seconds: u64,
    /// Mint the extension is paid in
    pub payment_mint: MintId,
    /// Only whole units may be bought
    pub disable_partial_extension: bool,
}

/// Time-based expiration policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInvalidator {
    pub id: InvalidatorId,
    /// Escrow this policy is attached to
    pub escrow: EscrowId,
    /// Receives extension fees
    pub collector: WalletId,
    /// Absolute expiration; overrides `duration_seconds` when set
    pub expiration: Option<UnixTimestamp>,
    /// Relative expiration anchored at the escrow's `state_changed_at`
    pub duration_seconds: Option<i64>,
    /// Hard cap; reaching it expires the escrow in any live state
    pub max_expiration: Option<UnixTimestamp>,
    pub extension: Option<TimeExtension>,
}

/// Paid extension terms for a usage invalidator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageExtension {
    /// Price of one extension unit
    pub payment_amount: u64,
    /// Usages granted per extension unit
    pub extension_usages: u64,
    /// Mint the extension is paid in
    pub payment_mint: MintId,
    /// Hard cap on `total_usages` after extensions
    pub max_usages: Option<u64>,
}

/// Usage-based expiration policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInvalidator {
    pub id: InvalidatorId,
    /// Escrow this policy is attached to
    pub escrow: EscrowId,
    /// Receives extension fees
    pub collector: WalletId,
    /// Usages consumed so far
    pub usages: u64,
    /// Budget; `None` never expires by usage
    pub total_usages: Option<u64>,
    /// Sole identity allowed to record usage, overriding the claimant
    pub use_authority: Option<WalletId>,
    pub extension: Option<UsageExtension>,
}

impl UsageInvalidator {
    /// Usages left before the budget is exhausted
    pub fn remaining(&self) -> Option<u64> {
        self.total_usages.map(|total| total.saturating_sub(self.usages))
    }
}
