//! Expiration policy evaluation
//!
//! An escrow may be invalidated once every attached invalidator reports
//! expired. Time and usage conditions combine with AND; an invalidator
//! that is not attached counts as satisfied.

use std::fmt;

use leasehold_types::{
    EscrowId, EscrowRecord, EscrowState, InvalidatorRef, LeaseholdError, TimeInvalidator,
    UnixTimestamp, UsageInvalidator,
};
use serde::{Deserialize, Serialize};

/// Effective expiration instant of a time invalidator.
///
/// Only a claimed escrow has one. An explicit `expiration` wins over the
/// duration, which is anchored at the latest `state_changed_at`.
pub fn resolved_expiration(escrow: &EscrowRecord, time: &TimeInvalidator) -> Option<UnixTimestamp> {
    if escrow.state != EscrowState::Claimed {
        return None;
    }
    time.expiration.or_else(|| {
        time.duration_seconds
            .map(|duration| escrow.state_changed_at.saturating_add(duration))
    })
}

/// Whether the time condition holds at `now`
pub fn time_expired(escrow: &EscrowRecord, time: &TimeInvalidator, now: UnixTimestamp) -> bool {
    if !escrow.state.is_live() || !escrow.lists(&time.id) {
        return false;
    }
    // The hard cap applies whether or not the asset was ever claimed
    if time.max_expiration.is_some_and(|max| now >= max) {
        return true;
    }
    resolved_expiration(escrow, time).is_some_and(|expiration| now >= expiration)
}

/// Whether the usage budget is exhausted. No budget never expires.
pub fn usage_expired(usage: &UsageInvalidator) -> bool {
    usage.total_usages.is_some_and(|total| usage.usages >= total)
}

/// A condition that still blocks invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pending {
    /// Time has not run out; `expires_at` is `None` until the clock starts
    Time { expires_at: Option<UnixTimestamp> },
    /// Usage budget not exhausted
    Usage { usages: u64, total: Option<u64> },
    /// The escrow lists an invalidator whose record was not supplied
    MissingRecord(InvalidatorRef),
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time { expires_at: Some(at) } => write!(f, "time expires at {}", at),
            Self::Time { expires_at: None } => write!(f, "time not started"),
            Self::Usage { usages, total: Some(total) } => {
                write!(f, "{} of {} usages", usages, total)
            }
            Self::Usage { usages, total: None } => write!(f, "{} usages, unlimited", usages),
            Self::MissingRecord(invalidator) => write!(f, "{} not loaded", invalidator),
        }
    }
}

/// Answer to "may this escrow be invalidated now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Every attached invalidator has expired
    Expired,
    /// At least one condition still holds the escrow open
    NotExpired { pending: Vec<Pending> },
    /// No invalidators attached; only the issuer may end it
    IssuerOnly,
}

impl Verdict {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Deterministic rejection for a verdict that is not `Expired`
    pub fn rejection(&self, escrow_id: &EscrowId) -> Option<LeaseholdError> {
        match self {
            Self::NotExpired { pending } => Some(LeaseholdError::NotExpired {
                escrow_id: escrow_id.to_string(),
                pending: pending
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            _ => None,
        }
    }
}

/// Evaluate every attached invalidator at a single `now`.
///
/// `time` and `usage` are the records the caller loaded; a record whose id
/// does not match what the escrow lists is treated as missing.
pub fn evaluate(
    escrow: &EscrowRecord,
    time: Option<&TimeInvalidator>,
    usage: Option<&UsageInvalidator>,
    now: UnixTimestamp,
) -> Verdict {
    if escrow.is_manual_only() {
        return Verdict::IssuerOnly;
    }

    let mut pending = Vec::new();

    if let Some(id) = escrow.time_invalidator() {
        match time.filter(|t| t.id == id) {
            Some(t) if time_expired(escrow, t, now) => {}
            Some(t) => pending.push(Pending::Time {
                expires_at: earliest(resolved_expiration(escrow, t), t.max_expiration),
            }),
            None => pending.push(Pending::MissingRecord(InvalidatorRef::Time(id))),
        }
    }

    if let Some(id) = escrow.usage_invalidator() {
        match usage.filter(|u| u.id == id) {
            Some(u) if usage_expired(u) => {}
            Some(u) => pending.push(Pending::Usage {
                usages: u.usages,
                total: u.total_usages,
            }),
            None => pending.push(Pending::MissingRecord(InvalidatorRef::Usage(id))),
        }
    }

    if pending.is_empty() {
        Verdict::Expired
    } else {
        Verdict::NotExpired { pending }
    }
}

fn earliest(a: Option<UnixTimestamp>, b: Option<UnixTimestamp>) -> Option<UnixTimestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
