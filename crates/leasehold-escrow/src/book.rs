//! The authoritative record store

use std::collections::HashMap;

use leasehold_types::{
    ClaimApprover, ClaimApproverId, EscrowId, EscrowRecord, InvalidatorId, LeaseholdError, Result,
    TimeInvalidator, UsageInvalidator,
};

/// Escrow records and the policies attached to them
#[derive(Debug, Clone, Default)]
pub struct RentalBook {
    escrows: HashMap<EscrowId, EscrowRecord>,
    time_invalidators: HashMap<InvalidatorId, TimeInvalidator>,
    usage_invalidators: HashMap<InvalidatorId, UsageInvalidator>,
    claim_approvers: HashMap<ClaimApproverId, ClaimApprover>,
}

impl RentalBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Escrows
    // ------------------------------------------------------------------

    pub fn escrow(&self, id: &EscrowId) -> Option<&EscrowRecord> {
        self.escrows.get(id)
    }

    /// Escrow by id, or `EscrowNotFound`
    pub fn require_escrow(&self, id: &EscrowId) -> Result<&EscrowRecord> {
        self.escrows.get(id).ok_or_else(|| LeaseholdError::EscrowNotFound {
            escrow_id: id.to_string(),
        })
    }

    pub(crate) fn escrow_mut(&mut self, id: &EscrowId) -> Result<&mut EscrowRecord> {
        self.escrows.get_mut(id).ok_or_else(|| LeaseholdError::EscrowNotFound {
            escrow_id: id.to_string(),
        })
    }

    pub(crate) fn insert_escrow(&mut self, escrow: EscrowRecord) {
        self.escrows.insert(escrow.id, escrow);
    }

    pub(crate) fn remove_escrow(&mut self, id: &EscrowId) -> Option<EscrowRecord> {
        let escrow = self.escrows.remove(id)?;
        if let Some(approver) = escrow.claim_approver {
            self.claim_approvers.remove(&approver);
        }
        Some(escrow)
    }

    pub fn escrows(&self) -> impl Iterator<Item = &EscrowRecord> {
        self.escrows.values()
    }

    // ------------------------------------------------------------------
    // Invalidators
    // ------------------------------------------------------------------

    pub fn time_invalidator(&self, id: &InvalidatorId) -> Option<&TimeInvalidator> {
        self.time_invalidators.get(id)
    }

    pub fn usage_invalidator(&self, id: &InvalidatorId) -> Option<&UsageInvalidator> {
        self.usage_invalidators.get(id)
    }

    pub(crate) fn time_invalidator_mut(&mut self, id: &InvalidatorId) -> Result<&mut TimeInvalidator> {
        self.time_invalidators
            .get_mut(id)
            .ok_or_else(|| not_found(id))
    }

    pub(crate) fn usage_invalidator_mut(&mut self, id: &InvalidatorId) -> Result<&mut UsageInvalidator> {
        self.usage_invalidators
            .get_mut(id)
            .ok_or_else(|| not_found(id))
    }

    pub(crate) fn insert_time_invalidator(&mut self, invalidator: TimeInvalidator) {
        self.time_invalidators.insert(invalidator.id, invalidator);
    }

    pub(crate) fn insert_usage_invalidator(&mut self, invalidator: UsageInvalidator) {
        self.usage_invalidators.insert(invalidator.id, invalidator);
    }

    pub(crate) fn remove_time_invalidator(&mut self, id: &InvalidatorId) -> Option<TimeInvalidator> {
        self.time_invalidators.remove(id)
    }

    pub(crate) fn remove_usage_invalidator(&mut self, id: &InvalidatorId) -> Option<UsageInvalidator> {
        self.usage_invalidators.remove(id)
    }

    pub fn time_invalidators(&self) -> impl Iterator<Item = &TimeInvalidator> {
        self.time_invalidators.values()
    }

    pub fn usage_invalidators(&self) -> impl Iterator<Item = &UsageInvalidator> {
        self.usage_invalidators.values()
    }

    /// The invalidator records an escrow lists, cloned for evaluation
    pub fn policies_for(&self, escrow: &EscrowRecord) -> (Option<TimeInvalidator>, Option<UsageInvalidator>) {
        let time = escrow
            .time_invalidator()
            .and_then(|id| self.time_invalidators.get(&id))
            .cloned();
        let usage = escrow
            .usage_invalidator()
            .and_then(|id| self.usage_invalidators.get(&id))
            .cloned();
        (time, usage)
    }

    // ------------------------------------------------------------------
    // Claim approvers
    // ------------------------------------------------------------------

    pub fn claim_approver(&self, id: &ClaimApproverId) -> Option<&ClaimApprover> {
        self.claim_approvers.get(id)
    }

    pub(crate) fn insert_claim_approver(&mut self, approver: ClaimApprover) {
        self.claim_approvers.insert(approver.id, approver);
    }
}

fn not_found(id: &InvalidatorId) -> LeaseholdError {
    LeaseholdError::InvalidatorNotFound {
        invalidator_id: id.to_string(),
    }
}
