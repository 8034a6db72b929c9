//! Rental State Machine
//!
//! ```text
//! Uninitialized --issue--> Issued --claim--> Claimed
//!                            |                  |
//!                            +-- unissue        +-- invalidate --> Invalidate: burn, delete
//!                                                                  Return:     send to issuer, delete
//!                                                                  Reissue:    back to Issued
//! ```
//!
//! Each public operation runs against a draft copy of the machine and only
//! replaces the live state when every step succeeded. A caller applying
//! several operations as one takes a single [`RentalStateMachine::draft`]
//! instead.

use leasehold_policy::{
    evaluate, quote_time_extension, quote_usage_extension, validate_max_expiration_update,
    ExtensionQuote, Verdict,
};
use leasehold_types::{
    checked_add_u64, ClaimApprover, ClaimApproverId, EscrowId, EscrowRecord, EscrowState,
    ExpirationRule, InvalidationType, InvalidatorId, InvalidatorRef, IssueRequest, LeaseholdError,
    Result, TimeInvalidator, TokenAccountId, UnixTimestamp, UsageInvalidator, WalletId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::book::RentalBook;
use crate::custody::{Custody, PaymentSettlement};

/// Identity that owns an escrow's custody account
pub fn escrow_authority(escrow: &EscrowId) -> WalletId {
    WalletId::from_uuid(*escrow.as_uuid())
}

/// What an invalidation did with the asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationOutcome {
    /// Asset destroyed, record deleted
    Burned,
    /// Asset sent to the issuer's account, record deleted
    Returned { to: TokenAccountId },
    /// Asset back in escrow custody, record reset to `Issued`
    Reissued,
}

/// Result of closing an invalidator record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseOutcome {
    /// Escrow was gone, record removed
    Closed,
    /// Escrow still exists, record kept
    Retained,
}

/// The rental lifecycle over a record store and a custody backend
#[derive(Debug, Clone, Default)]
pub struct RentalStateMachine<C> {
    book: RentalBook,
    custody: C,
    /// Set on a copy from [`RentalStateMachine::draft`]
    drafting: bool,
}

impl<C> RentalStateMachine<C>
where
    C: Custody + PaymentSettlement + Clone,
{
    pub fn new(custody: C) -> Self {
        Self {
            book: RentalBook::new(),
            custody,
            drafting: false,
        }
    }

    pub fn book(&self) -> &RentalBook {
        &self.book
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    /// Direct custody access, for seeding balances outside the lifecycle
    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    /// Run `f` against a draft; commit only if it succeeds.
    ///
    /// On a machine that is itself a draft `f` runs in place: whoever holds
    /// the draft discards all of it on failure.
    pub fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.drafting {
            return f(self);
        }
        let mut draft = self.clone();
        let value = f(&mut draft)?;
        *self = draft;
        Ok(value)
    }

    /// One copy for a multi-step change. Operations on it skip their own
    /// snapshots, so a batch of steps costs a single clone.
    pub fn draft(&self) -> Self {
        let mut draft = self.clone();
        draft.drafting = true;
        draft
    }

    /// Replace the live state with a finished draft
    pub fn commit(&mut self, mut draft: Self) {
        draft.drafting = false;
        *self = draft;
    }

    pub fn is_draft(&self) -> bool {
        self.drafting
    }

    // ========================================================================
    // Issue / Unissue
    // ========================================================================

    /// Lock the issuer's asset in escrow under the requested policies
    pub fn issue(
        &mut self,
        caller: &WalletId,
        escrow_id: EscrowId,
        request: IssueRequest,
        now: UnixTimestamp,
    ) -> Result<EscrowRecord> {
        request.validate()?;
        if *caller != request.issuer {
            return Err(unauthorized(caller, "issue"));
        }
        if self.book.escrow(&escrow_id).is_some() {
            return Err(LeaseholdError::AlreadyExists {
                address: escrow_id.to_string(),
            });
        }
        if request.kind.requires_freeze() && !self.custody.mint_freezable(&request.mint) {
            return Err(LeaseholdError::FreezeUnavailable {
                mint: request.mint.to_string(),
            });
        }

        self.atomically(|m| {
            let source = m.custody.token_account(&request.issuer_token_account)?;
            if source.owner != request.issuer || source.mint != request.mint {
                return Err(LeaseholdError::AccountMismatch {
                    account: source.id.to_string(),
                    reason: "not the issuer's account for this mint".to_string(),
                });
            }

            let custody_account = TokenAccountId::escrow_custody(&escrow_id, &request.mint);
            m.custody
                .open_account(custody_account, escrow_authority(&escrow_id), request.mint)?;
            m.custody
                .transfer(&source.id, &custody_account, request.amount)?;

            let mut invalidators = Vec::new();

            if let Some(policy) = &request.time {
                let (expiration, duration_seconds) = match policy.rule {
                    ExpirationRule::Fixed { expiration } => (Some(expiration), None),
                    ExpirationRule::Relative { duration_seconds } => (None, Some(duration_seconds)),
                };
                let time = TimeInvalidator {
                    id: InvalidatorId::time_for(&escrow_id),
                    escrow: escrow_id,
                    collector: policy.collector.unwrap_or(request.issuer),
                    expiration,
                    duration_seconds,
                    max_expiration: policy.max_expiration,
                    extension: policy.extension.clone(),
                };
                invalidators.push(InvalidatorRef::Time(time.id));
                m.book.insert_time_invalidator(time);
            }

            if let Some(policy) = &request.usage {
                let usage = UsageInvalidator {
                    id: InvalidatorId::usage_for(&escrow_id),
                    escrow: escrow_id,
                    collector: policy.collector.unwrap_or(request.issuer),
                    usages: 0,
                    total_usages: policy.total_usages,
                    use_authority: policy.use_authority,
                    extension: policy.extension.clone(),
                };
                invalidators.push(InvalidatorRef::Usage(usage.id));
                m.book.insert_usage_invalidator(usage);
            }

            let claim_approver = request.claim.as_ref().map(|claim| {
                let approver = ClaimApprover {
                    id: ClaimApproverId::for_escrow(&escrow_id),
                    escrow: escrow_id,
                    payment_mint: claim.payment_mint,
                    payment_amount: claim.payment_amount,
                    collector: claim.collector.unwrap_or(request.issuer),
                };
                let id = approver.id;
                m.book.insert_claim_approver(approver);
                id
            });

            let record = EscrowRecord {
                id: escrow_id,
                issuer: request.issuer,
                mint: request.mint,
                amount: request.amount,
                kind: request.kind,
                state: EscrowState::Issued,
                invalidation_type: request.invalidation_type,
                custody_account,
                recipient_token_account: None,
                claim_approver,
                invalidators,
                state_changed_at: now,
            };
            m.book.insert_escrow(record.clone());

            info!(
                escrow = %escrow_id,
                issuer = %request.issuer,
                mint = %request.mint,
                amount = request.amount,
                kind = ?request.kind,
                "Escrow issued"
            );
            Ok(record)
        })
    }

    /// Issuer withdraws an unclaimed escrow and takes the asset back
    pub fn unissue(&mut self, caller: &WalletId, escrow_id: &EscrowId) -> Result<InvalidationOutcome> {
        self.atomically(|m| {
            let escrow = m.book.require_escrow(escrow_id)?.clone();
            if *caller != escrow.issuer {
                return Err(unauthorized(caller, "unissue"));
            }
            require_state(&escrow, EscrowState::Issued, "unissue")?;

            let to = m.custody.open_associated(&escrow.issuer, &escrow.mint)?;
            m.custody.transfer(&escrow.custody_account, &to, escrow.amount)?;

            m.book.remove_escrow(escrow_id);
            if let Some(id) = escrow.time_invalidator() {
                m.book.remove_time_invalidator(&id);
            }
            if let Some(id) = escrow.usage_invalidator() {
                m.book.remove_usage_invalidator(&id);
            }

            info!(escrow = %escrow_id, "Escrow unissued");
            Ok(InvalidationOutcome::Returned { to })
        })
    }

    // ========================================================================
    // Claim
    // ========================================================================

    /// Recipient takes the asset; a claim approver's payment settles in the
    /// same step or the claim does not happen
    pub fn claim(&mut self, caller: &WalletId, escrow_id: &EscrowId, now: UnixTimestamp) -> Result<EscrowRecord> {
        self.atomically(|m| {
            let escrow = m.book.require_escrow(escrow_id)?.clone();
            require_state(&escrow, EscrowState::Issued, "claim")?;

            if let Some(approver_id) = escrow.claim_approver {
                let approver = m
                    .book
                    .claim_approver(&approver_id)
                    .cloned()
                    .ok_or_else(|| LeaseholdError::InvalidConfiguration {
                        message: format!("claim approver {} missing", approver_id),
                    })?;
                m.custody.settle(
                    caller,
                    &approver.payment_mint,
                    approver.payment_amount,
                    &approver.collector,
                )?;
            }

            let recipient_account = m.custody.open_associated(caller, &escrow.mint)?;
            m.custody
                .transfer(&escrow.custody_account, &recipient_account, escrow.amount)?;
            if escrow.kind.requires_freeze() {
                m.custody.freeze(&recipient_account)?;
            }

            let record = m.book.escrow_mut(escrow_id)?;
            record.state = EscrowState::Claimed;
            record.recipient_token_account = Some(recipient_account);
            record.state_changed_at = now;

            info!(escrow = %escrow_id, recipient = %caller, "Escrow claimed");
            Ok(record.clone())
        })
    }

    // ========================================================================
    // Invalidate
    // ========================================================================

    /// End the escrow once every attached policy has expired.
    ///
    /// With no invalidators attached only the issuer may do this. A second
    /// call on a removed escrow fails with `EscrowNotFound`.
    pub fn invalidate(
        &mut self,
        caller: &WalletId,
        escrow_id: &EscrowId,
        now: UnixTimestamp,
    ) -> Result<InvalidationOutcome> {
        self.atomically(|m| {
            let escrow = m.book.require_escrow(escrow_id)?.clone();
            if !escrow.state.is_live() {
                return Err(invalid_state(&escrow, "invalidate"));
            }

            let (time, usage) = m.book.policies_for(&escrow);
            let verdict = evaluate(&escrow, time.as_ref(), usage.as_ref(), now);
            match &verdict {
                Verdict::Expired => {}
                Verdict::IssuerOnly if *caller == escrow.issuer => {}
                Verdict::IssuerOnly => return Err(unauthorized(caller, "invalidate")),
                Verdict::NotExpired { .. } => {
                    if let Some(rejection) = verdict.rejection(escrow_id) {
                        return Err(rejection);
                    }
                }
            }

            let holder = match escrow.state {
                EscrowState::Claimed => {
                    let account = escrow.recipient_token_account.ok_or_else(|| {
                        LeaseholdError::InvalidConfiguration {
                            message: format!("claimed escrow {} has no recipient", escrow_id),
                        }
                    })?;
                    if m.custody.token_account(&account)?.frozen {
                        m.custody.thaw(&account)?;
                    }
                    account
                }
                _ => escrow.custody_account,
            };

            let outcome = match escrow.invalidation_type {
                InvalidationType::Invalidate => {
                    m.custody.burn(&holder, escrow.amount)?;
                    m.book.remove_escrow(escrow_id);
                    InvalidationOutcome::Burned
                }
                InvalidationType::Reissue if escrow.state == EscrowState::Claimed => {
                    m.custody
                        .transfer(&holder, &escrow.custody_account, escrow.amount)?;
                    m.reset_for_reissue(&escrow, now)?;
                    InvalidationOutcome::Reissued
                }
                // An unclaimed escrow has no claimant to reissue to
                _ => {
                    let to = m.custody.open_associated(&escrow.issuer, &escrow.mint)?;
                    m.custody.transfer(&holder, &to, escrow.amount)?;
                    m.book.remove_escrow(escrow_id);
                    InvalidationOutcome::Returned { to }
                }
            };

            info!(escrow = %escrow_id, caller = %caller, outcome = ?outcome, "Escrow invalidated");
            Ok(outcome)
        })
    }

    fn reset_for_reissue(&mut self, escrow: &EscrowRecord, now: UnixTimestamp) -> Result<()> {
        let record = self.book.escrow_mut(&escrow.id)?;
        record.state = EscrowState::Issued;
        record.recipient_token_account = None;
        record.state_changed_at = now;

        if let Some(id) = escrow.time_invalidator() {
            let time = self.book.time_invalidator_mut(&id)?;
            // An expiration derived from the duration restarts on the next claim
            if time.duration_seconds.is_some() {
                time.expiration = None;
            }
        }
        if let Some(id) = escrow.usage_invalidator() {
            self.book.usage_invalidator_mut(&id)?.usages = 0;
        }
        Ok(())
    }

    /// Issuer changes what invalidation will do; never invalidates by itself
    pub fn update_invalidation_type(
        &mut self,
        caller: &WalletId,
        escrow_id: &EscrowId,
        invalidation_type: InvalidationType,
    ) -> Result<EscrowRecord> {
        let escrow = self.book.escrow_mut(escrow_id)?;
        if *caller != escrow.issuer {
            return Err(unauthorized(caller, "update invalidation type"));
        }
        escrow.invalidation_type = invalidation_type;
        debug!(escrow = %escrow_id, invalidation_type = ?invalidation_type, "Invalidation type updated");
        Ok(escrow.clone())
    }

    // ========================================================================
    // Usage
    // ========================================================================

    /// Record `usages` against the budget.
    ///
    /// Only the use authority may do this when one is set; otherwise the
    /// owner of the claimed asset.
    pub fn increment_usages(&mut self, caller: &WalletId, escrow_id: &EscrowId, usages: u64) -> Result<u64> {
        if usages == 0 {
            return Err(LeaseholdError::InvalidConfiguration {
                message: "usages must be positive".to_string(),
            });
        }
        let escrow = self.book.require_escrow(escrow_id)?.clone();
        require_state(&escrow, EscrowState::Claimed, "increment usages")?;
        let usage_id = require_usage(&escrow)?;

        let claimant = match escrow.recipient_token_account {
            Some(account) => Some(self.custody.token_account(&account)?.owner),
            None => None,
        };

        let usage = self.book.usage_invalidator_mut(&usage_id)?;
        let permitted = match usage.use_authority {
            Some(authority) => authority == *caller,
            None => claimant == Some(*caller),
        };
        if !permitted {
            return Err(unauthorized(caller, "increment usages"));
        }

        let next = checked_add_u64(usage.usages, usages, "usages")?;
        if let Some(total) = usage.total_usages {
            if next > total {
                return Err(LeaseholdError::InsufficientUsages {
                    usages: usage.usages,
                    total,
                    requested: usages,
                });
            }
        }
        usage.usages = next;
        debug!(escrow = %escrow_id, usages = next, "Usage recorded");
        Ok(next)
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Buy more time; the caller pays the time invalidator's collector
    pub fn extend_expiration(
        &mut self,
        caller: &WalletId,
        escrow_id: &EscrowId,
        seconds: u64,
    ) -> Result<ExtensionQuote<UnixTimestamp>> {
        self.atomically(|m| {
            let escrow = m.book.require_escrow(escrow_id)?.clone();
            require_state(&escrow, EscrowState::Claimed, "extend expiration")?;
            let time_id = require_time(&escrow)?;
            let time = m.book.time_invalidator_mut(&time_id)?.clone();

            let quote = quote_time_extension(&escrow, &time, seconds)?;
            m.custody
                .settle(caller, &quote.payment_mint, quote.payment, &time.collector)?;
            m.book.time_invalidator_mut(&time_id)?.expiration = Some(quote.new_value);

            info!(
                escrow = %escrow_id,
                seconds,
                payment = quote.payment,
                expiration = quote.new_value,
                "Expiration extended"
            );
            Ok(quote)
        })
    }

    /// Buy more usages; the caller pays the usage invalidator's collector
    pub fn extend_usages(&mut self, caller: &WalletId, escrow_id: &EscrowId, usages: u64) -> Result<ExtensionQuote<u64>> {
        self.atomically(|m| {
            let escrow = m.book.require_escrow(escrow_id)?.clone();
            require_state(&escrow, EscrowState::Claimed, "extend usages")?;
            let usage_id = require_usage(&escrow)?;
            let usage = m.book.usage_invalidator_mut(&usage_id)?.clone();

            let quote = quote_usage_extension(&usage, usages)?;
            m.custody
                .settle(caller, &quote.payment_mint, quote.payment, &usage.collector)?;
            m.book.usage_invalidator_mut(&usage_id)?.total_usages = Some(quote.new_value);

            info!(
                escrow = %escrow_id,
                usages,
                payment = quote.payment,
                total_usages = quote.new_value,
                "Usage budget extended"
            );
            Ok(quote)
        })
    }

    /// Issuer moves the hard cap forward
    pub fn update_max_expiration(
        &mut self,
        caller: &WalletId,
        escrow_id: &EscrowId,
        max_expiration: UnixTimestamp,
    ) -> Result<()> {
        let escrow = self.book.require_escrow(escrow_id)?.clone();
        if *caller != escrow.issuer {
            return Err(unauthorized(caller, "update max expiration"));
        }
        let time_id = require_time(&escrow)?;
        let time = self.book.time_invalidator_mut(&time_id)?;
        validate_max_expiration_update(&escrow, time, max_expiration)?;
        time.max_expiration = Some(max_expiration);
        Ok(())
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove a time invalidator whose escrow is gone. Permissionless.
    pub fn close_time_invalidator(&mut self, id: &InvalidatorId) -> Result<CloseOutcome> {
        let escrow = self
            .book
            .time_invalidator(id)
            .map(|t| t.escrow)
            .ok_or_else(|| LeaseholdError::InvalidatorNotFound {
                invalidator_id: id.to_string(),
            })?;
        if self.book.escrow(&escrow).is_some() {
            return Ok(CloseOutcome::Retained);
        }
        self.book.remove_time_invalidator(id);
        debug!(invalidator = %id, "Time invalidator closed");
        Ok(CloseOutcome::Closed)
    }

    /// Remove a usage invalidator whose escrow is gone. Permissionless.
    pub fn close_usage_invalidator(&mut self, id: &InvalidatorId) -> Result<CloseOutcome> {
        let escrow = self
            .book
            .usage_invalidator(id)
            .map(|u| u.escrow)
            .ok_or_else(|| LeaseholdError::InvalidatorNotFound {
                invalidator_id: id.to_string(),
            })?;
        if self.book.escrow(&escrow).is_some() {
            return Ok(CloseOutcome::Retained);
        }
        self.book.remove_usage_invalidator(id);
        debug!(invalidator = %id, "Usage invalidator closed");
        Ok(CloseOutcome::Closed)
    }
}

fn require_state(escrow: &EscrowRecord, state: EscrowState, operation: &str) -> Result<()> {
    if escrow.state == state {
        Ok(())
    } else {
        Err(invalid_state(escrow, operation))
    }
}

fn require_time(escrow: &EscrowRecord) -> Result<InvalidatorId> {
    escrow
        .time_invalidator()
        .ok_or_else(|| LeaseholdError::InvalidatorNotFound {
            invalidator_id: format!("time invalidator of {}", escrow.id),
        })
}

fn require_usage(escrow: &EscrowRecord) -> Result<InvalidatorId> {
    escrow
        .usage_invalidator()
        .ok_or_else(|| LeaseholdError::InvalidatorNotFound {
            invalidator_id: format!("usage invalidator of {}", escrow.id),
        })
}

fn invalid_state(escrow: &EscrowRecord, operation: &str) -> LeaseholdError {
    LeaseholdError::InvalidState {
        escrow_id: escrow.id.to_string(),
        state: escrow.state.to_string(),
        operation: operation.to_string(),
    }
}

fn unauthorized(caller: &WalletId, operation: &str) -> LeaseholdError {
    LeaseholdError::Unauthorized {
        caller: caller.to_string(),
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::Vault;
    use leasehold_types::*;

    struct Fixture {
        machine: RentalStateMachine<Vault>,
        issuer: WalletId,
        recipient: WalletId,
        mint: MintId,
        payment_mint: MintId,
    }

    impl Fixture {
        fn new() -> Self {
            let issuer = WalletId::new();
            let recipient = WalletId::new();
            let mint = MintId::new();
            let payment_mint = MintId::new();

            let mut machine = RentalStateMachine::new(Vault::new());
            machine.custody_mut().mint_to(&issuer, &mint, 1).unwrap();
            machine.custody_mut().mint_to(&recipient, &payment_mint, 100).unwrap();

            Self {
                machine,
                issuer,
                recipient,
                mint,
                payment_mint,
            }
        }

        fn request(&self) -> IssueRequestBuilder {
            IssueRequest::builder(self.issuer, self.mint, 1)
        }

        fn issue(&mut self, request: IssueRequest) -> EscrowId {
            let id = EscrowId::new();
            self.machine.issue(&self.issuer, id, request, 0).unwrap();
            id
        }

        fn balance(&self, owner: &WalletId, mint: &MintId) -> u64 {
            self.machine
                .custody()
                .balance(&TokenAccountId::associated(owner, mint))
        }
    }

    #[test]
    fn test_issue_moves_asset_into_custody() {
        let mut f = Fixture::new();
        let request = f.request().time(TimePolicy::relative(60)).build().unwrap();
        let id = f.issue(request);

        let escrow = f.machine.book().escrow(&id).unwrap().clone();
        assert_eq!(escrow.state, EscrowState::Issued);
        assert_eq!(f.machine.custody().balance(&escrow.custody_account), 1);
        assert_eq!(f.balance(&f.issuer, &f.mint), 0);
        assert!(f.machine.book().time_invalidator(&InvalidatorId::time_for(&id)).is_some());
    }

    #[test]
    fn test_issue_requires_custody() {
        let mut f = Fixture::new();
        let request = IssueRequest::builder(f.issuer, f.mint, 5).build().unwrap();
        let result = f.machine.issue(&f.issuer, EscrowId::new(), request, 0);
        assert!(matches!(result, Err(LeaseholdError::InsufficientCustody { .. })));

        let request = f.request().build().unwrap();
        let result = f.machine.issue(&f.recipient, EscrowId::new(), request, 0);
        assert!(matches!(result, Err(LeaseholdError::Unauthorized { .. })));
    }

    #[test]
    fn test_issue_requires_freezable_mint() {
        let mut f = Fixture::new();
        let mint = f.mint;
        f.machine.custody_mut().set_mint_freezable(mint, false);

        let request = f.request().build().unwrap();
        let result = f.machine.issue(&f.issuer, EscrowId::new(), request, 0);
        assert!(matches!(result, Err(LeaseholdError::FreezeUnavailable { .. })));

        let request = f.request().kind(EscrowKind::Unmanaged).build().unwrap();
        assert!(f.machine.issue(&f.issuer, EscrowId::new(), request, 0).is_ok());
    }

    #[test]
    fn test_claim_then_invalidate_returns_asset() {
        let mut f = Fixture::new();
        let request = f.request().time(TimePolicy::relative(1)).build().unwrap();
        let id = f.issue(request);

        let claimed = f.machine.claim(&f.recipient, &id, 100).unwrap();
        assert_eq!(claimed.state, EscrowState::Claimed);
        assert_eq!(claimed.state_changed_at, 100);
        let recipient_account = claimed.recipient_token_account.unwrap();
        assert!(f.machine.custody().token_account(&recipient_account).unwrap().frozen);

        let early = f.machine.invalidate(&f.recipient, &id, 100);
        assert!(matches!(early, Err(LeaseholdError::NotExpired { .. })));

        let outcome = f.machine.invalidate(&f.recipient, &id, 102).unwrap();
        assert!(matches!(outcome, InvalidationOutcome::Returned { .. }));
        assert_eq!(f.balance(&f.issuer, &f.mint), 1);
        assert!(f.machine.book().escrow(&id).is_none());

        // Second call on a removed escrow
        let again = f.machine.invalidate(&f.recipient, &id, 200);
        assert!(matches!(again, Err(LeaseholdError::EscrowNotFound { .. })));
    }

    #[test]
    fn test_invalidate_type_burns() {
        let mut f = Fixture::new();
        let request = f
            .request()
            .invalidation_type(InvalidationType::Invalidate)
            .time(TimePolicy::fixed(10))
            .build()
            .unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 1).unwrap();

        assert_eq!(f.machine.invalidate(&f.issuer, &id, 10).unwrap(), InvalidationOutcome::Burned);
        assert_eq!(f.balance(&f.recipient, &f.mint), 0);
        assert_eq!(f.balance(&f.issuer, &f.mint), 0);
    }

    #[test]
    fn test_reissue_loop() {
        let mut f = Fixture::new();
        let usage = UsagePolicy::limited(1);
        let request = f
            .request()
            .invalidation_type(InvalidationType::Reissue)
            .time(TimePolicy::relative(10))
            .usage(usage)
            .build()
            .unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 0).unwrap();
        f.machine.increment_usages(&f.recipient, &id, 1).unwrap();

        assert_eq!(f.machine.invalidate(&f.recipient, &id, 10).unwrap(), InvalidationOutcome::Reissued);
        let escrow = f.machine.book().escrow(&id).unwrap().clone();
        assert_eq!(escrow.state, EscrowState::Issued);
        assert_eq!(escrow.state_changed_at, 10);
        assert_eq!(escrow.recipient_token_account, None);
        assert_eq!(f.machine.custody().balance(&escrow.custody_account), 1);
        assert_eq!(
            f.machine.book().usage_invalidator(&InvalidatorId::usage_for(&id)).unwrap().usages,
            0
        );

        // A new recipient claims exactly as the first did
        let second = WalletId::new();
        let claimed = f.machine.claim(&second, &id, 20).unwrap();
        assert_eq!(claimed.state, EscrowState::Claimed);
        assert_eq!(f.balance(&second, &f.mint), 1);
        assert!(matches!(
            f.machine.invalidate(&second, &id, 25),
            Err(LeaseholdError::NotExpired { .. })
        ));
    }

    #[test]
    fn test_draft_commits_only_when_kept() {
        let mut f = Fixture::new();
        let request = f.request().time(TimePolicy::relative(10)).build().unwrap();
        let id = f.issue(request);

        let mut draft = f.machine.draft();
        assert!(draft.is_draft());
        draft.claim(&f.recipient, &id, 0).unwrap();
        // A failed step inside the draft leaves the live machine alone
        assert!(draft.invalidate(&f.recipient, &id, 1).is_err());
        assert_eq!(f.machine.book().escrow(&id).unwrap().state, EscrowState::Issued);

        f.machine.commit(draft);
        assert!(!f.machine.is_draft());
        assert_eq!(f.machine.book().escrow(&id).unwrap().state, EscrowState::Claimed);
    }

    #[test]
    fn test_reissued_fixed_expiration_needs_a_claim() {
        let mut f = Fixture::new();
        let request = f
            .request()
            .invalidation_type(InvalidationType::Reissue)
            .time(TimePolicy::fixed(5))
            .build()
            .unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 0).unwrap();
        assert_eq!(f.machine.invalidate(&f.recipient, &id, 10).unwrap(), InvalidationOutcome::Reissued);

        assert!(matches!(
            f.machine.invalidate(&f.recipient, &id, 20),
            Err(LeaseholdError::NotExpired { .. })
        ));
        let escrow = f.machine.book().escrow(&id).unwrap();
        assert_eq!(escrow.state, EscrowState::Issued);
        assert_eq!(f.machine.custody().balance(&escrow.custody_account), 1);
    }

    #[test]
    fn test_paid_claim_is_atomic() {
        let mut f = Fixture::new();
        let claim = ClaimPolicy {
            payment_mint: f.payment_mint,
            payment_amount: 150,
            collector: None,
        };
        let request = f.request().paid_claim(claim).build().unwrap();
        let id = f.issue(request);

        let result = f.machine.claim(&f.recipient, &id, 0);
        assert!(matches!(result, Err(LeaseholdError::PaymentFailed { .. })));
        let escrow = f.machine.book().escrow(&id).unwrap();
        assert_eq!(escrow.state, EscrowState::Issued);
        assert_eq!(f.machine.custody().balance(&escrow.custody_account), 1);
        assert_eq!(f.balance(&f.recipient, &f.payment_mint), 100);
    }

    #[test]
    fn test_paid_claim_pays_collector() {
        let mut f = Fixture::new();
        let claim = ClaimPolicy {
            payment_mint: f.payment_mint,
            payment_amount: 30,
            collector: None,
        };
        let request = f.request().paid_claim(claim).build().unwrap();
        let id = f.issue(request);

        f.machine.claim(&f.recipient, &id, 0).unwrap();
        assert_eq!(f.balance(&f.issuer, &f.payment_mint), 30);
        assert_eq!(f.balance(&f.recipient, &f.payment_mint), 70);
    }

    #[test]
    fn test_manual_only_escrow() {
        let mut f = Fixture::new();
        let request = f.request().build().unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 0).unwrap();

        assert!(matches!(
            f.machine.invalidate(&f.recipient, &id, 1_000_000),
            Err(LeaseholdError::Unauthorized { .. })
        ));
        assert!(f.machine.invalidate(&f.issuer, &id, 0).is_ok());
    }

    #[test]
    fn test_expired_unclaimed_escrow_returns_to_issuer() {
        let mut f = Fixture::new();
        let request = f
            .request()
            .invalidation_type(InvalidationType::Reissue)
            .time(TimePolicy::relative(1_000).max_expiration(50))
            .build()
            .unwrap();
        let id = f.issue(request);

        assert!(matches!(
            f.machine.invalidate(&f.recipient, &id, 49),
            Err(LeaseholdError::NotExpired { .. })
        ));
        let outcome = f.machine.invalidate(&f.recipient, &id, 50).unwrap();
        assert!(matches!(outcome, InvalidationOutcome::Returned { .. }));
        assert_eq!(f.balance(&f.issuer, &f.mint), 1);
    }

    #[test]
    fn test_use_authority() {
        let mut f = Fixture::new();
        let authority = WalletId::new();
        let request = f
            .request()
            .usage(UsagePolicy::limited(2).use_authority(authority))
            .build()
            .unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 0).unwrap();

        assert!(matches!(
            f.machine.increment_usages(&f.recipient, &id, 1),
            Err(LeaseholdError::Unauthorized { .. })
        ));
        assert_eq!(f.machine.increment_usages(&authority, &id, 2).unwrap(), 2);
        assert!(matches!(
            f.machine.increment_usages(&authority, &id, 1),
            Err(LeaseholdError::InsufficientUsages { usages: 2, total: 2, requested: 1 })
        ));
    }

    #[test]
    fn test_usage_extension() {
        let mut f = Fixture::new();
        let extension = UsageExtension {
            payment_amount: 1,
            extension_usages: 1,
            payment_mint: f.payment_mint,
            max_usages: Some(4),
        };
        let request = f
            .request()
            .usage(UsagePolicy::limited(1).extension(extension))
            .build()
            .unwrap();
        let id = f.issue(request);

        // Nothing to extend until someone holds the asset
        assert!(matches!(
            f.machine.extend_usages(&f.recipient, &id, 1),
            Err(LeaseholdError::InvalidState { .. })
        ));
        f.machine.claim(&f.recipient, &id, 0).unwrap();

        let quote = f.machine.extend_usages(&f.recipient, &id, 1).unwrap();
        assert_eq!(quote.new_value, 2);
        assert_eq!(f.balance(&f.issuer, &f.payment_mint), 1);

        let result = f.machine.extend_usages(&f.recipient, &id, 3);
        assert!(matches!(result, Err(LeaseholdError::ExceedsMaxUsages { requested: 5, .. })));
        // Refused before anything was charged
        assert_eq!(f.balance(&f.recipient, &f.payment_mint), 99);
    }

    #[test]
    fn test_time_extension_and_max_expiration() {
        let mut f = Fixture::new();
        let extension = TimeExtension {
            payment_amount: 2,
            duration_seconds: 1_000,
            payment_mint: f.payment_mint,
            disable_partial_extension: false,
        };
        let request = f
            .request()
            .time(TimePolicy::relative(100).max_expiration(2_000).extension(extension))
            .build()
            .unwrap();
        let id = f.issue(request);
        f.machine.claim(&f.recipient, &id, 0).unwrap();

        let quote = f.machine.extend_expiration(&f.recipient, &id, 500).unwrap();
        assert_eq!(quote.payment, 1);
        assert_eq!(quote.new_value, 600);

        assert!(matches!(
            f.machine.extend_expiration(&f.recipient, &id, 2_000),
            Err(LeaseholdError::ExceedsMaxExpiration { .. })
        ));

        assert!(f.machine.update_max_expiration(&f.recipient, &id, 5_000).is_err());
        assert!(matches!(
            f.machine.update_max_expiration(&f.issuer, &id, 1_000),
            Err(LeaseholdError::InvalidMaxExpiration { .. })
        ));
        f.machine.update_max_expiration(&f.issuer, &id, 5_000).unwrap();
        assert!(f.machine.extend_expiration(&f.recipient, &id, 2_000).is_ok());
    }

    #[test]
    fn test_update_invalidation_type_issuer_only() {
        let mut f = Fixture::new();
        let request = f.request().build().unwrap();
        let id = f.issue(request);

        assert!(f
            .machine
            .update_invalidation_type(&f.recipient, &id, InvalidationType::Invalidate)
            .is_err());
        let updated = f
            .machine
            .update_invalidation_type(&f.issuer, &id, InvalidationType::Invalidate)
            .unwrap();
        assert_eq!(updated.invalidation_type, InvalidationType::Invalidate);
        assert_eq!(updated.state, EscrowState::Issued);
    }

    #[test]
    fn test_unissue() {
        let mut f = Fixture::new();
        let request = f.request().time(TimePolicy::relative(10)).build().unwrap();
        let id = f.issue(request);

        assert!(f.machine.unissue(&f.recipient, &id).is_err());
        f.machine.unissue(&f.issuer, &id).unwrap();
        assert_eq!(f.balance(&f.issuer, &f.mint), 1);
        assert!(f.machine.book().time_invalidator(&InvalidatorId::time_for(&id)).is_none());
    }

    #[test]
    fn test_close_invalidator_only_when_orphaned() {
        let mut f = Fixture::new();
        let request = f.request().time(TimePolicy::relative(1)).build().unwrap();
        let id = f.issue(request);
        let time_id = InvalidatorId::time_for(&id);

        assert_eq!(f.machine.close_time_invalidator(&time_id).unwrap(), CloseOutcome::Retained);

        f.machine.claim(&f.recipient, &id, 0).unwrap();
        f.machine.invalidate(&f.recipient, &id, 5).unwrap();
        assert_eq!(f.machine.close_time_invalidator(&time_id).unwrap(), CloseOutcome::Closed);
        assert!(matches!(
            f.machine.close_time_invalidator(&time_id),
            Err(LeaseholdError::InvalidatorNotFound { .. })
        ));
    }
}
