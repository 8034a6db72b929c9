//! In-memory authoritative ledger
//!
//! Holds the rental state machine behind a lock and applies each submitted
//! operation atomically at the ledger's own clock. Faults can be injected
//! to exercise clients: unavailable clock, failing submissions, failing
//! reads, and accounts that do not decode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use leasehold_escrow::{RentalStateMachine, TokenAccount, Vault};
use leasehold_types::{
    EscrowId, EscrowRecord, InvalidatorId, MintId, OperationId, TimeInvalidator, TokenAccountId,
    UnixTimestamp, UsageInvalidator, WalletId,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::credential::{Credential, SignedOperation};
use crate::error::{LedgerError, Result};
use crate::instruction::{Commitment, Instruction, Operation, OperationReceipt};
use crate::program;
use crate::reader::{Fetched, LedgerReader, LedgerWriter};

struct LedgerState {
    machine: RentalStateMachine<Vault>,
    clock: UnixTimestamp,
    clock_available: bool,
    reads_available: bool,
    failing_submissions: u32,
    malformed_time: Vec<(String, String)>,
    malformed_usage: Vec<(String, String)>,
    malformed_escrows: HashMap<EscrowId, String>,
    processed: HashSet<OperationId>,
    slot: u64,
    submissions: u64,
}

/// In-memory ledger implementing [`LedgerReader`] and [`LedgerWriter`]
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Create an empty ledger whose clock reads `clock`
    pub fn new(clock: UnixTimestamp) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState {
                machine: RentalStateMachine::new(Vault::new()),
                clock,
                clock_available: true,
                reads_available: true,
                failing_submissions: 0,
                malformed_time: Vec::new(),
                malformed_usage: Vec::new(),
                malformed_escrows: HashMap::new(),
                processed: HashSet::new(),
                slot: 0,
                submissions: 0,
            })),
        }
    }

    // ========================================================================
    // Clock
    // ========================================================================

    pub async fn clock(&self) -> UnixTimestamp {
        self.state.read().await.clock
    }

    pub async fn set_clock(&self, clock: UnixTimestamp) {
        self.state.write().await.clock = clock;
    }

    pub async fn advance_clock(&self, seconds: i64) {
        let mut state = self.state.write().await;
        state.clock = state.clock.saturating_add(seconds);
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Make `ledger_time` fail until re-enabled
    pub async fn set_clock_available(&self, available: bool) {
        self.state.write().await.clock_available = available;
    }

    /// Make account listings and lookups fail until re-enabled
    pub async fn set_reads_available(&self, available: bool) {
        self.state.write().await.reads_available = available;
    }

    /// Fail the next `count` submissions as unavailable, before they apply
    pub async fn fail_next_submissions(&self, count: u32) {
        self.state.write().await.failing_submissions = count;
    }

    pub async fn insert_malformed_time_invalidator(&self, address: impl Into<String>, reason: impl Into<String>) {
        self.state
            .write()
            .await
            .malformed_time
            .push((address.into(), reason.into()));
    }

    pub async fn insert_malformed_usage_invalidator(&self, address: impl Into<String>, reason: impl Into<String>) {
        self.state
            .write()
            .await
            .malformed_usage
            .push((address.into(), reason.into()));
    }

    /// Make an escrow read back as undecodable
    pub async fn insert_malformed_escrow(&self, escrow: EscrowId, reason: impl Into<String>) {
        self.state
            .write()
            .await
            .malformed_escrows
            .insert(escrow, reason.into());
    }

    // ========================================================================
    // Seeding and inspection
    // ========================================================================

    /// Credit `amount` of `mint` to the owner's associated account
    pub async fn mint_to(&self, owner: &WalletId, mint: &MintId, amount: u64) -> leasehold_types::Result<TokenAccountId> {
        self.state
            .write()
            .await
            .machine
            .custody_mut()
            .mint_to(owner, mint, amount)
    }

    pub async fn set_mint_freezable(&self, mint: MintId, freezable: bool) {
        self.state
            .write()
            .await
            .machine
            .custody_mut()
            .set_mint_freezable(mint, freezable);
    }

    pub async fn balance(&self, account: &TokenAccountId) -> u64 {
        self.state.read().await.machine.custody().balance(account)
    }

    /// Balance of the owner's associated account for `mint`
    pub async fn associated_balance(&self, owner: &WalletId, mint: &MintId) -> u64 {
        self.balance(&TokenAccountId::associated(owner, mint)).await
    }

    pub async fn escrow(&self, id: &EscrowId) -> Option<EscrowRecord> {
        self.state.read().await.machine.book().escrow(id).cloned()
    }

    pub async fn time_invalidator(&self, id: &InvalidatorId) -> Option<TimeInvalidator> {
        self.state.read().await.machine.book().time_invalidator(id).cloned()
    }

    pub async fn usage_invalidator(&self, id: &InvalidatorId) -> Option<UsageInvalidator> {
        self.state.read().await.machine.book().usage_invalidator(id).cloned()
    }

    /// Submissions received, including failed ones
    pub async fn submission_count(&self) -> u64 {
        self.state.read().await.submissions
    }

    /// Operations that landed
    pub async fn applied_count(&self) -> u64 {
        self.state.read().await.slot
    }

    /// Sign `instructions` as `credential` and submit them
    pub async fn execute(&self, credential: &dyn Credential, instructions: Vec<Instruction>) -> Result<OperationReceipt> {
        let operation = Operation::new(credential.wallet(), instructions);
        let signed = credential.sign(operation)?;
        self.submit(&signed, Commitment::Confirmed).await
    }

    async fn ensure_readable(&self) -> Result<()> {
        if self.state.read().await.reads_available {
            Ok(())
        } else {
            Err(LedgerError::Unavailable {
                message: "reads disabled".to_string(),
            })
        }
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn list_time_invalidators(&self) -> Result<Vec<Fetched<TimeInvalidator>>> {
        self.ensure_readable().await?;
        let state = self.state.read().await;
        let mut accounts: Vec<_> = state
            .machine
            .book()
            .time_invalidators()
            .map(|t| Fetched::parsed(t.id.to_string(), t.clone()))
            .collect();
        accounts.extend(state.malformed_time.iter().map(|(address, reason)| Fetched::Malformed {
            address: address.clone(),
            reason: reason.clone(),
        }));
        accounts.sort_by(|a, b| a.address().cmp(b.address()));
        Ok(accounts)
    }

    async fn list_usage_invalidators(&self) -> Result<Vec<Fetched<UsageInvalidator>>> {
        self.ensure_readable().await?;
        let state = self.state.read().await;
        let mut accounts: Vec<_> = state
            .machine
            .book()
            .usage_invalidators()
            .map(|u| Fetched::parsed(u.id.to_string(), u.clone()))
            .collect();
        accounts.extend(state.malformed_usage.iter().map(|(address, reason)| Fetched::Malformed {
            address: address.clone(),
            reason: reason.clone(),
        }));
        accounts.sort_by(|a, b| a.address().cmp(b.address()));
        Ok(accounts)
    }

    async fn get_escrows(&self, ids: &[EscrowId]) -> Result<Vec<Option<Fetched<EscrowRecord>>>> {
        self.ensure_readable().await?;
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .map(|id| {
                if let Some(reason) = state.malformed_escrows.get(id) {
                    return Some(Fetched::Malformed {
                        address: id.to_string(),
                        reason: reason.clone(),
                    });
                }
                state
                    .machine
                    .book()
                    .escrow(id)
                    .map(|escrow| Fetched::parsed(id.to_string(), escrow.clone()))
            })
            .collect())
    }

    async fn get_token_accounts(&self, ids: &[TokenAccountId]) -> Result<Vec<Option<TokenAccount>>> {
        self.ensure_readable().await?;
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .map(|id| leasehold_escrow::Custody::token_account(state.machine.custody(), id).ok())
            .collect())
    }

    async fn ledger_time(&self) -> Result<UnixTimestamp> {
        let state = self.state.read().await;
        if !state.clock_available {
            return Err(LedgerError::Unavailable {
                message: "clock sample unavailable".to_string(),
            });
        }
        Ok(state.clock)
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn submit(&self, signed: &SignedOperation, commitment: Commitment) -> Result<OperationReceipt> {
        let mut state = self.state.write().await;
        state.submissions += 1;

        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            warn!(operation = %signed.operation.id, "Injected submission failure");
            return Err(LedgerError::Unavailable {
                message: "injected submission failure".to_string(),
            });
        }

        signed.verify()?;
        let operation = &signed.operation;
        if state.processed.contains(&operation.id) {
            return Err(LedgerError::Duplicate {
                operation: operation.id.to_string(),
            });
        }

        let now = state.clock;
        if let Err(e) = program::apply(&mut state.machine, operation, now) {
            debug!(operation = %operation.id, error = %e, "Operation rejected");
            return Err(e);
        }

        state.processed.insert(operation.id);
        state.slot += 1;
        info!(
            operation = %operation.id,
            payer = %operation.payer,
            instructions = operation.instructions.len(),
            slot = state.slot,
            "Operation applied"
        );

        Ok(OperationReceipt {
            operation: operation.id,
            signature: signed.signature.clone(),
            commitment,
            slot: state.slot,
            instructions: operation.instructions.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::KeypairCredential;
    use leasehold_types::{IssueRequest, TimePolicy};

    async fn issued_escrow(ledger: &InMemoryLedger, issuer: &KeypairCredential) -> EscrowId {
        let mint = MintId::new();
        ledger.mint_to(&issuer.wallet(), &mint, 1).await.unwrap();
        let escrow = EscrowId::new();
        let request = IssueRequest::builder(issuer.wallet(), mint, 1)
            .time(TimePolicy::relative(10))
            .build()
            .unwrap();
        ledger
            .execute(issuer, vec![Instruction::Issue { escrow, request }])
            .await
            .unwrap();
        escrow
    }

    #[tokio::test]
    async fn test_execute_applies_operation() {
        let ledger = InMemoryLedger::new(1_000);
        let issuer = KeypairCredential::generate();
        let escrow = issued_escrow(&ledger, &issuer).await;

        let record = ledger.escrow(&escrow).await.unwrap();
        assert_eq!(record.state_changed_at, 1_000);
        assert_eq!(ledger.applied_count().await, 1);

        let listed = ledger.list_time_invalidators().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_operation_does_not_apply() {
        let ledger = InMemoryLedger::new(0);
        let issuer = KeypairCredential::generate();
        let escrow = issued_escrow(&ledger, &issuer).await;
        let recipient = KeypairCredential::generate();

        let result = ledger
            .execute(
                &recipient,
                vec![Instruction::Claim { escrow }, Instruction::Invalidate { escrow }],
            )
            .await;
        let error = result.unwrap_err();
        assert!(error.is_policy_rejection());
        assert_eq!(error.rejected_index(), Some(1));
        assert_eq!(ledger.escrow(&escrow).await.unwrap().recipient_token_account, None);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let ledger = InMemoryLedger::new(0);
        let credential = KeypairCredential::generate();

        ledger.fail_next_submissions(1).await;
        let instructions = vec![Instruction::CreateAssociatedAccount {
            owner: credential.wallet(),
            mint: MintId::new(),
        }];
        let first = ledger.execute(&credential, instructions.clone()).await;
        assert!(first.unwrap_err().is_transient());
        assert!(ledger.execute(&credential, instructions).await.is_ok());
        assert_eq!(ledger.submission_count().await, 2);

        ledger.set_clock_available(false).await;
        assert!(ledger.ledger_time().await.is_err());

        ledger.set_reads_available(false).await;
        assert!(ledger.list_time_invalidators().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_and_forged_operations() {
        let ledger = InMemoryLedger::new(0);
        let credential = KeypairCredential::generate();
        let operation = Operation::new(
            credential.wallet(),
            vec![Instruction::CreateAssociatedAccount {
                owner: credential.wallet(),
                mint: MintId::new(),
            }],
        );
        let signed = credential.sign(operation).unwrap();

        ledger.submit(&signed, Commitment::Finalized).await.unwrap();
        assert!(matches!(
            ledger.submit(&signed, Commitment::Finalized).await,
            Err(LedgerError::Duplicate { .. })
        ));

        let mut forged = signed.clone();
        forged.operation.id = OperationId::new();
        assert!(matches!(
            ledger.submit(&forged, Commitment::Confirmed).await,
            Err(LedgerError::InvalidSignature { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_accounts_listed() {
        let ledger = InMemoryLedger::new(0);
        ledger.insert_malformed_time_invalidator("inv_garbage", "bad discriminator").await;
        let escrow = EscrowId::new();
        ledger.insert_malformed_escrow(escrow, "truncated").await;

        let listed = ledger.list_time_invalidators().await.unwrap();
        assert!(matches!(&listed[0], Fetched::Malformed { address, .. } if address == "inv_garbage"));

        let escrows = ledger.get_escrows(&[escrow, EscrowId::new()]).await.unwrap();
        assert!(matches!(escrows[0], Some(Fetched::Malformed { .. })));
        assert!(escrows[1].is_none());
    }
}
