//! Shared fixtures for crank integration tests

#![allow(dead_code)]

use std::sync::Arc;

use leasehold_crank::{CrankConfig, RunContext, Scheduling};
use leasehold_ledger::{Credential, InMemoryLedger, Instruction, KeypairCredential, OperationReceipt};
use leasehold_types::{EscrowId, IssueRequest, IssueRequestBuilder, MintId};

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub issuer: KeypairCredential,
    pub recipient: KeypairCredential,
    pub cranker: Arc<KeypairCredential>,
}

pub struct Issued {
    pub escrow: EscrowId,
    pub mint: MintId,
}

impl Harness {
    pub fn new(clock: i64) -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new(clock)),
            issuer: KeypairCredential::generate(),
            recipient: KeypairCredential::generate(),
            cranker: Arc::new(KeypairCredential::generate()),
        }
    }

    /// Issue one unit of a fresh mint, shaped by `configure`
    pub async fn issue(&self, configure: impl FnOnce(IssueRequestBuilder) -> IssueRequestBuilder) -> Issued {
        let mint = MintId::new();
        self.ledger.mint_to(&self.issuer.wallet(), &mint, 1).await.unwrap();
        let escrow = EscrowId::new();
        let request = configure(IssueRequest::builder(self.issuer.wallet(), mint, 1))
            .build()
            .unwrap();
        self.ledger
            .execute(&self.issuer, vec![Instruction::Issue { escrow, request }])
            .await
            .unwrap();
        Issued { escrow, mint }
    }

    /// Issue, then claim as the recipient so the time policy is running
    pub async fn issue_claimed(&self, configure: impl FnOnce(IssueRequestBuilder) -> IssueRequestBuilder) -> Issued {
        let issued = self.issue(configure).await;
        self.claim(issued.escrow).await;
        issued
    }

    pub async fn claim(&self, escrow: EscrowId) {
        self.as_recipient(vec![Instruction::Claim { escrow }]).await.unwrap();
    }

    pub async fn as_recipient(&self, instructions: Vec<Instruction>) -> leasehold_ledger::Result<OperationReceipt> {
        self.ledger.execute(&self.recipient, instructions).await
    }

    pub async fn issuer_balance(&self, mint: &MintId) -> u64 {
        self.ledger.associated_balance(&self.issuer.wallet(), mint).await
    }

    pub async fn recipient_balance(&self, mint: &MintId) -> u64 {
        self.ledger.associated_balance(&self.recipient.wallet(), mint).await
    }

    pub fn context(&self) -> RunContext {
        RunContext::for_ledger("memory", self.ledger.clone(), self.cranker.clone())
    }
}

/// Deterministic sequential runs with no retry delay
pub fn sequential() -> CrankConfig {
    CrankConfig {
        scheduling: Scheduling::Sequential,
        shuffle: false,
        retry_backoff_ms: 0,
        ..Default::default()
    }
}

pub fn concurrent(max_in_flight: usize) -> CrankConfig {
    CrankConfig {
        scheduling: Scheduling::Concurrent { max_in_flight },
        retry_backoff_ms: 0,
        ..Default::default()
    }
}
