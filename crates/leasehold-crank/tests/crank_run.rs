//! End-to-end crank runs against the in-memory ledger

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{concurrent, sequential, Harness};
use leasehold_crank::{
    BatchStatus, ClockSource, CrankConfig, CrankError, InvalidationCrank, Outcome, RunContext, Subject,
};
use leasehold_ledger::{
    Fetched, InMemoryLedger, Instruction, LedgerError, LedgerReader, TokenAccount,
};
use leasehold_types::{
    EscrowId, EscrowRecord, EscrowState, InvalidationType, InvalidatorId, InvalidatorRef, TimeInvalidator,
    TimePolicy, TokenAccountId, UsageInvalidator, UsagePolicy,
};

const T0: i64 = 1_000;

#[tokio::test]
async fn test_expires_after_duration_and_returns_asset() {
    let h = Harness::new(T0);
    let issued = h.issue(|b| b.time(TimePolicy::relative(1))).await;
    h.claim(issued.escrow).await;
    assert_eq!(h.issuer_balance(&issued.mint).await, 0);

    let crank = InvalidationCrank::new(sequential()).unwrap();

    // Claimed at T0 with one second to run
    let report = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::SkippedNotExpired)
    );
    assert_eq!(report.operations_submitted(), 0);
    assert!(h.ledger.escrow(&issued.escrow).await.is_some());

    h.ledger.advance_clock(2).await;
    let report = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert!(report.is_clean());
    assert_eq!(report.clock_source, ClockSource::Ledger);

    assert!(h.ledger.escrow(&issued.escrow).await.is_none());
    assert!(h
        .ledger
        .time_invalidator(&InvalidatorId::time_for(&issued.escrow))
        .await
        .is_none());
    assert_eq!(h.issuer_balance(&issued.mint).await, 1);
    assert_eq!(h.recipient_balance(&issued.mint).await, 0);
}

#[tokio::test]
async fn test_empty_ledger_submits_nothing() {
    let h = Harness::new(T0);
    let crank = InvalidationCrank::new(CrankConfig::default()).unwrap();

    let report = crank.run(&h.context()).await.unwrap();
    assert!(report.is_clean());
    assert!(report.entries.is_empty());
    assert!(report.batches.is_empty());
    assert_eq!(report.operations_submitted(), 0);
    assert_eq!(h.ledger.submission_count().await, 0);
}

#[tokio::test]
async fn test_time_and_usage_must_both_expire() {
    let h = Harness::new(T0);
    let issued = h
        .issue(|b| b.time(TimePolicy::relative(10)).usage(UsagePolicy::limited(2)))
        .await;
    h.claim(issued.escrow).await;
    let crank = InvalidationCrank::new(sequential()).unwrap();

    // Time ran out, one use left
    h.ledger.advance_clock(20).await;
    h.as_recipient(vec![Instruction::IncrementUsages {
        escrow: issued.escrow,
        usages: 1,
    }])
    .await
    .unwrap();
    let report = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::SkippedNotExpired)
    );

    h.as_recipient(vec![Instruction::IncrementUsages {
        escrow: issued.escrow,
        usages: 1,
    }])
    .await
    .unwrap();
    let report = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert!(h.ledger.usage_invalidator(&InvalidatorId::usage_for(&issued.escrow)).await.is_none());
}

#[tokio::test]
async fn test_usage_alone_expires_without_time() {
    let h = Harness::new(T0);
    let issued = h.issue(|b| b.usage(UsagePolicy::limited(1))).await;
    h.claim(issued.escrow).await;
    h.as_recipient(vec![Instruction::IncrementUsages {
        escrow: issued.escrow,
        usages: 1,
    }])
    .await
    .unwrap();

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(report.count(Outcome::Invalidated), 1);
    assert_eq!(h.issuer_balance(&issued.mint).await, 1);
}

#[tokio::test]
async fn test_second_run_finds_nothing() {
    let h = Harness::new(T0);
    h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    let crank = InvalidationCrank::new(sequential()).unwrap();

    let first = crank.run(&h.context()).await.unwrap();
    assert_eq!(first.count(Outcome::Invalidated), 1);

    let second = crank.run(&h.context()).await.unwrap();
    assert!(second.entries.is_empty());
    assert_eq!(second.operations_submitted(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new(T0);
    let issued = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    h.ledger.fail_next_submissions(2).await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert_eq!(report.batches[0].attempts, 3);
    assert!(h.ledger.escrow(&issued.escrow).await.is_none());
}

#[tokio::test]
async fn test_concurrent_mode_retries_too() {
    let h = Harness::new(T0);
    let issued = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    h.ledger.fail_next_submissions(2).await;

    let report = InvalidationCrank::new(concurrent(4))
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert_eq!(report.batches[0].attempts, 3);
}

#[tokio::test]
async fn test_failed_batch_does_not_affect_others() {
    let h = Harness::new(T0);
    for _ in 0..2 {
        h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    }
    // One first attempt plus one retry, then the first batch gives up
    h.ledger.fail_next_submissions(2).await;
    let config = CrankConfig {
        batch_size: 1,
        retry_budget: 1,
        ..sequential()
    };

    let report = InvalidationCrank::new(config).unwrap().run(&h.context()).await.unwrap();
    assert_eq!(report.batches.len(), 2);
    assert!(report.batches[0].is_failed());
    assert_eq!(report.batches[0].attempts, 2);
    assert!(matches!(report.batches[1].status, BatchStatus::Submitted { .. }));
    assert_eq!(report.count(Outcome::Failed), 1);
    assert_eq!(report.count(Outcome::Invalidated), 1);
    assert!(!report.is_clean());

    // The failed escrow is untouched and picked up next time
    let Subject::Escrow(failed) = report.entries[0].subject else {
        panic!("expected an escrow");
    };
    assert!(h.ledger.escrow(&failed).await.is_some());
    let retry = InvalidationCrank::new(sequential()).unwrap().run(&h.context()).await.unwrap();
    assert_eq!(retry.outcome_for(&Subject::Escrow(failed)), Some(Outcome::Invalidated));
}

#[tokio::test]
async fn test_malformed_accounts_are_skipped() {
    let h = Harness::new(T0);
    let good = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    let bad = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    h.ledger.insert_malformed_escrow(bad.escrow, "account too short").await;
    h.ledger
        .insert_malformed_usage_invalidator("inv_unreadable", "unknown discriminator")
        .await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(report.outcome_for(&Subject::Escrow(good.escrow)), Some(Outcome::Invalidated));
    assert_eq!(report.outcome_for(&Subject::Escrow(bad.escrow)), None);
    assert_eq!(report.malformed.len(), 2);
    assert!(report.is_clean());
    assert!(h.ledger.escrow(&bad.escrow).await.is_some());
}

#[tokio::test]
async fn test_unavailable_clock_falls_back_to_local_time() {
    let now = Utc::now().timestamp();
    let h = Harness::new(now);
    let issued = h.issue_claimed(|b| b.time(TimePolicy::fixed(now - 60))).await;
    h.ledger.set_clock_available(false).await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(report.clock_source, ClockSource::LocalFallback);
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
}

#[tokio::test]
async fn test_ledger_refusal_drops_only_that_member() {
    // The ledger clock lags far behind local time, so the crank believes
    // more has expired than the ledger does
    let h = Harness::new(T0);
    let expired = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    let not_yet = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 + 500))).await;
    h.ledger.set_clock_available(false).await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.outcome_for(&Subject::Escrow(expired.escrow)), Some(Outcome::Invalidated));
    assert_eq!(
        report.outcome_for(&Subject::Escrow(not_yet.escrow)),
        Some(Outcome::SkippedNotExpired)
    );
    assert_eq!(report.batches[0].attempts, 2);
    assert!(h.ledger.escrow(&not_yet.escrow).await.is_some());
}

#[tokio::test]
async fn test_orphaned_invalidators_are_closed() {
    let h = Harness::new(T0);
    // Time is up but the usage budget is not
    let waiting = h
        .issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1)).usage(UsagePolicy::limited(5)))
        .await;

    // Invalidated directly, leaving its invalidator behind
    let single = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    h.as_recipient(vec![Instruction::Invalidate { escrow: single.escrow }])
        .await
        .unwrap();
    let orphan = InvalidatorId::time_for(&single.escrow);
    assert!(h.ledger.escrow(&single.escrow).await.is_none());
    assert!(h.ledger.time_invalidator(&orphan).await.is_some());

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Orphan(InvalidatorRef::Time(orphan))),
        Some(Outcome::ClosedOrphan)
    );
    assert!(h.ledger.time_invalidator(&orphan).await.is_none());

    assert_eq!(
        report.outcome_for(&Subject::Escrow(waiting.escrow)),
        Some(Outcome::SkippedNotExpired)
    );
    assert!(h
        .ledger
        .time_invalidator(&InvalidatorId::time_for(&waiting.escrow))
        .await
        .is_some());
    assert!(h
        .ledger
        .usage_invalidator(&InvalidatorId::usage_for(&waiting.escrow))
        .await
        .is_some());
}

#[tokio::test]
async fn test_reissue_returns_escrow_to_issued() {
    let h = Harness::new(T0);
    let issued = h
        .issue(|b| {
            b.time(TimePolicy::relative(5))
                .invalidation_type(InvalidationType::Reissue)
        })
        .await;
    h.claim(issued.escrow).await;
    h.ledger.advance_clock(10).await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );

    let escrow = h.ledger.escrow(&issued.escrow).await.unwrap();
    assert_eq!(escrow.state, EscrowState::Issued);
    assert_eq!(escrow.state_changed_at, T0 + 10);
    assert!(h
        .ledger
        .time_invalidator(&InvalidatorId::time_for(&issued.escrow))
        .await
        .is_some());
    assert_eq!(h.recipient_balance(&issued.mint).await, 0);

    // Claimable again, and not expired until the duration runs again
    h.claim(issued.escrow).await;
    assert_eq!(h.recipient_balance(&issued.mint).await, 1);
    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&h.context())
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::SkippedNotExpired)
    );
}

#[tokio::test]
async fn test_concurrent_batches_cover_everything() {
    let h = Harness::new(T0);
    let mut escrows = Vec::new();
    for _ in 0..10 {
        escrows.push(h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await.escrow);
    }
    let config = CrankConfig {
        batch_size: 3,
        ..concurrent(2)
    };

    let report = InvalidationCrank::new(config).unwrap().run(&h.context()).await.unwrap();
    assert_eq!(report.batches.len(), 4);
    assert_eq!(report.operations_submitted(), 4);
    assert_eq!(report.count(Outcome::Invalidated), 10);
    for escrow in escrows {
        assert!(h.ledger.escrow(&escrow).await.is_none());
    }
}

#[tokio::test]
async fn test_batch_limit_defers_the_rest() {
    let h = Harness::new(T0);
    for _ in 0..5 {
        h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    }
    let config = CrankConfig {
        batch_size: 2,
        max_batches: 1,
        ..sequential()
    };
    let crank = InvalidationCrank::new(config).unwrap();

    let first = crank.run(&h.context()).await.unwrap();
    assert_eq!(first.count(Outcome::Invalidated), 2);
    assert_eq!(first.deferred, 3);

    let second = crank.run(&h.context()).await.unwrap();
    assert_eq!(second.count(Outcome::Invalidated), 2);
    assert_eq!(second.deferred, 1);
}

#[tokio::test]
async fn test_unreadable_ledger_fails_the_run() {
    let h = Harness::new(T0);
    h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    h.ledger.set_reads_available(false).await;

    let before = h.ledger.submission_count().await;

    let result = InvalidationCrank::new(sequential()).unwrap().run(&h.context()).await;
    assert!(matches!(result, Err(CrankError::FetchCandidates { .. })));
    assert_eq!(h.ledger.submission_count().await, before);
}

#[tokio::test]
async fn test_reissued_fixed_expiration_waits_for_next_claim() {
    let h = Harness::new(T0);
    let issued = h
        .issue_claimed(|b| {
            b.time(TimePolicy::fixed(T0 + 5))
                .invalidation_type(InvalidationType::Reissue)
        })
        .await;
    h.ledger.advance_clock(10).await;
    let crank = InvalidationCrank::new(sequential()).unwrap();

    let first = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        first.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert_eq!(h.ledger.escrow(&issued.escrow).await.unwrap().state, EscrowState::Issued);

    // The old expiration is past, but nobody holds the asset
    h.ledger.advance_clock(10).await;
    let second = crank.run(&h.context()).await.unwrap();
    assert_eq!(
        second.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::SkippedNotExpired)
    );
    assert_eq!(second.operations_submitted(), 0);
    assert!(h.ledger.escrow(&issued.escrow).await.is_some());
    assert_eq!(h.issuer_balance(&issued.mint).await, 0);
}

/// Reads through to the ledger, failing the first few account lookups
struct FlakyLookups {
    inner: Arc<InMemoryLedger>,
    failures: AtomicU32,
}

#[async_trait]
impl LedgerReader for FlakyLookups {
    async fn list_time_invalidators(&self) -> leasehold_ledger::Result<Vec<Fetched<TimeInvalidator>>> {
        self.inner.list_time_invalidators().await
    }

    async fn list_usage_invalidators(&self) -> leasehold_ledger::Result<Vec<Fetched<UsageInvalidator>>> {
        self.inner.list_usage_invalidators().await
    }

    async fn get_escrows(&self, ids: &[EscrowId]) -> leasehold_ledger::Result<Vec<Option<Fetched<EscrowRecord>>>> {
        self.inner.get_escrows(ids).await
    }

    async fn get_token_accounts(&self, ids: &[TokenAccountId]) -> leasehold_ledger::Result<Vec<Option<TokenAccount>>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::Unavailable {
                message: "connection reset".to_string(),
            });
        }
        self.inner.get_token_accounts(ids).await
    }

    async fn ledger_time(&self) -> leasehold_ledger::Result<i64> {
        self.inner.ledger_time().await
    }
}

fn flaky_context(h: &Harness, failures: u32) -> RunContext {
    let reader = Arc::new(FlakyLookups {
        inner: h.ledger.clone(),
        failures: AtomicU32::new(failures),
    });
    RunContext::new("flaky", reader, h.ledger.clone(), h.cranker.clone())
}

#[tokio::test]
async fn test_destination_lookup_is_retried() {
    let h = Harness::new(T0);
    let issued = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;

    let report = InvalidationCrank::new(sequential())
        .unwrap()
        .run(&flaky_context(&h, 2))
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::Invalidated)
    );
    assert!(report.is_clean());
    assert_eq!(h.issuer_balance(&issued.mint).await, 1);
}

#[tokio::test]
async fn test_unresolved_destination_skips_member() {
    let h = Harness::new(T0);
    let issued = h.issue_claimed(|b| b.time(TimePolicy::fixed(T0 - 1))).await;
    let config = CrankConfig {
        retry_budget: 1,
        ..sequential()
    };

    let report = InvalidationCrank::new(config)
        .unwrap()
        .run(&flaky_context(&h, 5))
        .await
        .unwrap();
    assert_eq!(
        report.outcome_for(&Subject::Escrow(issued.escrow)),
        Some(Outcome::SkippedError)
    );
    assert_eq!(report.operations_submitted(), 0);
    assert!(h.ledger.escrow(&issued.escrow).await.is_some());
}
