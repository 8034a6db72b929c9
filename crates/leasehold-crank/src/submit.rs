//! Bounded-retry submission
//!
//! Only transient failures are retried. The same signed operation is
//! resubmitted each time, so a retry after a lost acknowledgement shows up
//! as a duplicate and is counted as landed. Reads made while building a
//! batch go through the same budget.

use std::future::Future;
use std::time::Duration;

use leasehold_ledger::{Commitment, LedgerError, LedgerWriter, SignedOperation};
use leasehold_types::OperationId;
use tracing::{debug, warn};

use crate::config::CrankConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub budget: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrankConfig) -> Self {
        Self {
            budget: config.retry_budget,
            backoff: config.retry_backoff(),
        }
    }

    /// Linear backoff before retry number `attempt`
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub operation: OperationId,
    pub signature: String,
    /// `None` when a retry found the operation already processed
    pub slot: Option<u64>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SubmitFailure {
    pub error: LedgerError,
    pub attempts: u32,
}

/// Submit `signed`, retrying transient failures up to the policy's budget
pub async fn submit_with_retry(
    writer: &dyn LedgerWriter,
    signed: &SignedOperation,
    commitment: Commitment,
    policy: &RetryPolicy,
) -> Result<Submitted, SubmitFailure> {
    let operation = signed.operation.id;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match writer.submit(signed, commitment).await {
            Ok(receipt) => {
                debug!(operation = %operation, slot = receipt.slot, attempts, "Operation landed");
                return Ok(Submitted {
                    operation,
                    signature: receipt.signature,
                    slot: Some(receipt.slot),
                    attempts,
                });
            }
            Err(LedgerError::Duplicate { .. }) if attempts > 1 => {
                debug!(operation = %operation, attempts, "Operation already processed by an earlier attempt");
                return Ok(Submitted {
                    operation,
                    signature: signed.signature.clone(),
                    slot: None,
                    attempts,
                });
            }
            Err(e) if e.is_transient() && attempts <= policy.budget => {
                let delay = policy.delay(attempts);
                warn!(
                    operation = %operation,
                    attempt = attempts,
                    budget = policy.budget,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Submission failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(SubmitFailure { error, attempts }),
        }
    }
}

/// Run a ledger read, retrying transient failures up to the policy's budget
pub async fn read_with_retry<T, F, Fut>(what: &str, policy: &RetryPolicy, mut read: F) -> Result<T, SubmitFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = leasehold_ledger::Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match read().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempts <= policy.budget => {
                let delay = policy.delay(attempts);
                warn!(
                    read = what,
                    attempt = attempts,
                    budget = policy.budget,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Ledger read failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(SubmitFailure { error, attempts }),
        }
    }
}
