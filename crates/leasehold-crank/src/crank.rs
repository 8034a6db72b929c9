//! The invalidation crank
//!
//! One [`InvalidationCrank::run`] samples the clock, fetches candidates,
//! partitions them and drives every batch to a result. Batches never share
//! an escrow, so they need no coordination with each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use leasehold_ledger::{Commitment, Credential, LedgerReader, LedgerWriter, Operation};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::candidates::{fetch_candidates, CandidateSet};
use crate::clock::ClockReconciler;
use crate::config::{CrankConfig, Scheduling};
use crate::error::Result;
use crate::plan::{self, Batch, Entry};
use crate::report::{BatchReport, BatchStatus, EntryReport, Outcome, RunReport, Subject};
use crate::submit::{read_with_retry, submit_with_retry, RetryPolicy};

/// Everything a run needs from the outside, passed in explicitly
#[derive(Clone)]
pub struct RunContext {
    /// Name of the ledger endpoint, for logs and the report
    pub label: String,
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    /// Identity every submitted operation is signed as
    pub credential: Arc<dyn Credential>,
}

impl RunContext {
    pub fn new(
        label: impl Into<String>,
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
        credential: Arc<dyn Credential>,
    ) -> Self {
        Self {
            label: label.into(),
            reader,
            writer,
            credential,
        }
    }

    /// Context for a ledger that both reads and writes
    pub fn for_ledger<L>(label: impl Into<String>, ledger: Arc<L>, credential: Arc<dyn Credential>) -> Self
    where
        L: LedgerReader + LedgerWriter + 'static,
    {
        Self::new(label, ledger.clone(), ledger, credential)
    }
}

struct BatchResult {
    report: BatchReport,
    entries: Vec<EntryReport>,
}

impl BatchResult {
    /// Every member failed without the batch ever being submitted
    fn failed(batch: usize, subjects: Vec<Subject>, error: String) -> Self {
        let entries = subjects
            .into_iter()
            .map(|subject| EntryReport {
                subject,
                batch,
                outcome: Outcome::Failed,
                detail: Some(error.clone()),
            })
            .collect::<Vec<_>>();
        Self {
            report: BatchReport {
                index: batch,
                members: entries.len(),
                attempts: 0,
                status: BatchStatus::Failed { error },
            },
            entries,
        }
    }
}

/// Drives one batch; cheap to clone into a task
#[derive(Clone)]
struct BatchWorker {
    ctx: RunContext,
    clock: ClockReconciler,
    retry: RetryPolicy,
    commitment: Commitment,
}

impl BatchWorker {
    async fn process(&self, batch: Batch) -> BatchResult {
        let Batch { index, entries } = batch;
        let members = entries.len();
        let now = self.clock.now();

        let destinations = plan::destinations_needed(&entries, now);
        let accounts = if destinations.is_empty() {
            HashMap::new()
        } else {
            let reader = self.ctx.reader.as_ref();
            let ids = destinations.as_slice();
            let lookup = read_with_retry("destination accounts", &self.retry, || reader.get_token_accounts(ids)).await;
            // Members that needed a destination are skipped when it stays unresolved
            match lookup {
                Ok(found) if found.len() == destinations.len() => destinations.into_iter().zip(found).collect(),
                Ok(found) => {
                    warn!(batch = index, asked = destinations.len(), got = found.len(), "Destination lookup misaligned");
                    HashMap::new()
                }
                Err(failure) => {
                    warn!(
                        batch = index,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Destination lookup failed"
                    );
                    HashMap::new()
                }
            }
        };

        let mut batch_plan = plan::build_batch(index, entries, now, &accounts);
        let mut attempts = 0;

        let status = loop {
            if batch_plan.is_empty() {
                break BatchStatus::Empty;
            }
            let (instructions, owners) = batch_plan.instructions();
            let operation = Operation::new(self.ctx.credential.wallet(), instructions);
            let signed = match self.ctx.credential.sign(operation) {
                Ok(signed) => signed,
                Err(e) => break BatchStatus::Failed { error: e.to_string() },
            };

            match submit_with_retry(self.ctx.writer.as_ref(), &signed, self.commitment, &self.retry).await {
                Ok(submitted) => {
                    attempts += submitted.attempts;
                    info!(
                        ledger = %self.ctx.label,
                        batch = index,
                        operation = %submitted.operation,
                        attempts = submitted.attempts,
                        "Batch submitted"
                    );
                    break BatchStatus::Submitted {
                        operation: submitted.operation,
                        slot: submitted.slot,
                    };
                }
                Err(failure) => {
                    attempts += failure.attempts;
                    // The ledger refused one member; drop it and resubmit the rest
                    if let Some(member) = failure.error.rejected_index().and_then(|i| owners.get(i).copied()) {
                        let outcome = if failure.error.is_policy_rejection() {
                            Outcome::SkippedNotExpired
                        } else {
                            Outcome::SkippedError
                        };
                        warn!(
                            batch = index,
                            member = %batch_plan.members[member].subject,
                            outcome = %outcome,
                            error = %failure.error,
                            "Ledger rejected member, resubmitting without it"
                        );
                        batch_plan.skip(member, outcome, failure.error.to_string());
                        continue;
                    }
                    error!(
                        ledger = %self.ctx.label,
                        batch = index,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Batch failed"
                    );
                    break BatchStatus::Failed {
                        error: failure.error.to_string(),
                    };
                }
            }
        };

        let entries = batch_plan.finish(&status);
        BatchResult {
            report: BatchReport {
                index,
                members,
                attempts,
                status,
            },
            entries,
        }
    }
}

/// Scans outstanding invalidators and drives expired escrows to completion
#[derive(Debug, Clone)]
pub struct InvalidationCrank {
    config: CrankConfig,
}

impl InvalidationCrank {
    pub fn new(config: CrankConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CrankConfig {
        &self.config
    }

    /// Run once against one ledger.
    ///
    /// Fails only when the candidate list cannot be fetched. Everything
    /// after that is reported per batch and per entry.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(ledger = %ctx.label, wallet = %ctx.credential.wallet(), "Starting crank run");

        let clock = ClockReconciler::sample(ctx.reader.as_ref()).await;
        let CandidateSet {
            escrows,
            orphans,
            malformed,
        } = fetch_candidates(ctx.reader.as_ref(), &self.config).await?;

        let entries: Vec<Entry> = escrows
            .into_iter()
            .map(Entry::Escrow)
            .chain(orphans.into_iter().map(Entry::Orphan))
            .collect();
        let partition = plan::partition(
            entries,
            self.config.batch_size,
            self.config.max_batches,
            self.config.shuffle,
        );
        debug!(ledger = %ctx.label, batches = partition.batches.len(), "Partitioned candidates");

        let worker = BatchWorker {
            ctx: ctx.clone(),
            clock: clock.clone(),
            retry: RetryPolicy::from_config(&self.config),
            commitment: self.config.commitment,
        };
        let mut results = match self.config.scheduling {
            Scheduling::Sequential => {
                let mut results = Vec::with_capacity(partition.batches.len());
                for batch in partition.batches {
                    results.push(worker.process(batch).await);
                }
                results
            }
            Scheduling::Concurrent { max_in_flight } => {
                run_concurrent(&worker, partition.batches, max_in_flight).await
            }
        };
        results.sort_by_key(|r| r.report.index);

        let mut report = RunReport {
            ledger: ctx.label.clone(),
            started_at,
            finished_at: Utc::now(),
            clock_source: clock.source(),
            clock_anchor: clock.anchor(),
            entries: Vec::new(),
            batches: Vec::with_capacity(results.len()),
            malformed,
            deferred: partition.deferred,
        };
        for result in results {
            report.entries.extend(result.entries);
            report.batches.push(result.report);
        }
        report.log_summary();
        Ok(report)
    }
}

/// One task per batch, at most `max_in_flight` running at once, all joined
async fn run_concurrent(worker: &BatchWorker, batches: Vec<Batch>, max_in_flight: usize) -> Vec<BatchResult> {
    let semaphore = Arc::new(Semaphore::new(max_in_flight));

    let tasks = batches.into_iter().map(|batch| {
        let index = batch.index;
        let subjects = batch.entries.iter().map(Entry::subject).collect::<Vec<_>>();
        let worker = worker.clone();
        let semaphore = semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(e.to_string()),
            };
            Ok(worker.process(batch).await)
        });
        async move {
            match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => BatchResult::failed(index, subjects, e),
                Err(e) => {
                    error!(batch = index, error = %e, "Batch task aborted");
                    BatchResult::failed(index, subjects, e.to_string())
                }
            }
        }
    });

    join_all(tasks).await
}
