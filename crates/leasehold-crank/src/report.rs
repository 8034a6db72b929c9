//! Run reports

use std::fmt;

use chrono::{DateTime, Utc};
use leasehold_types::{EscrowId, InvalidatorRef, OperationId, UnixTimestamp};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidates::MalformedAccount;
use crate::clock::ClockSource;

/// What happened to one processed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Invalidated,
    SkippedNotExpired,
    SkippedError,
    ClosedOrphan,
    /// Its batch could not be submitted
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalidated => write!(f, "invalidated"),
            Self::SkippedNotExpired => write!(f, "skipped-not-expired"),
            Self::SkippedError => write!(f, "skipped-error"),
            Self::ClosedOrphan => write!(f, "closed-orphan"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The record an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Escrow(EscrowId),
    Orphan(InvalidatorRef),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escrow(id) => write!(f, "{}", id),
            Self::Orphan(invalidator) => write!(f, "orphan {}", invalidator),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReport {
    pub subject: Subject,
    pub batch: usize,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    /// Landed; `slot` is unknown when a retry found it already processed
    Submitted { operation: OperationId, slot: Option<u64> },
    /// Nothing in the batch needed an operation
    Empty,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub members: usize,
    /// Submission attempts, including resubmissions after a member was dropped
    pub attempts: u32,
    #[serde(flatten)]
    pub status: BatchStatus,
}

impl BatchReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed { .. })
    }
}

/// Result of one crank run against one ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Label of the ledger endpoint
    pub ledger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clock_source: ClockSource,
    pub clock_anchor: UnixTimestamp,
    pub entries: Vec<EntryReport>,
    pub batches: Vec<BatchReport>,
    pub malformed: Vec<MalformedAccount>,
    /// Entries beyond `max_batches`, left for the next run
    pub deferred: usize,
}

impl RunReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn operations_submitted(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.status, BatchStatus::Submitted { .. }))
            .count()
    }

    /// No entry errored and no batch failed
    pub fn is_clean(&self) -> bool {
        self.entries
            .iter()
            .all(|e| !matches!(e.outcome, Outcome::Failed | Outcome::SkippedError))
            && !self.batches.iter().any(BatchReport::is_failed)
    }

    pub fn outcome_for(&self, subject: &Subject) -> Option<Outcome> {
        self.entries
            .iter()
            .find(|e| e.subject == *subject)
            .map(|e| e.outcome)
    }

    pub fn log_summary(&self) {
        let failed_batches = self.batches.iter().filter(|b| b.is_failed()).count();
        if self.is_clean() {
            info!(
                ledger = %self.ledger,
                clock_source = ?self.clock_source,
                invalidated = self.count(Outcome::Invalidated),
                closed_orphans = self.count(Outcome::ClosedOrphan),
                not_expired = self.count(Outcome::SkippedNotExpired),
                operations = self.operations_submitted(),
                malformed = self.malformed.len(),
                deferred = self.deferred,
                "Crank run complete"
            );
        } else {
            warn!(
                ledger = %self.ledger,
                clock_source = ?self.clock_source,
                invalidated = self.count(Outcome::Invalidated),
                skipped_error = self.count(Outcome::SkippedError),
                failed = self.count(Outcome::Failed),
                failed_batches,
                operations = self.operations_submitted(),
                "Crank run complete with errors"
            );
        }
    }
}
