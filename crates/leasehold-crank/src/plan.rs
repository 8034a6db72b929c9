//! Batch planning
//!
//! Splits candidates into batches and decides, per member, which
//! instructions go into the batch's operation. Every decision in a batch
//! uses one `now`.

use std::collections::{BTreeSet, HashMap};

use leasehold_ledger::{Instruction, TokenAccount};
use leasehold_policy::{evaluate, Verdict};
use leasehold_types::{
    EscrowRecord, EscrowState, InvalidationType, InvalidatorRef, TokenAccountId, UnixTimestamp,
};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::candidates::{Candidate, Orphan};
use crate::error::CrankError;
use crate::report::{BatchStatus, EntryReport, Outcome, Subject};

/// One unit of work inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Escrow(Candidate),
    Orphan(Orphan),
}

impl Entry {
    pub fn subject(&self) -> Subject {
        match self {
            Self::Escrow(candidate) => Subject::Escrow(candidate.escrow.id),
            Self::Orphan(orphan) => Subject::Orphan(orphan.invalidator),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub batches: Vec<Batch>,
    /// Entries that did not fit in `max_batches`
    pub deferred: usize,
}

/// Split entries into batches of at most `batch_size`, keeping at most
/// `max_batches`. Each entry lands in exactly one batch.
pub fn partition(mut entries: Vec<Entry>, batch_size: usize, max_batches: usize, shuffle: bool) -> Partition {
    if shuffle {
        entries.shuffle(&mut rand::thread_rng());
    }
    let batch_size = batch_size.max(1);
    let capacity = batch_size.saturating_mul(max_batches);
    let deferred = entries.len().saturating_sub(capacity);
    entries.truncate(capacity);

    let mut batches = Vec::with_capacity(entries.len().div_ceil(batch_size));
    let mut entries = entries.into_iter().peekable();
    while entries.peek().is_some() {
        batches.push(Batch {
            index: batches.len(),
            entries: entries.by_ref().take(batch_size).collect(),
        });
    }
    if deferred > 0 {
        warn!(deferred, max_batches, "Batch limit reached, deferring to next run");
    }
    Partition { batches, deferred }
}

/// Where an invalidation will send the asset back to the issuer
fn return_destination(escrow: &EscrowRecord) -> Option<TokenAccountId> {
    let returns = match escrow.invalidation_type {
        InvalidationType::Return => true,
        InvalidationType::Reissue => escrow.state == EscrowState::Issued,
        InvalidationType::Invalidate => false,
    };
    returns.then(|| TokenAccountId::associated(&escrow.issuer, &escrow.mint))
}

fn verdict(candidate: &Candidate, now: UnixTimestamp) -> Verdict {
    evaluate(&candidate.escrow, candidate.time.as_ref(), candidate.usage.as_ref(), now)
}

/// Destination accounts to look up before building a batch at `now`
pub fn destinations_needed(entries: &[Entry], now: UnixTimestamp) -> Vec<TokenAccountId> {
    let needed: BTreeSet<TokenAccountId> = entries
        .iter()
        .filter_map(|entry| match entry {
            Entry::Escrow(candidate) if verdict(candidate, now).is_expired() => {
                return_destination(&candidate.escrow)
            }
            _ => None,
        })
        .collect();
    needed.into_iter().collect()
}

/// Planned handling of one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPlan {
    pub subject: Subject,
    /// Empty when the member is skipped
    pub instructions: Vec<Instruction>,
    /// Outcome if the operation lands, or the reason it was skipped
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl MemberPlan {
    pub fn is_submitting(&self) -> bool {
        !self.instructions.is_empty()
    }

    fn skipped(subject: Subject, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            subject,
            instructions: Vec::new(),
            outcome,
            detail: Some(detail.into()),
        }
    }
}

/// The operation one batch will submit
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub index: usize,
    pub members: Vec<MemberPlan>,
}

impl BatchPlan {
    /// Instructions of every submitting member, in order, with the member
    /// each instruction belongs to
    pub fn instructions(&self) -> (Vec<Instruction>, Vec<usize>) {
        let mut instructions = Vec::new();
        let mut owners = Vec::new();
        for (member, plan) in self.members.iter().enumerate() {
            instructions.extend(plan.instructions.iter().cloned());
            owners.extend(std::iter::repeat(member).take(plan.instructions.len()));
        }
        (instructions, owners)
    }

    pub fn is_empty(&self) -> bool {
        !self.members.iter().any(MemberPlan::is_submitting)
    }

    /// Take a member out of the operation
    pub fn skip(&mut self, member: usize, outcome: Outcome, detail: impl Into<String>) {
        if let Some(plan) = self.members.get_mut(member) {
            plan.instructions.clear();
            plan.outcome = outcome;
            plan.detail = Some(detail.into());
        }
    }

    /// Per-member results once the batch's fate is known
    pub fn finish(self, status: &BatchStatus) -> Vec<EntryReport> {
        let index = self.index;
        self.members
            .into_iter()
            .map(|plan| {
                let (outcome, detail) = match status {
                    BatchStatus::Failed { error } if plan.is_submitting() => (Outcome::Failed, Some(error.clone())),
                    _ => (plan.outcome, plan.detail),
                };
                EntryReport {
                    subject: plan.subject,
                    batch: index,
                    outcome,
                    detail,
                }
            })
            .collect()
    }
}

/// Decide every member of a batch at `now`.
///
/// `accounts` holds the lookups for [`destinations_needed`]; an id with no
/// entry was never looked up. A member that cannot be built is skipped and
/// the rest of the batch goes ahead.
pub fn build_batch(
    index: usize,
    entries: Vec<Entry>,
    now: UnixTimestamp,
    accounts: &HashMap<TokenAccountId, Option<TokenAccount>>,
) -> BatchPlan {
    let members = entries
        .into_iter()
        .map(|entry| {
            let subject = entry.subject();
            match entry {
                Entry::Orphan(orphan) => MemberPlan {
                    subject,
                    instructions: vec![close_instruction(orphan.invalidator)],
                    outcome: Outcome::ClosedOrphan,
                    detail: None,
                },
                Entry::Escrow(candidate) => match verdict(&candidate, now) {
                    Verdict::Expired => match invalidation_instructions(&candidate, accounts) {
                        Ok(instructions) => MemberPlan {
                            subject,
                            instructions,
                            outcome: Outcome::Invalidated,
                            detail: None,
                        },
                        Err(e) => {
                            warn!(batch = index, escrow = %candidate.escrow.id, error = %e, "Skipping member");
                            MemberPlan::skipped(subject, Outcome::SkippedError, e.to_string())
                        }
                    },
                    Verdict::NotExpired { pending } => {
                        let detail = pending
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ");
                        debug!(batch = index, escrow = %candidate.escrow.id, pending = %detail, "Not expired");
                        MemberPlan::skipped(subject, Outcome::SkippedNotExpired, detail)
                    }
                    Verdict::IssuerOnly => {
                        MemberPlan::skipped(subject, Outcome::SkippedNotExpired, "only the issuer may invalidate")
                    }
                },
            }
        })
        .collect();

    BatchPlan { index, members }
}

fn invalidation_instructions(
    candidate: &Candidate,
    accounts: &HashMap<TokenAccountId, Option<TokenAccount>>,
) -> Result<Vec<Instruction>, CrankError> {
    let escrow = &candidate.escrow;
    let mut instructions = Vec::with_capacity(4);

    if let Some(destination) = return_destination(escrow) {
        let build_error = |reason: String| CrankError::Build {
            subject: escrow.id.to_string(),
            reason,
        };
        match accounts.get(&destination) {
            None => return Err(build_error(format!("destination {} was not resolved", destination))),
            Some(None) => instructions.push(Instruction::CreateAssociatedAccount {
                owner: escrow.issuer,
                mint: escrow.mint,
            }),
            Some(Some(account)) if account.owner != escrow.issuer || account.mint != escrow.mint => {
                return Err(build_error(format!(
                    "destination {} belongs to {} for {}",
                    destination, account.owner, account.mint
                )));
            }
            Some(Some(account)) if account.frozen => {
                return Err(build_error(format!("destination {} is frozen", destination)));
            }
            Some(Some(_)) => {}
        }
    }

    instructions.push(Instruction::Invalidate { escrow: escrow.id });

    // A reissued escrow keeps its invalidators
    let removes_escrow = escrow.invalidation_type.is_terminal() || escrow.state == EscrowState::Issued;
    if removes_escrow {
        if let Some(time) = &candidate.time {
            instructions.push(close_instruction(InvalidatorRef::Time(time.id)));
        }
        if let Some(usage) = &candidate.usage {
            instructions.push(close_instruction(InvalidatorRef::Usage(usage.id)));
        }
    }
    Ok(instructions)
}

fn close_instruction(invalidator: InvalidatorRef) -> Instruction {
    match invalidator {
        InvalidatorRef::Time(id) => Instruction::CloseTimeInvalidator { invalidator: id },
        InvalidatorRef::Usage(id) => Instruction::CloseUsageInvalidator { invalidator: id },
    }
}
