//! Candidate discovery
//!
//! Lists every invalidator on the ledger and joins each one to the escrow
//! it points at. Invalidators whose escrow is gone become orphans to close.
//! Accounts that do not decode are set aside and reported.

use std::collections::BTreeMap;

use leasehold_ledger::{Fetched, LedgerReader};
use leasehold_types::{EscrowId, EscrowRecord, InvalidatorRef, TimeInvalidator, UsageInvalidator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CrankConfig;
use crate::error::{CrankError, Result};

/// A live escrow with the invalidator records it lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub escrow: EscrowRecord,
    pub time: Option<TimeInvalidator>,
    pub usage: Option<UsageInvalidator>,
}

/// An invalidator whose escrow no longer exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orphan {
    pub invalidator: InvalidatorRef,
    pub escrow: EscrowId,
}

/// An account that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedAccount {
    pub address: String,
    pub reason: String,
}

/// Everything one run has to look at, read-only after the fetch
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub escrows: Vec<Candidate>,
    pub orphans: Vec<Orphan>,
    pub malformed: Vec<MalformedAccount>,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.escrows.is_empty() && self.orphans.is_empty()
    }
}

#[derive(Default)]
struct Attached {
    time: Option<TimeInvalidator>,
    usage: Option<UsageInvalidator>,
}

/// Fetch and join the run's candidates.
///
/// Any read failure here fails the whole run; there is nothing useful to
/// do without the candidate list.
pub async fn fetch_candidates(reader: &dyn LedgerReader, config: &CrankConfig) -> Result<CandidateSet> {
    let fetch_failed = |source| CrankError::FetchCandidates { source };

    let time_accounts = reader.list_time_invalidators().await.map_err(fetch_failed)?;
    let usage_accounts = reader.list_usage_invalidators().await.map_err(fetch_failed)?;

    let mut set = CandidateSet::default();
    let mut by_escrow: BTreeMap<EscrowId, Attached> = BTreeMap::new();

    for account in time_accounts {
        match account {
            Fetched::Parsed(account) => {
                let escrow = account.data.escrow;
                by_escrow.entry(escrow).or_default().time = Some(account.data);
            }
            Fetched::Malformed { address, reason } => set.malformed.push(malformed(address, reason)),
        }
    }
    for account in usage_accounts {
        match account {
            Fetched::Parsed(account) => {
                let escrow = account.data.escrow;
                by_escrow.entry(escrow).or_default().usage = Some(account.data);
            }
            Fetched::Malformed { address, reason } => set.malformed.push(malformed(address, reason)),
        }
    }

    let ids: Vec<EscrowId> = by_escrow.keys().copied().collect();
    let mut escrows = Vec::with_capacity(ids.len());
    for (chunk_index, chunk) in ids.chunks(config.lookup_chunk_size).enumerate() {
        if chunk_index > 0 && config.lookup_pause_ms > 0 {
            tokio::time::sleep(config.lookup_pause()).await;
        }
        let fetched = reader.get_escrows(chunk).await.map_err(fetch_failed)?;
        if fetched.len() != chunk.len() {
            return Err(fetch_failed(leasehold_ledger::LedgerError::Malformed {
                address: "getMultipleAccounts".to_string(),
                reason: format!("asked for {} escrows, got {}", chunk.len(), fetched.len()),
            }));
        }
        escrows.extend(chunk.iter().copied().zip(fetched));
    }

    for (id, fetched) in escrows {
        let Some(attached) = by_escrow.remove(&id) else {
            continue;
        };
        match fetched {
            None => {
                if let Some(time) = attached.time {
                    set.orphans.push(Orphan {
                        invalidator: InvalidatorRef::Time(time.id),
                        escrow: id,
                    });
                }
                if let Some(usage) = attached.usage {
                    set.orphans.push(Orphan {
                        invalidator: InvalidatorRef::Usage(usage.id),
                        escrow: id,
                    });
                }
            }
            Some(Fetched::Malformed { address, reason }) => set.malformed.push(malformed(address, reason)),
            Some(Fetched::Parsed(account)) => {
                let escrow = account.data;
                if !escrow.state.is_live() {
                    debug!(escrow = %id, state = %escrow.state, "Escrow not live, ignoring");
                    continue;
                }
                // An invalidator the escrow does not list is stale; leave it alone
                let time = attached.time.filter(|t| escrow.lists(&t.id));
                let usage = attached.usage.filter(|u| escrow.lists(&u.id));
                if time.is_none() && usage.is_none() {
                    debug!(escrow = %id, "No listed invalidator found, ignoring");
                    continue;
                }
                set.escrows.push(Candidate { escrow, time, usage });
            }
        }
    }

    info!(
        escrows = set.escrows.len(),
        orphans = set.orphans.len(),
        malformed = set.malformed.len(),
        "Fetched candidates"
    );
    Ok(set)
}

fn malformed(address: String, reason: String) -> MalformedAccount {
    warn!(address = %address, reason = %reason, "Skipping malformed account");
    MalformedAccount { address, reason }
}
