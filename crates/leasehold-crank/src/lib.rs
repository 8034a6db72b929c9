//! Leasehold Crank - Off-ledger expiration driver
//!
//! A run goes `FetchClock -> FetchCandidates -> Partition -> Submit -> Report`
//! and keeps no state between runs:
//!
//! 1. Sample the ledger clock once ([`ClockReconciler`])
//! 2. List every invalidator and join it to its escrow ([`fetch_candidates`])
//! 3. Split the work into small batches ([`plan::partition`])
//! 4. For each batch, build one operation covering its expired members
//!    and submit it with bounded retries ([`submit_with_retry`])
//! 5. Collect one [`RunReport`]
//!
//! Batches are independent. A batch that fails never affects another, and
//! a member that cannot be built is skipped without holding up the rest of
//! its batch.

pub mod candidates;
pub mod clock;
pub mod config;
pub mod crank;
pub mod error;
pub mod plan;
pub mod report;
pub mod rpc;
pub mod submit;

pub use candidates::{fetch_candidates, Candidate, CandidateSet, MalformedAccount, Orphan};
pub use clock::{ClockReconciler, ClockSource};
pub use config::{CrankConfig, Scheduling};
pub use crank::{InvalidationCrank, RunContext};
pub use error::{CrankError, Result};
pub use report::{BatchReport, BatchStatus, EntryReport, Outcome, RunReport, Subject};
pub use rpc::RpcLedger;
pub use submit::{read_with_retry, submit_with_retry, RetryPolicy, SubmitFailure, Submitted};
