//! Leasehold Escrow - The rental lifecycle
//!
//! Encodes who may act on an escrowed asset and when:
//!
//! - `issue`: the issuer locks an asset under attached policies
//! - `claim`: a recipient takes it, paying the claim approver if one is set
//! - `invalidate`: once every policy has expired, the asset is burned,
//!   returned, or reissued for the next claimant
//!
//! # Key Principle
//!
//! Every transition is all-or-nothing. A payment that fails aborts the
//! claim; a transfer that fails aborts the invalidation. Nothing is left
//! half-applied.
//!
//! Custody and payment are reached through the [`Custody`] and
//! [`PaymentSettlement`] seams. [`Vault`] implements both in memory.

pub mod book;
pub mod custody;
pub mod machine;
pub mod vault;

pub use book::RentalBook;
pub use custody::{Custody, PaymentSettlement, TokenAccount};
pub use machine::{escrow_authority, CloseOutcome, InvalidationOutcome, RentalStateMachine};
pub use vault::Vault;
