//! Leasehold Types - Canonical records for time- and usage-bounded escrow
//!
//! This crate contains the foundational types for Leasehold with zero
//! dependencies on other leasehold crates:
//!
//! - Identity types (EscrowId, InvalidatorId, MintId, ...)
//! - The escrow record and its lifecycle enums
//! - Time and usage invalidator records with their extension terms
//! - Typed issue configuration, validated at construction
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --issue--> Issued --claim--> Claimed --invalidate--> (removed)
//!                             ^                  |
//!                             +----reissue-------+
//! ```

pub mod identity;
pub mod escrow;
pub mod invalidator;
pub mod request;
pub mod error;

pub use identity::*;
pub use escrow::*;
pub use invalidator::*;
pub use request::*;
pub use error::*;

/// Seconds since the Unix epoch, as reported by the ledger clock
pub type UnixTimestamp = i64;

/// Version of the Leasehold record schema
pub const TYPES_VERSION: &str = "0.1.0";
