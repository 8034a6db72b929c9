//! Leasehold Policy - Pure expiration and extension decisions
//!
//! Nothing in this crate reads a clock or touches custody. Every function
//! takes the records and a `now` and returns the same answer every time,
//! so the ledger program and the off-ledger crank agree on what "expired"
//! means.
//!
//! - [`expiration`]: may this escrow be invalidated at `now`?
//! - [`extension`]: what does extending it cost, and where does it land?

pub mod expiration;
pub mod extension;

pub use expiration::{evaluate, resolved_expiration, time_expired, usage_expired, Pending, Verdict};
pub use extension::{
    quote_time_extension, quote_usage_extension, validate_max_expiration_update, ExtensionQuote,
};
