//! Leasehold Ledger - Talking to the authoritative store
//!
//! The ledger owns escrow state. Clients read records through
//! [`LedgerReader`], and change them only by submitting a signed
//! [`Operation`] through [`LedgerWriter`]. An operation is a list of
//! [`Instruction`]s applied all-or-nothing.
//!
//! [`InMemoryLedger`] implements both traits over the rental state machine,
//! with a settable clock and fault injection for tests.

pub mod credential;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod program;
pub mod reader;

pub use credential::{wallet_for_key, Credential, KeypairCredential, SignedOperation};
pub use error::{LedgerError, Result};
pub use instruction::{Commitment, Instruction, Operation, OperationReceipt};
pub use memory::InMemoryLedger;
pub use reader::{AccountData, Fetched, LedgerReader, LedgerWriter};

pub use leasehold_escrow::TokenAccount;
