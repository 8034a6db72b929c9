//! Identity types for Leasehold
//!
//! Every ledger address is a strongly typed wrapper around a UUID so an
//! escrow id can never be passed where a token account is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

// Escrow-side records
define_id_type!(EscrowId, "escrow", "Address of an escrow record");
define_id_type!(InvalidatorId, "inv", "Address of a time or usage invalidator");
define_id_type!(ClaimApproverId, "approver", "Address of a payment-gated claim approver");

// Asset-side records
define_id_type!(MintId, "mint", "Asset reference (the mint an escrowed token belongs to)");
define_id_type!(TokenAccountId, "ta", "Address of a token account holding some amount of one mint");

// Actors and operations
define_id_type!(WalletId, "wallet", "Identity able to authorize operations");
define_id_type!(OperationId, "op", "Identifier of a submitted ledger operation");

impl TokenAccountId {
    /// Deterministic destination account for `owner` holding `mint`.
    ///
    /// Any party can compute it, so the crank can resolve an issuer's
    /// return account without a lookup.
    pub fn associated(owner: &WalletId, mint: &MintId) -> Self {
        Self(Uuid::new_v5(&owner.0, mint.0.as_bytes()))
    }

    /// Custody account held by the escrow itself.
    pub fn escrow_custody(escrow: &EscrowId, mint: &MintId) -> Self {
        Self(Uuid::new_v5(&escrow.0, mint.0.as_bytes()))
    }
}

impl InvalidatorId {
    /// The time invalidator slot of an escrow.
    pub fn time_for(escrow: &EscrowId) -> Self {
        Self(Uuid::new_v5(&escrow.0, b"time-invalidator"))
    }

    /// The usage invalidator slot of an escrow.
    pub fn usage_for(escrow: &EscrowId) -> Self {
        Self(Uuid::new_v5(&escrow.0, b"use-invalidator"))
    }
}

impl ClaimApproverId {
    /// The paid claim approver slot of an escrow.
    pub fn for_escrow(escrow: &EscrowId) -> Self {
        Self(Uuid::new_v5(&escrow.0, b"paid-claim-approver"))
    }
}
