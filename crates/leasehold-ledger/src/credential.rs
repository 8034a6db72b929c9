//! Signing identity
//!
//! Operations are signed with Ed25519 over the SHA-256 digest of their JSON
//! body. The credential is handed to whoever submits; there is no
//! process-wide key.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use leasehold_types::WalletId;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::instruction::Operation;

/// Wallet identity of an Ed25519 public key
pub fn wallet_for_key(key: &VerifyingKey) -> WalletId {
    WalletId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
}

/// Something able to authorize an operation as a given identity
pub trait Credential: Send + Sync {
    /// Identity operations are signed as
    fn wallet(&self) -> WalletId;

    /// Sign an operation whose payer is this credential's wallet
    fn sign(&self, operation: Operation) -> Result<SignedOperation>;
}

/// An Ed25519 keypair credential
#[derive(Clone)]
pub struct KeypairCredential {
    signing_key: SigningKey,
}

impl KeypairCredential {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load from a hex-encoded 32-byte secret
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(secret.trim())
            .map_err(|e| LedgerError::InvalidSignature {
                reason: format!("invalid secret key hex: {}", e),
            })?
            .try_into()
            .map_err(|_| LedgerError::InvalidSignature {
                reason: "secret key must be 32 bytes".to_string(),
            })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for KeypairCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairCredential")
            .field("wallet", &self.wallet())
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl Credential for KeypairCredential {
    fn wallet(&self) -> WalletId {
        wallet_for_key(&self.signing_key.verifying_key())
    }

    fn sign(&self, operation: Operation) -> Result<SignedOperation> {
        if operation.payer != self.wallet() {
            return Err(LedgerError::InvalidSignature {
                reason: format!("payer {} is not {}", operation.payer, self.wallet()),
            });
        }
        let digest = digest(&operation)?;
        let signature = self.signing_key.sign(&digest);
        Ok(SignedOperation {
            operation,
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

/// An operation with its payer's signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub operation: Operation,
    /// Hex Ed25519 public key
    pub public_key: String,
    /// Hex Ed25519 signature over the operation digest
    pub signature: String,
}

impl SignedOperation {
    /// Check the key belongs to the payer and the signature covers the body
    pub fn verify(&self) -> Result<()> {
        let key_bytes: [u8; 32] = decode(&self.public_key, "public key")?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| LedgerError::InvalidSignature {
            reason: format!("invalid public key: {}", e),
        })?;
        if wallet_for_key(&key) != self.operation.payer {
            return Err(LedgerError::InvalidSignature {
                reason: "public key does not belong to payer".to_string(),
            });
        }

        let signature_bytes: [u8; 64] = decode(&self.signature, "signature")?;
        let signature = Signature::from_bytes(&signature_bytes);
        key.verify(&digest(&self.operation)?, &signature)
            .map_err(|e| LedgerError::InvalidSignature {
                reason: e.to_string(),
            })
    }
}

fn digest(operation: &Operation) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(operation)?;
    Ok(Sha256::digest(&body).to_vec())
}

fn decode<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    hex::decode(value)
        .map_err(|e| LedgerError::InvalidSignature {
            reason: format!("invalid {} hex: {}", what, e),
        })?
        .try_into()
        .map_err(|_| LedgerError::InvalidSignature {
            reason: format!("{} must be {} bytes", what, N),
        })
}
