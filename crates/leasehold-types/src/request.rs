//! Typed issue configuration
//!
//! One struct per policy, checked once when the request is built. An
//! `IssueRequest` that exists is a valid one.

use crate::{
    EscrowKind, InvalidationType, LeaseholdError, MintId, Result, TimeExtension, TokenAccountId,
    UnixTimestamp, UsageExtension, WalletId,
};
use serde::{Deserialize, Serialize};

/// How the expiration instant is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationRule {
    /// Expires at a fixed instant
    Fixed { expiration: UnixTimestamp },
    /// Expires a fixed time after the claim
    Relative { duration_seconds: i64 },
}

/// Time invalidator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePolicy {
    pub rule: ExpirationRule,
    pub max_expiration: Option<UnixTimestamp>,
    pub extension: Option<TimeExtension>,
    /// Extension fee destination; defaults to the issuer
    pub collector: Option<WalletId>,
}

impl TimePolicy {
    pub fn fixed(expiration: UnixTimestamp) -> Self {
        Self::with_rule(ExpirationRule::Fixed { expiration })
    }

    pub fn relative(duration_seconds: i64) -> Self {
        Self::with_rule(ExpirationRule::Relative { duration_seconds })
    }

    fn with_rule(rule: ExpirationRule) -> Self {
        Self {
            rule,
            max_expiration: None,
            extension: None,
            collector: None,
        }
    }

    pub fn max_expiration(mut self, max_expiration: UnixTimestamp) -> Self {
        self.max_expiration = Some(max_expiration);
        self
    }

    pub fn extension(mut self, extension: TimeExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn collector(mut self, collector: WalletId) -> Self {
        self.collector = Some(collector);
        self
    }

    fn validate(&self) -> Result<()> {
        match self.rule {
            ExpirationRule::Relative { duration_seconds } if duration_seconds <= 0 => {
                return Err(invalid("duration_seconds must be positive"));
            }
            ExpirationRule::Fixed { expiration } => {
                if let Some(max) = self.max_expiration {
                    if max < expiration {
                        return Err(invalid("max_expiration is before expiration"));
                    }
                }
            }
            _ => {}
        }
        if let Some(extension) = &self.extension {
            if extension.duration_seconds == 0 {
                return Err(invalid("extension duration_seconds must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Usage invalidator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePolicy {
    pub total_usages: Option<u64>,
    pub use_authority: Option<WalletId>,
    pub extension: Option<UsageExtension>,
    pub collector: Option<WalletId>,
}

impl UsagePolicy {
    pub fn limited(total_usages: u64) -> Self {
        Self {
            total_usages: Some(total_usages),
            use_authority: None,
            extension: None,
            collector: None,
        }
    }

    /// Tracks usage without ever expiring by it
    pub fn unlimited() -> Self {
        Self {
            total_usages: None,
            ..Self::limited(0)
        }
    }

    pub fn use_authority(mut self, authority: WalletId) -> Self {
        self.use_authority = Some(authority);
        self
    }

    pub fn extension(mut self, extension: UsageExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn collector(mut self, collector: WalletId) -> Self {
        self.collector = Some(collector);
        self
    }

    fn validate(&self) -> Result<()> {
        let Some(extension) = &self.extension else {
            return Ok(());
        };
        if extension.extension_usages == 0 {
            return Err(invalid("extension_usages must be non-zero"));
        }
        let Some(total) = self.total_usages else {
            return Err(invalid("usage extension requires total_usages"));
        };
        if let Some(max) = extension.max_usages {
            if max < total {
                return Err(invalid("max_usages is below total_usages"));
            }
        }
        Ok(())
    }
}

/// Payment required to claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPolicy {
    pub payment_mint: MintId,
    pub payment_amount: u64,
    /// Payment destination; defaults to the issuer
    pub collector: Option<WalletId>,
}

/// A validated request to place an asset into escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub issuer: WalletId,
    pub mint: MintId,
    pub amount: u64,
    pub kind: EscrowKind,
    pub invalidation_type: InvalidationType,
    /// Account the asset is taken from
    pub issuer_token_account: TokenAccountId,
    pub claim: Option<ClaimPolicy>,
    pub time: Option<TimePolicy>,
    pub usage: Option<UsagePolicy>,
}

impl IssueRequest {
    /// Start building a request; the issuer's associated account is the source
    pub fn builder(issuer: WalletId, mint: MintId, amount: u64) -> IssueRequestBuilder {
        IssueRequestBuilder {
            request: IssueRequest {
                issuer,
                mint,
                amount,
                kind: EscrowKind::Managed,
                invalidation_type: InvalidationType::Return,
                issuer_token_account: TokenAccountId::associated(&issuer, &mint),
                claim: None,
                time: None,
                usage: None,
            },
        }
    }

    /// Re-check a request that arrived deserialized rather than built
    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(invalid("amount must be positive"));
        }
        if self.kind == EscrowKind::Edition && self.amount != 1 {
            return Err(invalid("edition escrows hold exactly one unit"));
        }
        if let Some(time) = &self.time {
            time.validate()?;
        }
        if let Some(usage) = &self.usage {
            usage.validate()?;
        }
        Ok(())
    }
}

/// Builder for [`IssueRequest`]
#[derive(Debug, Clone)]
pub struct IssueRequestBuilder {
    request: IssueRequest,
}

impl IssueRequestBuilder {
    pub fn kind(mut self, kind: EscrowKind) -> Self {
        self.request.kind = kind;
        self
    }

    pub fn invalidation_type(mut self, invalidation_type: InvalidationType) -> Self {
        self.request.invalidation_type = invalidation_type;
        self
    }

    pub fn issuer_token_account(mut self, account: TokenAccountId) -> Self {
        self.request.issuer_token_account = account;
        self
    }

    pub fn paid_claim(mut self, claim: ClaimPolicy) -> Self {
        self.request.claim = Some(claim);
        self
    }

    pub fn time(mut self, time: TimePolicy) -> Self {
        self.request.time = Some(time);
        self
    }

    pub fn usage(mut self, usage: UsagePolicy) -> Self {
        self.request.usage = Some(usage);
        self
    }

    pub fn build(self) -> Result<IssueRequest> {
        self.request.validate()?;
        Ok(self.request)
    }
}

fn invalid(message: &str) -> LeaseholdError {
    LeaseholdError::InvalidConfiguration {
        message: message.to_string(),
    }
}
