//! In-memory custody
//!
//! Balances keyed by token account. Every mutation checks before it
//! writes, so a failed call leaves the vault untouched.

use std::collections::{HashMap, HashSet};

use leasehold_types::{checked_add_u64, LeaseholdError, MintId, Result, TokenAccountId, WalletId};
use tracing::debug;

use crate::custody::{Custody, PaymentSettlement, TokenAccount};

/// In-memory implementation of [`Custody`] and [`PaymentSettlement`]
#[derive(Debug, Clone, Default)]
pub struct Vault {
    accounts: HashMap<TokenAccountId, TokenAccount>,
    /// Mints without a freeze authority
    unfreezable: HashSet<MintId>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of `mint` to the owner's associated account
    pub fn mint_to(&mut self, owner: &WalletId, mint: &MintId, amount: u64) -> Result<TokenAccountId> {
        let account = self.open_associated(owner, mint)?;
        let entry = self.account_mut(&account)?;
        entry.amount = checked_add_u64(entry.amount, amount, "mint_to")?;
        Ok(account)
    }

    pub fn set_mint_freezable(&mut self, mint: MintId, freezable: bool) {
        if freezable {
            self.unfreezable.remove(&mint);
        } else {
            self.unfreezable.insert(mint);
        }
    }

    /// Balance of an account; missing accounts hold nothing
    pub fn balance(&self, account: &TokenAccountId) -> u64 {
        self.accounts.get(account).map(|a| a.amount).unwrap_or(0)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &TokenAccount> {
        self.accounts.values()
    }

    fn account_mut(&mut self, account: &TokenAccountId) -> Result<&mut TokenAccount> {
        self.accounts
            .get_mut(account)
            .ok_or_else(|| LeaseholdError::TokenAccountNotFound {
                account: account.to_string(),
            })
    }

    fn set_frozen(&mut self, account: &TokenAccountId, frozen: bool) -> Result<()> {
        let mint = self.token_account(account)?.mint;
        if frozen && !self.mint_freezable(&mint) {
            return Err(LeaseholdError::FreezeUnavailable {
                mint: mint.to_string(),
            });
        }
        self.account_mut(account)?.frozen = frozen;
        Ok(())
    }
}

impl Custody for Vault {
    fn token_account(&self, account: &TokenAccountId) -> Result<TokenAccount> {
        self.accounts
            .get(account)
            .cloned()
            .ok_or_else(|| LeaseholdError::TokenAccountNotFound {
                account: account.to_string(),
            })
    }

    fn open_account(&mut self, account: TokenAccountId, owner: WalletId, mint: MintId) -> Result<()> {
        match self.accounts.get(&account) {
            Some(existing) if existing.owner == owner && existing.mint == mint => Ok(()),
            Some(_) => Err(LeaseholdError::AccountMismatch {
                account: account.to_string(),
                reason: "already open for another owner or mint".to_string(),
            }),
            None => {
                debug!(account = %account, owner = %owner, mint = %mint, "Opening token account");
                self.accounts.insert(
                    account,
                    TokenAccount {
                        id: account,
                        owner,
                        mint,
                        amount: 0,
                        frozen: false,
                    },
                );
                Ok(())
            }
        }
    }

    fn transfer(&mut self, from: &TokenAccountId, to: &TokenAccountId, amount: u64) -> Result<()> {
        let source = self.token_account(from)?;
        let destination = self.token_account(to)?;

        if source.mint != destination.mint {
            return Err(LeaseholdError::AccountMismatch {
                account: to.to_string(),
                reason: format!("holds {}, expected {}", destination.mint, source.mint),
            });
        }
        for account in [&source, &destination] {
            if account.frozen {
                return Err(LeaseholdError::AccountFrozen {
                    account: account.id.to_string(),
                });
            }
        }
        if source.amount < amount {
            return Err(LeaseholdError::InsufficientCustody {
                account: from.to_string(),
                mint: source.mint.to_string(),
                available: source.amount,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }

        let credited = checked_add_u64(destination.amount, amount, "transfer")?;
        self.account_mut(from)?.amount = source.amount - amount;
        self.account_mut(to)?.amount = credited;
        Ok(())
    }

    fn burn(&mut self, account: &TokenAccountId, amount: u64) -> Result<()> {
        let holder = self.token_account(account)?;
        if holder.frozen {
            return Err(LeaseholdError::AccountFrozen {
                account: account.to_string(),
            });
        }
        if holder.amount < amount {
            return Err(LeaseholdError::InsufficientCustody {
                account: account.to_string(),
                mint: holder.mint.to_string(),
                available: holder.amount,
                required: amount,
            });
        }
        self.account_mut(account)?.amount = holder.amount - amount;
        Ok(())
    }

    fn freeze(&mut self, account: &TokenAccountId) -> Result<()> {
        self.set_frozen(account, true)
    }

    fn thaw(&mut self, account: &TokenAccountId) -> Result<()> {
        self.set_frozen(account, false)
    }

    fn mint_freezable(&self, mint: &MintId) -> bool {
        !self.unfreezable.contains(mint)
    }
}

impl PaymentSettlement for Vault {
    fn settle(&mut self, payer: &WalletId, mint: &MintId, amount: u64, collector: &WalletId) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let failed = |e: LeaseholdError| LeaseholdError::PaymentFailed {
            amount,
            mint: mint.to_string(),
            reason: e.to_string(),
        };

        let source = TokenAccountId::associated(payer, mint);
        let destination = self.open_associated(collector, mint).map_err(failed)?;
        self.transfer(&source, &destination, amount).map_err(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_transfer() {
        let mut vault = Vault::new();
        let alice = WalletId::new();
        let bob = WalletId::new();
        let mint = MintId::new();

        let from = vault.mint_to(&alice, &mint, 10).unwrap();
        let to = vault.open_associated(&bob, &mint).unwrap();
        vault.transfer(&from, &to, 4).unwrap();

        assert_eq!(vault.balance(&from), 6);
        assert_eq!(vault.balance(&to), 4);
    }

    #[test]
    fn test_transfer_checks() {
        let mut vault = Vault::new();
        let alice = WalletId::new();
        let mint = MintId::new();
        let other_mint = MintId::new();

        let from = vault.mint_to(&alice, &mint, 1).unwrap();
        let wrong_mint = vault.open_associated(&alice, &other_mint).unwrap();
        assert!(matches!(
            vault.transfer(&from, &wrong_mint, 1),
            Err(LeaseholdError::AccountMismatch { .. })
        ));

        let to = vault.open_associated(&WalletId::new(), &mint).unwrap();
        assert!(matches!(
            vault.transfer(&from, &to, 2),
            Err(LeaseholdError::InsufficientCustody { available: 1, required: 2, .. })
        ));

        vault.freeze(&from).unwrap();
        assert!(matches!(
            vault.transfer(&from, &to, 1),
            Err(LeaseholdError::AccountFrozen { .. })
        ));
        assert!(vault.burn(&from, 1).is_err());

        vault.thaw(&from).unwrap();
        vault.burn(&from, 1).unwrap();
        assert_eq!(vault.balance(&from), 0);
    }

    #[test]
    fn test_unfreezable_mint() {
        let mut vault = Vault::new();
        let mint = MintId::new();
        vault.set_mint_freezable(mint, false);
        let account = vault.mint_to(&WalletId::new(), &mint, 1).unwrap();

        assert!(!vault.mint_freezable(&mint));
        assert!(matches!(
            vault.freeze(&account),
            Err(LeaseholdError::FreezeUnavailable { .. })
        ));
    }

    #[test]
    fn test_open_account_conflict() {
        let mut vault = Vault::new();
        let mint = MintId::new();
        let account = TokenAccountId::new();

        vault.open_account(account, WalletId::new(), mint).unwrap();
        assert!(vault.open_account(account, WalletId::new(), mint).is_err());
    }

    #[test]
    fn test_settle_payment() {
        let mut vault = Vault::new();
        let payer = WalletId::new();
        let collector = WalletId::new();
        let mint = MintId::new();
        vault.mint_to(&payer, &mint, 5).unwrap();

        vault.settle(&payer, &mint, 3, &collector).unwrap();
        assert_eq!(vault.balance(&TokenAccountId::associated(&collector, &mint)), 3);

        let result = vault.settle(&payer, &mint, 3, &collector);
        assert!(matches!(result, Err(LeaseholdError::PaymentFailed { amount: 3, .. })));

        // Zero settles without touching any account
        vault.settle(&WalletId::new(), &MintId::new(), 0, &collector).unwrap();
    }
}
