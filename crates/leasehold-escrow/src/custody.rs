//! Custody and payment seams
//!
//! The state machine never moves balances itself. It asks a custody
//! implementation to transfer, burn, freeze and thaw, and a settlement
//! implementation to collect payments.

use leasehold_types::{MintId, Result, TokenAccountId, WalletId};
use serde::{Deserialize, Serialize};

/// A balance of one mint held by one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    pub id: TokenAccountId,
    pub owner: WalletId,
    pub mint: MintId,
    pub amount: u64,
    /// Frozen accounts can neither send nor receive
    pub frozen: bool,
}

/// Custody transfer and freeze primitive
pub trait Custody {
    /// Look up an account
    fn token_account(&self, account: &TokenAccountId) -> Result<TokenAccount>;

    /// Open an account; opening one that already exists with the same owner
    /// and mint is a no-op
    fn open_account(&mut self, account: TokenAccountId, owner: WalletId, mint: MintId) -> Result<()>;

    /// Move `amount` between two accounts of the same mint
    fn transfer(&mut self, from: &TokenAccountId, to: &TokenAccountId, amount: u64) -> Result<()>;

    /// Destroy `amount` held in `account`
    fn burn(&mut self, account: &TokenAccountId, amount: u64) -> Result<()>;

    fn freeze(&mut self, account: &TokenAccountId) -> Result<()>;

    fn thaw(&mut self, account: &TokenAccountId) -> Result<()>;

    /// Whether the escrow can freeze accounts of this mint
    fn mint_freezable(&self, mint: &MintId) -> bool;

    /// Open (if needed) the owner's associated account for `mint`
    fn open_associated(&mut self, owner: &WalletId, mint: &MintId) -> Result<TokenAccountId> {
        let account = TokenAccountId::associated(owner, mint);
        self.open_account(account, *owner, *mint)?;
        Ok(account)
    }
}

/// Payment settlement primitive
pub trait PaymentSettlement {
    /// Move `amount` of `mint` from `payer` to `collector`. A zero amount
    /// settles trivially.
    fn settle(&mut self, payer: &WalletId, mint: &MintId, amount: u64, collector: &WalletId) -> Result<()>;
}
