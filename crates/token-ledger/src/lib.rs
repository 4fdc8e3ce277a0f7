//! Shared fungible-token ledger.
//!
//! Stands in for the token contracts the pool, the custodian and the
//! settlement engine move value through. Balances and allowances are keyed by
//! token address, so any address can act as a token. Clones share the same
//! underlying maps.
//!
use common_types::{Address, U256};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance of {token} for {holder}: required {required}, available {available}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        required: U256,
        available: U256,
    },
    #[error("Insufficient allowance of {token} from {owner} to {spender}: required {required}, available {available}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
        available: U256,
    },
    #[error("Balance overflow for {holder} in {token}")]
    Overflow { token: Address, holder: Address },
}

type BalanceMap = Arc<DashMap<(Address, Address), U256>>;
type AllowanceMap = Arc<DashMap<(Address, Address, Address), U256>>;

/// Shared state that can be put back the way it was at an earlier point.
///
/// A settlement checkpoints every store it may write to and rolls all of
/// them back if it does not complete. Rolling back overwrites writes made by
/// anyone since the checkpoint, so a checkpoint must not span concurrent
/// settlements against the same store.
pub trait Checkpoint {
    type Snapshot;

    fn checkpoint(&self) -> Self::Snapshot;

    fn rollback(&self, snapshot: Self::Snapshot);
}

/// Copy of every balance and allowance at the time it was taken.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    balances: DashMap<(Address, Address), U256>,
    allowances: DashMap<(Address, Address, Address), U256>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    balances: BalanceMap,
    allowances: AllowanceMap,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.balances.get(&(token, holder)).map(|b| *b).unwrap_or(U256::ZERO)
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances.get(&(token, owner, spender)).map(|a| *a).unwrap_or(U256::ZERO)
    }

    /// Create `amount` of `token` out of thin air for `to`.
    pub fn mint(&self, token: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        self.credit(token, to, amount)
    }

    /// Allow `spender` to move up to `amount` of the owner's `token`.
    /// An allowance of `U256::MAX` is never decremented.
    pub fn approve(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    pub fn transfer(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        self.debit(token, from, amount)?;
        self.credit(token, to, amount)?;
        debug!(token = %token, from = %from, to = %to, amount = %amount, "Token transfer");
        Ok(())
    }

    /// Move tokens on behalf of `from`. Spending one's own balance needs no allowance.
    pub fn transfer_from(
        &self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        if spender != from {
            self.spend_allowance(token, from, spender, amount)?;
        }
        self.transfer(token, from, to, amount)
    }

    fn spend_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) -> Result<(), LedgerError> {
        let mut allowance = self.allowances.entry((token, owner, spender)).or_default();
        if *allowance == U256::MAX {
            return Ok(());
        }
        if *allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                token,
                owner,
                spender,
                required: amount,
                available: *allowance,
            });
        }
        *allowance -= amount;
        Ok(())
    }

    fn debit(&self, token: Address, holder: Address, amount: U256) -> Result<(), LedgerError> {
        let mut balance = self.balances.entry((token, holder)).or_default();
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                token,
                holder,
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&self, token: Address, holder: Address, amount: U256) -> Result<(), LedgerError> {
        let mut balance = self.balances.entry((token, holder)).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { token, holder })?;
        Ok(())
    }
}

impl Checkpoint for TokenLedger {
    type Snapshot = LedgerSnapshot;

    fn checkpoint(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            balances: (*self.balances).clone(),
            allowances: (*self.allowances).clone(),
        }
    }

    fn rollback(&self, snapshot: LedgerSnapshot) {
        restore(&self.balances, snapshot.balances);
        restore(&self.allowances, snapshot.allowances);
        debug!("Ledger rolled back");
    }
}

/// Replace the contents of `live` with `saved`.
pub fn restore<K, V>(live: &DashMap<K, V>, saved: DashMap<K, V>)
where
    K: Eq + std::hash::Hash,
{
    live.clear();
    for (key, value) in saved {
        live.insert(key, value);
    }
}
