//! Lending pool and collateral custodian interfaces.
//!
//! The deleverager consumes a pool through [`LendingPool`] and a collateral
//! custodian ("gem join") through [`CollateralJoin`]. Both traits take the
//! immediate caller explicitly, since authorization in the pool depends on
//! who is calling.
//!
//! [`InMemoryPool`], [`InMemoryJoin`] and [`FixedSpotOracle`] implement the
//! interfaces over a shared [`token_ledger::TokenLedger`].
//!
use common_types::{Address, IlkIndex, Position, U256};
use rate_math::MathError;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use token_ledger::LedgerError;

pub mod join;
pub mod oracle;
pub mod pool;

pub use join::InMemoryJoin;
pub use oracle::FixedSpotOracle;
pub use pool::{InMemoryPool, PoolSnapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Unknown ilk: {0}")]
    UnknownIlk(IlkIndex),
    #[error("Ilk {0} is already initialized")]
    IlkAlreadyInitialized(IlkIndex),
    #[error("Rate for ilk {ilk} cannot decrease from {current} to {requested}")]
    RateDecrease { ilk: IlkIndex, current: U256, requested: U256 },
    #[error("{caller} is not allowed to modify the position of {owner}")]
    NotAllowed { owner: Address, caller: Address },
    #[error("Repayment of {requested} exceeds normalized debt {normalized_debt} of {user}")]
    RepayExceedsDebt { user: Address, normalized_debt: U256, requested: U256 },
    #[error("Withdrawal of {requested} exceeds collateral {collateral} of {user}")]
    InsufficientCollateral { user: Address, collateral: U256, requested: U256 },
    #[error("Position of {user} would be unsafe: normalized debt {normalized_debt}, collateral {collateral}")]
    Unsafe { user: Address, normalized_debt: U256, collateral: U256 },
    #[error("Collateral balance of {holder} is {balance}, requested {requested}")]
    InsufficientCollateralBalance { holder: Address, balance: U256, requested: U256 },
    #[error("{0} is not an authorized custodian")]
    UnauthorizedCustodian(Address),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Math error: {0}")]
    Math(#[from] MathError),
}

/// Source of the risk-adjusted collateral price (RAY) for an ilk.
pub trait SpotOracle: Debug + Send + Sync {
    fn get_spot(&self) -> Result<U256, PoolError>;
}

/// Lending pool holding collateralized debt positions.
///
/// The pool enforces `rate * normalized_debt <= collateral * spot` on every
/// collateral withdrawal.
pub trait LendingPool {
    fn address(&self) -> Address;

    /// Base asset lent by the pool and used to repay debt.
    fn debt_token(&self) -> Address;

    /// Rate accumulator (RAY) for `ilk`.
    fn rate(&self, ilk: IlkIndex) -> Result<U256, PoolError>;

    fn spot(&self, ilk: IlkIndex) -> Result<Arc<dyn SpotOracle>, PoolError>;

    fn position(&self, ilk: IlkIndex, user: Address) -> Position;

    /// Whether `custodian` may move internal collateral balances.
    fn is_custodian_authorized(&self, custodian: Address) -> bool;

    /// Burn `normalized_amount` of `user`'s debt, pulling the actual debt
    /// (`normalized_amount * rate`, floored) in the base asset from `payer`.
    fn repay(
        &self,
        caller: Address,
        ilk: IlkIndex,
        user: Address,
        payer: Address,
        normalized_amount: U256,
    ) -> Result<(), PoolError>;

    /// Release `amount` of `user`'s collateral to `recipient`'s internal
    /// collateral balance.
    fn withdraw_collateral(
        &self,
        caller: Address,
        ilk: IlkIndex,
        user: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), PoolError>;
}

/// Custodian holding collateral tokens on behalf of the pool.
pub trait CollateralJoin {
    fn address(&self) -> Address;

    /// The pool this custodian credits.
    fn pool(&self) -> Address;

    fn ilk(&self) -> IlkIndex;

    /// Collateral token held in custody.
    fn gem(&self) -> Address;

    /// Debit `amount` from the caller's internal collateral balance and pay
    /// out the tokens to `recipient`.
    fn exit(&self, caller: Address, recipient: Address, amount: U256) -> Result<(), PoolError>;
}
