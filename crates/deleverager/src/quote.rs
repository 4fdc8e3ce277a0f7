//! Helpers for sizing and assembling deleverage orders.
//!
//! A market maker quoting a deleverage needs to know how much collateral the
//! pool will release for a given repayment and has to produce an order in the
//! exact shape [`validate_order`](crate::validate_order) accepts.
use crate::Deleverager;
use common_types::{Address, ConduitKey, ConsiderationItem, IlkIndex, OfferItem, Order, OrderParameters, OrderType, Position, B256, U256};
use ed25519_dalek::SigningKey;
use lending_pool::{LendingPool, PoolError};
use rate_math::MathError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("Lending pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Math error: {0}")]
    Math(#[from] MathError),
    #[error("Repaying {requested} normalized debt exceeds the position's {normalized_debt}")]
    RepayExceedsDebt { normalized_debt: U256, requested: U256 },
}

/// Snapshot of a position priced at the pool's current rate and spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionReport {
    pub position: Position,
    pub rate: U256,
    pub spot: U256,
    /// `normalized_debt * rate`, floored.
    pub actual_debt: U256,
    /// `collateral * spot`, floored.
    pub collateral_value: U256,
}

impl PositionReport {
    pub fn is_safe(&self) -> Result<bool, QuoteError> {
        Ok(rate_math::is_safe(self.position.normalized_debt, self.rate, self.position.collateral, self.spot)?)
    }

    /// Collateral value over actual debt. `None` for a debt-free position.
    pub fn collateralization(&self) -> Result<Option<Decimal>, QuoteError> {
        if self.actual_debt.is_zero() {
            return Ok(None);
        }
        let value = rate_math::wad_to_decimal(self.collateral_value)?;
        let debt = rate_math::wad_to_decimal(self.actual_debt)?;
        Ok(value.checked_div(debt))
    }
}

pub fn position_report<P: LendingPool>(pool: &P, ilk: IlkIndex, user: Address) -> Result<PositionReport, QuoteError> {
    let position = pool.position(ilk, user);
    let rate = pool.rate(ilk)?;
    let spot = pool.spot(ilk)?.get_spot()?;
    Ok(PositionReport {
        position,
        rate,
        spot,
        actual_debt: rate_math::actual_debt(position.normalized_debt, rate)?,
        collateral_value: rate_math::collateral_value(position.collateral, spot)?,
    })
}

/// Largest collateral amount the pool lets go after `debt_to_repay` is repaid.
///
/// Repayment is converted with the same floor the deleverager uses; the
/// collateral that must stay behind is rounded up.
pub fn max_collateral_to_remove(position: Position, rate: U256, spot: U256, debt_to_repay: U256) -> Result<U256, QuoteError> {
    let repaid = rate_math::normalize_debt(debt_to_repay, rate)?;
    let remaining = position
        .normalized_debt
        .checked_sub(repaid)
        .ok_or(QuoteError::RepayExceedsDebt { normalized_debt: position.normalized_debt, requested: repaid })?;
    if remaining.is_zero() {
        return Ok(position.collateral);
    }
    if spot.is_zero() {
        return Ok(U256::ZERO);
    }
    let debt = remaining
        .checked_mul(rate)
        .ok_or(MathError::Overflow("max_collateral_to_remove"))?;
    let (quotient, remainder) = debt.div_rem(spot);
    let required = if remainder.is_zero() { quotient } else { quotient + U256::from(1u64) };
    Ok(position.collateral.saturating_sub(required))
}

/// Economic terms of one deleverage trade, from which the maker's order is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleverageTerms {
    pub deleverager: Address,
    pub maker: Address,
    /// Position owner who will call `deleverage`.
    pub user: Address,
    pub debt_token: Address,
    pub collateral_token: Address,
    pub debt_to_repay: U256,
    pub collateral_to_remove: U256,
    pub collateral_recipient: Address,
    pub start_time: u64,
    pub end_time: u64,
    pub salt: U256,
    pub counter: U256,
}

impl DeleverageTerms {
    /// Terms against `deleverager` with the maker receiving the collateral,
    /// open from time zero onwards.
    pub fn new<P, J, E>(
        deleverager: &Deleverager<P, J, E>,
        maker: Address,
        user: Address,
        debt_to_repay: U256,
        collateral_to_remove: U256,
    ) -> Self
    where
        P: LendingPool + token_ledger::Checkpoint,
        J: lending_pool::CollateralJoin,
        E: settlement_engine::SettlementEngine,
    {
        Self {
            deleverager: deleverager.address(),
            maker,
            user,
            debt_token: deleverager.debt_token(),
            collateral_token: deleverager.collateral_token(),
            debt_to_repay,
            collateral_to_remove,
            collateral_recipient: maker,
            start_time: 0,
            end_time: u64::MAX,
            salt: U256::ZERO,
            counter: U256::ZERO,
        }
    }

    pub fn parameters(&self) -> OrderParameters {
        OrderParameters {
            offerer: self.maker,
            zone: self.deleverager,
            offer: vec![OfferItem::erc20(self.debt_token, self.debt_to_repay)],
            consideration: vec![
                ConsiderationItem::erc20(self.deleverager, self.debt_to_repay, self.user),
                ConsiderationItem::erc20(self.collateral_token, self.collateral_to_remove, self.collateral_recipient),
            ],
            order_type: OrderType::FullRestricted,
            start_time: self.start_time,
            end_time: self.end_time,
            zone_hash: B256::ZERO,
            salt: self.salt,
            conduit_key: ConduitKey::ZERO,
            counter: self.counter,
        }
    }

    pub fn sign(&self, key: &SigningKey) -> Order {
        Order::sign(self.parameters(), key)
    }
}
