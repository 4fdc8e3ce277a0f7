//! Structural checks on deleverage orders.
//!
//! An order is accepted only in one exact shape: a single offer item paying
//! the debt asset to the deleverager, a sentinel consideration item that
//! routes the engine back into the deleverager, and a collateral
//! consideration item paid by the deleverager. Checks run in a fixed order
//! and stop at the first failure.
use common_types::{Address, ConduitKey, ItemType, Order, OrderType, U256};
use thiserror::Error;

/// Order type a deleverage order must carry.
pub const REQUIRED_ORDER_TYPE: OrderType = OrderType::FullRestricted;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderValidationError {
    #[error("Order must have exactly one offer item, found {0}")]
    InvalidOfferCount(usize),
    #[error("Order must have exactly two consideration items, found {0}")]
    InvalidConsiderationCount(usize),
    #[error("Order zone {actual} is not the deleverager {expected}")]
    InvalidZone { expected: Address, actual: Address },
    #[error("Order type {0:?} is not a restricted full fulfilment")]
    InvalidOrderType(OrderType),
    #[error("Order conduit key {0} is not zero")]
    InvalidConduitKey(ConduitKey),
    #[error("Offer item type {0:?} is not a fungible token")]
    InvalidOfferItemType(ItemType),
    #[error("Offer token {actual} is not the debt token {expected}")]
    InvalidOfferToken { expected: Address, actual: Address },
    #[error("Offer amounts {start}..{end} do not equal the debt to repay {expected}")]
    InvalidOfferAmount { expected: U256, start: U256, end: U256 },
    #[error("Consideration item {index} type {item_type:?} is not a fungible token")]
    InvalidConsiderationItemType { index: usize, item_type: ItemType },
    #[error("Consideration item {index} token {actual} is not {expected}")]
    InvalidConsiderationToken { index: usize, expected: Address, actual: Address },
    #[error("Consideration item {index} amounts {start}..{end} do not equal {expected}")]
    InvalidConsiderationAmount { index: usize, expected: U256, start: U256, end: U256 },
    #[error("Consideration recipient {actual} is not the caller {expected}")]
    InvalidConsiderationRecipient { expected: Address, actual: Address },
}

/// What a valid deleverage order must look like for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderExpectations {
    /// Deleverager address: the required zone and the sentinel token.
    pub deleverager: Address,
    /// Position owner calling `deleverage`; receives the sentinel item.
    pub caller: Address,
    pub debt_token: Address,
    pub collateral_token: Address,
    pub debt_to_repay: U256,
    pub collateral_to_remove: U256,
}

pub fn validate_order(order: &Order, expected: &OrderExpectations) -> Result<(), OrderValidationError> {
    let params = &order.parameters;

    let [offer] = params.offer.as_slice() else {
        return Err(OrderValidationError::InvalidOfferCount(params.offer.len()));
    };
    let [sentinel, collateral] = params.consideration.as_slice() else {
        return Err(OrderValidationError::InvalidConsiderationCount(params.consideration.len()));
    };

    if params.zone != expected.deleverager {
        return Err(OrderValidationError::InvalidZone { expected: expected.deleverager, actual: params.zone });
    }
    if params.order_type != REQUIRED_ORDER_TYPE {
        return Err(OrderValidationError::InvalidOrderType(params.order_type));
    }
    if params.conduit_key != ConduitKey::ZERO {
        return Err(OrderValidationError::InvalidConduitKey(params.conduit_key));
    }

    if offer.item_type != ItemType::Erc20 {
        return Err(OrderValidationError::InvalidOfferItemType(offer.item_type));
    }
    if offer.token != expected.debt_token {
        return Err(OrderValidationError::InvalidOfferToken { expected: expected.debt_token, actual: offer.token });
    }
    if offer.start_amount != expected.debt_to_repay || offer.end_amount != expected.debt_to_repay {
        return Err(OrderValidationError::InvalidOfferAmount {
            expected: expected.debt_to_repay,
            start: offer.start_amount,
            end: offer.end_amount,
        });
    }

    check_consideration(
        0,
        sentinel.item_type,
        sentinel.token,
        sentinel.start_amount,
        sentinel.end_amount,
        expected.deleverager,
        expected.debt_to_repay,
    )?;
    if sentinel.recipient != expected.caller {
        return Err(OrderValidationError::InvalidConsiderationRecipient {
            expected: expected.caller,
            actual: sentinel.recipient,
        });
    }

    // The collateral leg may be paid to anyone.
    check_consideration(
        1,
        collateral.item_type,
        collateral.token,
        collateral.start_amount,
        collateral.end_amount,
        expected.collateral_token,
        expected.collateral_to_remove,
    )
}

fn check_consideration(
    index: usize,
    item_type: ItemType,
    token: Address,
    start: U256,
    end: U256,
    expected_token: Address,
    expected_amount: U256,
) -> Result<(), OrderValidationError> {
    if item_type != ItemType::Erc20 {
        return Err(OrderValidationError::InvalidConsiderationItemType { index, item_type });
    }
    if token != expected_token {
        return Err(OrderValidationError::InvalidConsiderationToken { index, expected: expected_token, actual: token });
    }
    if start != expected_amount || end != expected_amount {
        return Err(OrderValidationError::InvalidConsiderationAmount { index, expected: expected_amount, start, end });
    }
    Ok(())
}
