//! Order settlement engine library.
//!
//! Responsibilities
//! - Checks an [`Order`] is fulfillable: type, conduit, validity window,
//!   counter, status, restricted-fulfiller rules and the offerer's signature
//! - Moves offer items from the offerer to the fulfiller, then consideration
//!   items from the fulfiller to their recipients
//! - Marks orders filled so a signed order settles at most once
//!
//! Fungible items whose token is the address of the supplied
//! [`TransferCallback`] are not moved on the ledger; the engine calls the
//! callback's `transfer_from` instead, exactly as it would call a token
//! contract. This is the seam integrators use to run logic mid-settlement.
//!
use common_types::{Address, ConduitKey, ItemType, Order, OrderHash, OrderType, U256};
use thiserror::Error;
use token_ledger::LedgerError;

pub mod engine;

pub use engine::{OrderSettlementEngine, OrderStatus};

/// Token-shaped hook the engine invokes for items whose token is
/// [`TransferCallback::token_address`].
pub trait TransferCallback {
    type Error: std::error::Error + 'static;

    fn token_address(&self) -> Address;

    /// Called with the engine's own address as `msg_sender`.
    fn transfer_from(&mut self, msg_sender: Address, from: Address, to: Address, amount: U256) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum SettlementError<E: std::error::Error + 'static> {
    #[error("No verifying key registered for offerer {0}")]
    UnknownOfferer(Address),
    #[error("Invalid signature for order {0}")]
    InvalidSignature(OrderHash),
    #[error("Order {0} has already been filled")]
    OrderAlreadyFilled(OrderHash),
    #[error("Order {0} has been cancelled")]
    OrderCancelled(OrderHash),
    #[error("Order counter {provided} does not match the offerer's counter {current}")]
    InvalidCounter { provided: U256, current: U256 },
    #[error("Order is not active at {now}: valid from {start_time} until {end_time}")]
    OrderNotActive { now: u64, start_time: u64, end_time: u64 },
    #[error("Restricted order {order_hash} cannot be fulfilled by {fulfiller}")]
    InvalidRestrictedOrder { order_hash: OrderHash, fulfiller: Address },
    #[error("{caller} may not cancel order {order_hash}")]
    CancelNotAllowed { order_hash: OrderHash, caller: Address },
    #[error("Unsupported order type {0:?}")]
    UnsupportedOrderType(OrderType),
    #[error("Unsupported item type {0:?}")]
    UnsupportedItemType(ItemType),
    #[error("Unknown conduit {0}")]
    UnknownConduit(ConduitKey),
    #[error("Amount interpolation overflowed")]
    AmountOverflow,
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Transfer callback failed: {0}")]
    Callback(#[source] E),
}

/// Settles signed orders between an offerer and a fulfiller.
///
/// Ordering guarantee relied upon by callers: every offer item is delivered
/// to the fulfiller before the first consideration item is processed, and
/// consideration items are processed strictly in index order, each one
/// completing (including any [`TransferCallback`] invocation) before the next
/// starts.
pub trait SettlementEngine {
    fn address(&self) -> Address;

    /// Fulfil `order` in full on behalf of `fulfiller`. Returns `true` on
    /// success; any failure aborts the settlement.
    fn fulfill_order<C: TransferCallback>(
        &self,
        fulfiller: Address,
        order: &Order,
        fulfiller_conduit_key: ConduitKey,
        callback: &mut C,
    ) -> Result<bool, SettlementError<C::Error>>;
}
