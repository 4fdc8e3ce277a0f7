use crate::{SettlementEngine, SettlementError, TransferCallback};
use common_types::{Address, ConduitKey, ItemType, Order, OrderHash, OrderParameters, OrderType, U256};
use dashmap::DashMap;
use ed25519_dalek::VerifyingKey;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use token_ledger::TokenLedger;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Filled,
    Cancelled,
}

/// In-memory settlement engine over a [`TokenLedger`]. Clones share state.
///
/// Offerers must approve the engine's address on the ledger for the tokens
/// they offer, and fulfillers for the tokens they pay.
#[derive(Debug, Clone)]
pub struct OrderSettlementEngine {
    address: Address,
    ledger: TokenLedger,
    offerer_keys: Arc<DashMap<Address, VerifyingKey>>,
    counters: Arc<DashMap<Address, U256>>,
    statuses: Arc<DashMap<OrderHash, OrderStatus>>,
    now: Arc<AtomicU64>,
}

impl OrderSettlementEngine {
    pub fn new(address: Address, ledger: TokenLedger) -> Self {
        Self {
            address,
            ledger,
            offerer_keys: Arc::new(DashMap::new()),
            counters: Arc::new(DashMap::new()),
            statuses: Arc::new(DashMap::new()),
            now: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Associate the key `offerer` signs its orders with.
    pub fn register_offerer(&self, offerer: Address, verifying_key: VerifyingKey) {
        self.offerer_keys.insert(offerer, verifying_key);
    }

    pub fn set_timestamp(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    pub fn timestamp(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    pub fn counter(&self, offerer: Address) -> U256 {
        self.counters.get(&offerer).map(|c| *c).unwrap_or(U256::ZERO)
    }

    /// Invalidate every outstanding order of `offerer` signed under the
    /// current counter.
    pub fn increment_counter(&self, offerer: Address) -> U256 {
        let mut counter = self.counters.entry(offerer).or_default();
        *counter = counter.saturating_add(U256::from(1u64));
        *counter
    }

    pub fn order_status(&self, order_hash: &OrderHash) -> Option<OrderStatus> {
        self.statuses.get(order_hash).map(|s| *s)
    }

    /// Cancel an unfilled order. Only the offerer or the zone may cancel.
    pub fn cancel(&self, caller: Address, parameters: &OrderParameters) -> Result<OrderHash, SettlementError<Infallible>> {
        let order_hash = parameters.hash();
        if caller != parameters.offerer && caller != parameters.zone {
            return Err(SettlementError::CancelNotAllowed { order_hash, caller });
        }
        if self.order_status(&order_hash) == Some(OrderStatus::Filled) {
            return Err(SettlementError::OrderAlreadyFilled(order_hash));
        }
        self.statuses.insert(order_hash, OrderStatus::Cancelled);
        info!(order_hash = %order_hash, caller = %caller, "Cancelled order");
        Ok(order_hash)
    }

    fn check_fulfillable<E: std::error::Error + 'static>(
        &self,
        fulfiller: Address,
        order: &Order,
        order_hash: OrderHash,
        fulfiller_conduit_key: ConduitKey,
    ) -> Result<(), SettlementError<E>> {
        let params = &order.parameters;
        if params.order_type == OrderType::Contract {
            return Err(SettlementError::UnsupportedOrderType(params.order_type));
        }
        for key in [params.conduit_key, fulfiller_conduit_key] {
            if key != ConduitKey::ZERO {
                return Err(SettlementError::UnknownConduit(key));
            }
        }
        let now = self.timestamp();
        if now < params.start_time || now >= params.end_time {
            return Err(SettlementError::OrderNotActive {
                now,
                start_time: params.start_time,
                end_time: params.end_time,
            });
        }
        let current = self.counter(params.offerer);
        if params.counter != current {
            return Err(SettlementError::InvalidCounter { provided: params.counter, current });
        }
        match self.order_status(&order_hash) {
            Some(OrderStatus::Filled) => return Err(SettlementError::OrderAlreadyFilled(order_hash)),
            Some(OrderStatus::Cancelled) => return Err(SettlementError::OrderCancelled(order_hash)),
            None => {}
        }
        if params.order_type.is_restricted() && fulfiller != params.zone && fulfiller != params.offerer {
            return Err(SettlementError::InvalidRestrictedOrder { order_hash, fulfiller });
        }
        let item_types = params
            .offer
            .iter()
            .map(|item| item.item_type)
            .chain(params.consideration.iter().map(|item| item.item_type));
        for item_type in item_types {
            if !item_type.is_fungible_token() {
                return Err(SettlementError::UnsupportedItemType(item_type));
            }
        }
        if fulfiller != params.offerer {
            let key = self
                .offerer_keys
                .get(&params.offerer)
                .map(|k| *k)
                .ok_or(SettlementError::<E>::UnknownOfferer(params.offerer))?;
            order
                .verify(&key)
                .map_err(|_| SettlementError::<E>::InvalidSignature(order_hash))?;
        }
        Ok(())
    }

    /// Amount due at the current time for an item whose amount moves
    /// linearly from `start` to `end` over the order's validity window.
    fn current_amount<E: std::error::Error + 'static>(
        &self,
        params: &OrderParameters,
        start: U256,
        end: U256,
        round_up: bool,
    ) -> Result<U256, SettlementError<E>> {
        if start == end {
            return Ok(start);
        }
        let duration = U256::from(params.end_time - params.start_time);
        let elapsed = U256::from(self.timestamp() - params.start_time);
        let remaining = duration - elapsed;
        let total = start
            .checked_mul(remaining)
            .and_then(|a| end.checked_mul(elapsed).and_then(|b| a.checked_add(b)))
            .ok_or(SettlementError::<E>::AmountOverflow)?;
        let amount = if round_up {
            total
                .checked_add(duration - U256::from(1u64))
                .ok_or(SettlementError::<E>::AmountOverflow)?
                / duration
        } else {
            total / duration
        };
        Ok(amount)
    }

    fn transfer<C: TransferCallback>(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        callback: &mut C,
    ) -> Result<(), SettlementError<C::Error>> {
        if token == callback.token_address() {
            debug!(token = %token, from = %from, to = %to, amount = %amount, "Routing transfer to callback");
            callback
                .transfer_from(self.address, from, to, amount)
                .map_err(SettlementError::Callback)
        } else {
            self.ledger.transfer_from(token, self.address, from, to, amount)?;
            Ok(())
        }
    }
}

impl SettlementEngine for OrderSettlementEngine {
    fn address(&self) -> Address {
        self.address
    }

    #[instrument(skip_all, fields(fulfiller = %fulfiller, offerer = %order.parameters.offerer))]
    fn fulfill_order<C: TransferCallback>(
        &self,
        fulfiller: Address,
        order: &Order,
        fulfiller_conduit_key: ConduitKey,
        callback: &mut C,
    ) -> Result<bool, SettlementError<C::Error>> {
        let params = &order.parameters;
        let order_hash = order.hash();
        self.check_fulfillable::<C::Error>(fulfiller, order, order_hash, fulfiller_conduit_key)?;

        for item in &params.offer {
            let amount = self.current_amount::<C::Error>(params, item.start_amount, item.end_amount, false)?;
            self.transfer(item.token, params.offerer, fulfiller, amount, callback)?;
        }
        for item in &params.consideration {
            let amount = self.current_amount::<C::Error>(params, item.start_amount, item.end_amount, true)?;
            self.transfer(item.token, fulfiller, item.recipient, amount, callback)?;
        }

        // Status is only recorded once every transfer went through.
        self.statuses.insert(order_hash, OrderStatus::Filled);
        info!(order_hash = %order_hash, "Fulfilled order");
        Ok(true)
    }
}
