//! Deleverage settlement.
//!
//! A [`Deleverager`] lets the owner of a lending-pool position shrink it in
//! one call by trading collateral with a market maker through the settlement
//! engine:
//!
//! 1. the order is checked against the only shape a deleverage order may take
//!    ([`validator::validate_order`])
//! 2. the call's parameters are staged in a [`TransientContext`]
//! 3. the engine pays the maker's debt asset to the deleverager, then
//!    "transfers" the sentinel item whose token is the deleverager itself,
//!    which lands in [`Deleverager`]'s callback: repay, withdraw, exit
//! 4. the engine moves the released collateral to the maker
//! 5. the context is cleared, however the call ended
//!
//! The ledger and pool are checkpointed before the engine is called. Any
//! error, an unfilled order or a panic rolls both back, so a failed call
//! leaves no trace and can be retried.
//!
//! The deleverager must be allowed to operate the user's position in the
//! pool, and the custodian must be authorized by that pool.
//!
use common_types::{Address, ConduitKey, IlkIndex, Order, U256};
use configuration::DeleveragerSettings;
use lending_pool::{CollateralJoin, LendingPool, PoolError};
use rate_math::MathError;
use settlement_engine::{SettlementEngine, SettlementError};
use thiserror::Error;
use token_ledger::{Checkpoint, LedgerError, TokenLedger};
use tracing::{info, instrument, warn};

mod callback;
pub mod context;
pub mod quote;
mod rollback;
pub mod validator;

use callback::{CallbackEnv, DeleverageCallback};
use rollback::SettlementCheckpoint;
pub use context::{StagedDeleverage, TransientContext};
pub use validator::{validate_order, OrderExpectations, OrderValidationError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Deleverage not initiated")]
    DeleverageNotInitiated,
    #[error("Callback caller {caller} is not the settlement engine {expected}")]
    UnauthorizedCaller { caller: Address, expected: Address },
    #[error("Callback amount {provided} does not match the staged debt to repay {staged}")]
    DebtMismatch { staged: U256, provided: U256 },
    #[error("Callback user {provided} does not match the staged user {staged}")]
    UserMismatch { staged: Address, provided: Address },
    #[error("Offer leg has not arrived: received {received} of the debt token during this call, {required} required")]
    OfferLegMissing { received: U256, required: U256 },
    #[error("Lending pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Math error: {0}")]
    Math(#[from] MathError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Custodian {custodian} belongs to pool {reported}, not {expected}")]
    CustodianPoolMismatch { custodian: Address, reported: Address, expected: Address },
    #[error("Custodian {0} is not authorized by the pool")]
    CustodianNotAuthorized(Address),
    #[error("Configured {component} {configured} does not match {actual}")]
    AddressMismatch { component: &'static str, configured: Address, actual: Address },
    #[error("Configured ilk {configured} does not match the custodian's ilk {actual}")]
    IlkMismatch { configured: IlkIndex, actual: IlkIndex },
}

#[derive(Error, Debug)]
pub enum DeleverageError {
    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderValidationError),
    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError<CallbackError>),
    #[error("Settlement engine did not fulfil the order")]
    NotFulfilled,
}

impl DeleverageError {
    /// The callback's own error, if that is what aborted the settlement.
    pub fn callback_error(&self) -> Option<&CallbackError> {
        match self {
            DeleverageError::Settlement(SettlementError::Callback(err)) => Some(err),
            _ => None,
        }
    }
}

/// Settles deleverage orders for positions of one ilk.
///
/// Repayment is converted to normalized debt by flooring, so the pool may
/// charge a few wei less than the offer leg delivered. That remainder is
/// sent on to the caller, so none of the offer leg stays with the deleverager.
#[derive(Debug)]
pub struct Deleverager<P, J, E> {
    address: Address,
    ilk: IlkIndex,
    debt_token: Address,
    collateral_token: Address,
    pool: P,
    join: J,
    engine: E,
    ledger: TokenLedger,
    context: TransientContext,
}

impl<P: LendingPool + Checkpoint, J: CollateralJoin, E: SettlementEngine> Deleverager<P, J, E> {
    /// Wire up a deleverager at `address`.
    ///
    /// The ilk and collateral token are the custodian's. The pool is approved
    /// to pull the debt token for repayments, and the engine to pull the
    /// collateral token for the maker's leg.
    pub fn new(address: Address, pool: P, join: J, engine: E, ledger: TokenLedger) -> Result<Self, ConfigurationError> {
        if join.pool() != pool.address() {
            return Err(ConfigurationError::CustodianPoolMismatch {
                custodian: join.address(),
                reported: join.pool(),
                expected: pool.address(),
            });
        }
        if !pool.is_custodian_authorized(join.address()) {
            return Err(ConfigurationError::CustodianNotAuthorized(join.address()));
        }

        let debt_token = pool.debt_token();
        let collateral_token = join.gem();
        ledger.approve(debt_token, address, pool.address(), U256::MAX);
        ledger.approve(collateral_token, address, engine.address(), U256::MAX);

        info!(
            address = %address,
            ilk = %join.ilk(),
            pool = %pool.address(),
            custodian = %join.address(),
            settlement_engine = %engine.address(),
            "Deleverager ready"
        );
        Ok(Self {
            address,
            ilk: join.ilk(),
            debt_token,
            collateral_token,
            pool,
            join,
            engine,
            ledger,
            context: TransientContext::default(),
        })
    }

    /// Build from deployment settings, checking every configured address
    /// against the collaborators actually supplied.
    pub fn from_settings(
        settings: &DeleveragerSettings,
        pool: P,
        join: J,
        engine: E,
        ledger: TokenLedger,
    ) -> Result<Self, ConfigurationError> {
        let checks = [
            ("pool", settings.pool, pool.address()),
            ("collateral join", settings.collateral_join, join.address()),
            ("settlement engine", settings.settlement_engine, engine.address()),
            ("debt token", settings.debt_token, pool.debt_token()),
            ("collateral token", settings.collateral_token, join.gem()),
        ];
        for (component, configured, actual) in checks {
            if configured != actual {
                return Err(ConfigurationError::AddressMismatch { component, configured, actual });
            }
        }
        let configured_ilk = IlkIndex(settings.ilk_index);
        if configured_ilk != join.ilk() {
            return Err(ConfigurationError::IlkMismatch { configured: configured_ilk, actual: join.ilk() });
        }
        Self::new(settings.address, pool, join, engine, ledger)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ilk(&self) -> IlkIndex {
        self.ilk
    }

    pub fn debt_token(&self) -> Address {
        self.debt_token
    }

    pub fn collateral_token(&self) -> Address {
        self.collateral_token
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn join(&self) -> &J {
        &self.join
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// True only while a `deleverage` call is in flight.
    pub fn is_deleverage_initiated(&self) -> bool {
        self.context.is_initiated()
    }

    /// What `order` must look like for `caller` to deleverage with these amounts.
    pub fn expectations(&self, caller: Address, collateral_to_remove: U256, debt_to_repay: U256) -> OrderExpectations {
        OrderExpectations {
            deleverager: self.address,
            caller,
            debt_token: self.debt_token,
            collateral_token: self.collateral_token,
            debt_to_repay,
            collateral_to_remove,
        }
    }

    /// Repay `debt_to_repay` of `caller`'s debt with the maker's debt asset
    /// and release `collateral_to_remove` of collateral to pay the maker.
    #[instrument(skip_all, fields(caller = %caller, order_hash = %order.hash()))]
    pub fn deleverage(
        &mut self,
        caller: Address,
        order: &Order,
        collateral_to_remove: U256,
        debt_to_repay: U256,
    ) -> Result<(), DeleverageError> {
        validate_order(order, &self.expectations(caller, collateral_to_remove, debt_to_repay))?;

        let Self { address, ilk, debt_token, pool, join, engine, ledger, context, .. } = self;
        let checkpoint = SettlementCheckpoint::take(&*ledger, &*pool);
        let guard = context.stage(StagedDeleverage {
            user: caller,
            collateral_to_remove,
            debt_to_repay,
            debt_balance_before: ledger.balance_of(*debt_token, *address),
        });
        let mut callback = DeleverageCallback {
            env: CallbackEnv {
                address: *address,
                ilk: *ilk,
                debt_token: *debt_token,
                settlement_engine: engine.address(),
                pool: &*pool,
                join: &*join,
                ledger: &*ledger,
            },
            guard,
        };

        let filled = engine.fulfill_order(*address, order, ConduitKey::ZERO, &mut callback)?;
        if !callback.is_consumed() {
            warn!("Settlement engine completed without invoking the deleverage callback");
        }
        drop(callback);

        if !filled {
            return Err(DeleverageError::NotFulfilled);
        }
        checkpoint.commit();
        info!(
            collateral_removed = %collateral_to_remove,
            debt_repaid = %debt_to_repay,
            "Deleverage settled"
        );
        Ok(())
    }

    /// Token-shaped entry point for the settlement engine.
    ///
    /// The engine reaches the deleverager through the handle passed to it
    /// inside [`Deleverager::deleverage`]; while `self` is available here no
    /// call is in flight, so this always fails closed.
    pub fn transfer_from(&mut self, msg_sender: Address, _from: Address, to: Address, amount: U256) -> Result<(), CallbackError> {
        let env = CallbackEnv {
            address: self.address,
            ilk: self.ilk,
            debt_token: self.debt_token,
            settlement_engine: self.engine.address(),
            pool: &self.pool,
            join: &self.join,
            ledger: &self.ledger,
        };
        callback::settle_staged(&env, &mut self.context, msg_sender, to, amount)
    }
}
