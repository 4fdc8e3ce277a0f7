#![allow(dead_code)]

use common_types::{Address, IlkIndex, Order, Position, U256};
use deleverager::quote::DeleverageTerms;
use deleverager::Deleverager;
use ed25519_dalek::SigningKey;
use lending_pool::{FixedSpotOracle, InMemoryJoin, InMemoryPool, LendingPool};
use rate_math::{RAY, WAD};
use settlement_engine::{OrderSettlementEngine, SettlementEngine};
use std::sync::Arc;
use token_ledger::TokenLedger;

pub const DELEVERAGER: Address = Address::repeat_byte(0xde);
pub const POOL: Address = Address::repeat_byte(0x90);
pub const JOIN: Address = Address::repeat_byte(0x91);
pub const ENGINE: Address = Address::repeat_byte(0xe0);
pub const DEBT_TOKEN: Address = Address::repeat_byte(0xd0);
pub const COLLATERAL_TOKEN: Address = Address::repeat_byte(0xc0);
pub const USER: Address = Address::repeat_byte(0x01);
pub const MAKER: Address = Address::repeat_byte(0x0a);
pub const ILK: IlkIndex = IlkIndex(1);

pub const MAKER_FUNDS: u64 = 1_000;

pub fn wad(units: u64) -> U256 {
    U256::from(units) * WAD
}

pub fn ray_fraction(numerator: u64, denominator: u64) -> U256 {
    RAY * U256::from(numerator) / U256::from(denominator)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub type InMemoryDeleverager<E = OrderSettlementEngine> = Deleverager<InMemoryPool, InMemoryJoin, E>;

/// A pool with one user position, its custodian, an engine and a funded maker.
pub struct Fixture {
    pub ledger: TokenLedger,
    pub pool: InMemoryPool,
    pub join: InMemoryJoin,
    pub engine: OrderSettlementEngine,
    pub maker_key: SigningKey,
}

impl Fixture {
    pub fn new(rate: U256, spot: U256, collateral: U256, normalized_debt: U256) -> Self {
        init_tracing();
        let ledger = TokenLedger::new();

        let pool = InMemoryPool::new(POOL, DEBT_TOKEN, ledger.clone());
        pool.init_ilk(ILK, rate, Arc::new(FixedSpotOracle::new(spot))).unwrap();
        let join = InMemoryJoin::new(JOIN, pool.clone(), ILK, COLLATERAL_TOKEN, ledger.clone());
        pool.authorize_custodian(JOIN);

        // The custodian holds the tokens backing the user's pledged collateral.
        ledger.mint(COLLATERAL_TOKEN, JOIN, collateral).unwrap();
        pool.open_position(ILK, USER, collateral, normalized_debt).unwrap();
        pool.allow(USER, DELEVERAGER);

        let engine = OrderSettlementEngine::new(ENGINE, ledger.clone());
        engine.set_timestamp(1_000);
        let maker_key = SigningKey::from_bytes(&[0x4d; 32]);
        engine.register_offerer(MAKER, maker_key.verifying_key());
        ledger.mint(DEBT_TOKEN, MAKER, wad(MAKER_FUNDS)).unwrap();
        ledger.approve(DEBT_TOKEN, MAKER, ENGINE, U256::MAX);

        Self { ledger, pool, join, engine, maker_key }
    }

    /// Rate 1.1, spot 2.0, 100 collateral against 80 normalized debt.
    pub fn standard() -> Self {
        Self::new(ray_fraction(11, 10), RAY * U256::from(2u64), wad(100), wad(80))
    }

    pub fn deleverager(&self) -> InMemoryDeleverager {
        self.deleverager_with(self.engine.clone())
    }

    pub fn deleverager_with<E: SettlementEngine>(&self, engine: E) -> InMemoryDeleverager<E> {
        Deleverager::new(DELEVERAGER, self.pool.clone(), self.join.clone(), engine, self.ledger.clone()).unwrap()
    }

    pub fn terms(&self, debt_to_repay: U256, collateral_to_remove: U256) -> DeleverageTerms {
        DeleverageTerms {
            deleverager: DELEVERAGER,
            maker: MAKER,
            user: USER,
            debt_token: DEBT_TOKEN,
            collateral_token: COLLATERAL_TOKEN,
            debt_to_repay,
            collateral_to_remove,
            collateral_recipient: MAKER,
            start_time: 0,
            end_time: u64::MAX,
            salt: U256::from(1u64),
            counter: U256::ZERO,
        }
    }

    pub fn signed_order(&self, debt_to_repay: U256, collateral_to_remove: U256) -> Order {
        self.terms(debt_to_repay, collateral_to_remove).sign(&self.maker_key)
    }

    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        self.ledger.balance_of(token, holder)
    }
}

/// A failed `deleverage` must leave every balance and the position as the
/// standard fixture set them up.
pub fn assert_untouched<E: SettlementEngine>(fixture: &Fixture, deleverager: &InMemoryDeleverager<E>, order: &Order) {
    assert_untouched_holding(fixture, deleverager, order, U256::ZERO);
}

/// [`assert_untouched`] for a deleverager that already held `deleverager_debt`.
pub fn assert_untouched_holding<E: SettlementEngine>(
    fixture: &Fixture,
    deleverager: &InMemoryDeleverager<E>,
    order: &Order,
    deleverager_debt: U256,
) {
    assert_eq!(
        fixture.pool.position(ILK, USER),
        Position { collateral: wad(100), normalized_debt: wad(80) }
    );
    assert_eq!(fixture.balance(DEBT_TOKEN, MAKER), wad(MAKER_FUNDS));
    assert_eq!(fixture.balance(DEBT_TOKEN, DELEVERAGER), deleverager_debt);
    assert_eq!(fixture.balance(DEBT_TOKEN, POOL), U256::ZERO);
    assert_eq!(fixture.balance(DEBT_TOKEN, USER), U256::ZERO);
    assert_eq!(fixture.balance(COLLATERAL_TOKEN, JOIN), wad(100));
    assert_eq!(fixture.balance(COLLATERAL_TOKEN, DELEVERAGER), U256::ZERO);
    assert_eq!(fixture.balance(COLLATERAL_TOKEN, MAKER), U256::ZERO);
    assert_eq!(fixture.pool.collateral_balance(ILK, DELEVERAGER), U256::ZERO);
    assert_eq!(fixture.engine.order_status(&order.hash()), None);
    assert!(!deleverager.is_deleverage_initiated());
}
