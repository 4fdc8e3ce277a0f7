use crate::{CollateralJoin, InMemoryPool, LendingPool, PoolError};
use common_types::{Address, IlkIndex, U256};
use token_ledger::TokenLedger;
use tracing::debug;

/// Collateral custodian for one ilk of an [`InMemoryPool`].
///
/// Holds the collateral tokens and mirrors them as internal pool balances.
/// The pool must authorize the custodian before deposits or exits work.
#[derive(Debug, Clone)]
pub struct InMemoryJoin {
    address: Address,
    pool: InMemoryPool,
    ilk: IlkIndex,
    gem: Address,
    ledger: TokenLedger,
}

impl InMemoryJoin {
    pub fn new(address: Address, pool: InMemoryPool, ilk: IlkIndex, gem: Address, ledger: TokenLedger) -> Self {
        Self { address, pool, ilk, gem, ledger }
    }

    /// Take `amount` collateral tokens from the caller into custody and
    /// credit them to `user`'s internal balance.
    pub fn join(&self, caller: Address, user: Address, amount: U256) -> Result<(), PoolError> {
        self.ledger.transfer_from(self.gem, self.address, caller, self.address, amount)?;
        self.pool.credit_collateral_balance(self.address, self.ilk, user, amount)?;
        debug!(ilk = %self.ilk, user = %user, amount = %amount, "Joined collateral");
        Ok(())
    }
}

impl CollateralJoin for InMemoryJoin {
    fn address(&self) -> Address {
        self.address
    }

    fn pool(&self) -> Address {
        self.pool.address()
    }

    fn ilk(&self) -> IlkIndex {
        self.ilk
    }

    fn gem(&self) -> Address {
        self.gem
    }

    fn exit(&self, caller: Address, recipient: Address, amount: U256) -> Result<(), PoolError> {
        self.pool.debit_collateral_balance(self.address, self.ilk, caller, amount)?;
        self.ledger.transfer(self.gem, self.address, recipient, amount)?;
        debug!(ilk = %self.ilk, caller = %caller, recipient = %recipient, amount = %amount, "Exited collateral");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedSpotOracle;
    use rate_math::RAY;
    use std::sync::Arc;

    const POOL: Address = Address::repeat_byte(0x90);
    const JOIN: Address = Address::repeat_byte(0x91);
    const GEM: Address = Address::repeat_byte(0x92);
    const DEBT_TOKEN: Address = Address::repeat_byte(0x93);
    const USER: Address = Address::repeat_byte(0x01);
    const ILK: IlkIndex = IlkIndex(3);

    fn setup() -> (InMemoryPool, InMemoryJoin, TokenLedger) {
        let ledger = TokenLedger::new();
        let pool = InMemoryPool::new(POOL, DEBT_TOKEN, ledger.clone());
        pool.init_ilk(ILK, RAY, Arc::new(FixedSpotOracle::new(RAY))).unwrap();
        let join = InMemoryJoin::new(JOIN, pool.clone(), ILK, GEM, ledger.clone());
        (pool, join, ledger)
    }

    #[test]
    fn test_join_then_exit_roundtrips_tokens() {
        let (pool, join, ledger) = setup();
        pool.authorize_custodian(JOIN);
        ledger.mint(GEM, USER, U256::from(10u64)).unwrap();
        ledger.approve(GEM, USER, JOIN, U256::MAX);

        join.join(USER, USER, U256::from(10u64)).unwrap();
        assert_eq!(pool.collateral_balance(ILK, USER), U256::from(10u64));
        assert_eq!(ledger.balance_of(GEM, JOIN), U256::from(10u64));

        join.exit(USER, USER, U256::from(4u64)).unwrap();
        assert_eq!(pool.collateral_balance(ILK, USER), U256::from(6u64));
        assert_eq!(ledger.balance_of(GEM, USER), U256::from(4u64));
    }

    #[test]
    fn test_exit_requires_pool_authorization() {
        let (_pool, join, _ledger) = setup();
        assert_eq!(
            join.exit(USER, USER, U256::from(1u64)),
            Err(PoolError::UnauthorizedCustodian(JOIN))
        );
    }

    #[test]
    fn test_reports_its_pool() {
        let (_pool, join, _ledger) = setup();
        assert_eq!(join.pool(), POOL);
        assert_eq!(join.ilk(), ILK);
        assert_eq!(join.gem(), GEM);
    }
}
