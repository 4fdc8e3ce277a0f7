use crate::{LendingPool, PoolError, SpotOracle};
use common_types::{Address, IlkIndex, Position, U256};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use token_ledger::{Checkpoint, TokenLedger};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct IlkState {
    rate: U256,
    oracle: Arc<dyn SpotOracle>,
    total_normalized_debt: U256,
}

/// In-memory lending pool lending a single base asset against per-ilk
/// collateral. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryPool {
    address: Address,
    debt_token: Address,
    ledger: TokenLedger,
    ilks: Arc<DashMap<IlkIndex, IlkState>>,
    positions: Arc<DashMap<(IlkIndex, Address), Position>>,
    collateral_balances: Arc<DashMap<(IlkIndex, Address), U256>>,
    operators: Arc<DashSet<(Address, Address)>>,
    custodians: Arc<DashSet<Address>>,
}

impl InMemoryPool {
    pub fn new(address: Address, debt_token: Address, ledger: TokenLedger) -> Self {
        Self {
            address,
            debt_token,
            ledger,
            ilks: Arc::new(DashMap::new()),
            positions: Arc::new(DashMap::new()),
            collateral_balances: Arc::new(DashMap::new()),
            operators: Arc::new(DashSet::new()),
            custodians: Arc::new(DashSet::new()),
        }
    }

    pub fn init_ilk(&self, ilk: IlkIndex, rate: U256, oracle: Arc<dyn SpotOracle>) -> Result<(), PoolError> {
        if self.ilks.contains_key(&ilk) {
            return Err(PoolError::IlkAlreadyInitialized(ilk));
        }
        self.ilks.insert(ilk, IlkState { rate, oracle, total_normalized_debt: U256::ZERO });
        info!(ilk = %ilk, rate = %rate, "Initialized ilk");
        Ok(())
    }

    /// Move the rate accumulator forward. Rates never decrease.
    pub fn accrue(&self, ilk: IlkIndex, new_rate: U256) -> Result<(), PoolError> {
        let mut state = self.ilks.get_mut(&ilk).ok_or(PoolError::UnknownIlk(ilk))?;
        if new_rate < state.rate {
            return Err(PoolError::RateDecrease { ilk, current: state.rate, requested: new_rate });
        }
        state.rate = new_rate;
        Ok(())
    }

    pub fn set_spot_oracle(&self, ilk: IlkIndex, oracle: Arc<dyn SpotOracle>) -> Result<(), PoolError> {
        let mut state = self.ilks.get_mut(&ilk).ok_or(PoolError::UnknownIlk(ilk))?;
        state.oracle = oracle;
        Ok(())
    }

    pub fn authorize_custodian(&self, custodian: Address) {
        self.custodians.insert(custodian);
    }

    pub fn deauthorize_custodian(&self, custodian: Address) {
        self.custodians.remove(&custodian);
    }

    /// Let `operator` manage `owner`'s positions and spend on its behalf.
    pub fn allow(&self, owner: Address, operator: Address) {
        self.operators.insert((owner, operator));
    }

    pub fn disallow(&self, owner: Address, operator: Address) {
        self.operators.remove(&(owner, operator));
    }

    pub fn can_modify(&self, owner: Address, caller: Address) -> bool {
        owner == caller || self.operators.contains(&(owner, caller))
    }

    /// Seed a position directly. Borrowing flows live outside this pool
    /// model; the seeded position must still be safe.
    pub fn open_position(
        &self,
        ilk: IlkIndex,
        user: Address,
        collateral: U256,
        normalized_debt: U256,
    ) -> Result<(), PoolError> {
        let (rate, spot, previous_total) = {
            let state = self.ilks.get(&ilk).ok_or(PoolError::UnknownIlk(ilk))?;
            (state.rate, state.oracle.get_spot()?, state.total_normalized_debt)
        };
        if !rate_math::is_safe(normalized_debt, rate, collateral, spot)? {
            return Err(PoolError::Unsafe { user, normalized_debt, collateral });
        }
        let previous = self.position(ilk, user);
        let total = previous_total
            .checked_sub(previous.normalized_debt)
            .and_then(|t| t.checked_add(normalized_debt))
            .ok_or(rate_math::MathError::Overflow("open_position"))?;
        self.positions.insert((ilk, user), Position { collateral, normalized_debt });
        if let Some(mut state) = self.ilks.get_mut(&ilk) {
            state.total_normalized_debt = total;
        }
        Ok(())
    }

    pub fn total_normalized_debt(&self, ilk: IlkIndex) -> Result<U256, PoolError> {
        self.ilks
            .get(&ilk)
            .map(|state| state.total_normalized_debt)
            .ok_or(PoolError::UnknownIlk(ilk))
    }

    /// Internal (not yet exited) collateral balance of `holder`.
    pub fn collateral_balance(&self, ilk: IlkIndex, holder: Address) -> U256 {
        self.collateral_balances.get(&(ilk, holder)).map(|b| *b).unwrap_or(U256::ZERO)
    }

    /// Custodian-only: credit internal collateral after a deposit.
    pub fn credit_collateral_balance(
        &self,
        caller: Address,
        ilk: IlkIndex,
        holder: Address,
        amount: U256,
    ) -> Result<(), PoolError> {
        self.require_custodian(caller)?;
        let mut balance = self.collateral_balances.entry((ilk, holder)).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(rate_math::MathError::Overflow("credit_collateral_balance"))?;
        Ok(())
    }

    /// Custodian-only: debit internal collateral ahead of an exit.
    pub fn debit_collateral_balance(
        &self,
        caller: Address,
        ilk: IlkIndex,
        holder: Address,
        amount: U256,
    ) -> Result<(), PoolError> {
        self.require_custodian(caller)?;
        let mut balance = self.collateral_balances.entry((ilk, holder)).or_default();
        if *balance < amount {
            return Err(PoolError::InsufficientCollateralBalance { holder, balance: *balance, requested: amount });
        }
        *balance -= amount;
        Ok(())
    }

    fn require_custodian(&self, caller: Address) -> Result<(), PoolError> {
        if self.custodians.contains(&caller) {
            Ok(())
        } else {
            Err(PoolError::UnauthorizedCustodian(caller))
        }
    }
}

/// Ilk, position and internal collateral state at the time it was taken.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    ilks: DashMap<IlkIndex, IlkState>,
    positions: DashMap<(IlkIndex, Address), Position>,
    collateral_balances: DashMap<(IlkIndex, Address), U256>,
}

impl Checkpoint for InMemoryPool {
    type Snapshot = PoolSnapshot;

    fn checkpoint(&self) -> PoolSnapshot {
        PoolSnapshot {
            ilks: (*self.ilks).clone(),
            positions: (*self.positions).clone(),
            collateral_balances: (*self.collateral_balances).clone(),
        }
    }

    fn rollback(&self, snapshot: PoolSnapshot) {
        token_ledger::restore(&self.ilks, snapshot.ilks);
        token_ledger::restore(&self.positions, snapshot.positions);
        token_ledger::restore(&self.collateral_balances, snapshot.collateral_balances);
        debug!(pool = %self.address, "Pool rolled back");
    }
}

impl LendingPool for InMemoryPool {
    fn address(&self) -> Address {
        self.address
    }

    fn debt_token(&self) -> Address {
        self.debt_token
    }

    fn rate(&self, ilk: IlkIndex) -> Result<U256, PoolError> {
        self.ilks.get(&ilk).map(|state| state.rate).ok_or(PoolError::UnknownIlk(ilk))
    }

    fn spot(&self, ilk: IlkIndex) -> Result<Arc<dyn SpotOracle>, PoolError> {
        self.ilks
            .get(&ilk)
            .map(|state| state.oracle.clone())
            .ok_or(PoolError::UnknownIlk(ilk))
    }

    fn position(&self, ilk: IlkIndex, user: Address) -> Position {
        self.positions.get(&(ilk, user)).map(|p| *p).unwrap_or_default()
    }

    fn is_custodian_authorized(&self, custodian: Address) -> bool {
        self.custodians.contains(&custodian)
    }

    fn repay(
        &self,
        caller: Address,
        ilk: IlkIndex,
        user: Address,
        payer: Address,
        normalized_amount: U256,
    ) -> Result<(), PoolError> {
        if !self.can_modify(payer, caller) {
            return Err(PoolError::NotAllowed { owner: payer, caller });
        }
        let rate = self.rate(ilk)?;
        let position = self.position(ilk, user);
        if normalized_amount > position.normalized_debt {
            return Err(PoolError::RepayExceedsDebt {
                user,
                normalized_debt: position.normalized_debt,
                requested: normalized_amount,
            });
        }
        let owed = rate_math::actual_debt(normalized_amount, rate)?;
        self.ledger.transfer_from(self.debt_token, self.address, payer, self.address, owed)?;

        self.positions.insert(
            (ilk, user),
            Position { normalized_debt: position.normalized_debt - normalized_amount, ..position },
        );
        if let Some(mut state) = self.ilks.get_mut(&ilk) {
            state.total_normalized_debt = state.total_normalized_debt.saturating_sub(normalized_amount);
        }
        info!(ilk = %ilk, user = %user, payer = %payer, normalized = %normalized_amount, paid = %owed, "Repaid debt");
        Ok(())
    }

    fn withdraw_collateral(
        &self,
        caller: Address,
        ilk: IlkIndex,
        user: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), PoolError> {
        if !self.can_modify(user, caller) {
            return Err(PoolError::NotAllowed { owner: user, caller });
        }
        let (rate, oracle) = {
            let state = self.ilks.get(&ilk).ok_or(PoolError::UnknownIlk(ilk))?;
            (state.rate, state.oracle.clone())
        };
        let position = self.position(ilk, user);
        if amount > position.collateral {
            return Err(PoolError::InsufficientCollateral { user, collateral: position.collateral, requested: amount });
        }
        let collateral = position.collateral - amount;
        if position.normalized_debt > U256::ZERO {
            let spot = oracle.get_spot()?;
            if !rate_math::is_safe(position.normalized_debt, rate, collateral, spot)? {
                return Err(PoolError::Unsafe { user, normalized_debt: position.normalized_debt, collateral });
            }
        }

        self.positions.insert((ilk, user), Position { collateral, ..position });
        let mut balance = self.collateral_balances.entry((ilk, recipient)).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(rate_math::MathError::Overflow("withdraw_collateral"))?;
        debug!(ilk = %ilk, user = %user, recipient = %recipient, amount = %amount, "Withdrew collateral");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedSpotOracle;
    use rate_math::{RAY, WAD};

    const POOL: Address = Address::repeat_byte(0x90);
    const DEBT_TOKEN: Address = Address::repeat_byte(0xd0);
    const USER: Address = Address::repeat_byte(0x01);
    const OPERATOR: Address = Address::repeat_byte(0x02);
    const ILK: IlkIndex = IlkIndex(0);

    fn wad(units: u64) -> U256 {
        U256::from(units) * WAD
    }

    /// Pool with spot 2.0 and a user holding 100 collateral against 100 debt.
    fn setup(rate: U256) -> (InMemoryPool, TokenLedger) {
        let ledger = TokenLedger::new();
        let pool = InMemoryPool::new(POOL, DEBT_TOKEN, ledger.clone());
        let oracle = Arc::new(FixedSpotOracle::new(RAY * U256::from(2u64)));
        pool.init_ilk(ILK, rate, oracle).unwrap();
        pool.open_position(ILK, USER, wad(100), wad(100)).unwrap();
        (pool, ledger)
    }

    #[test]
    fn test_open_position_rejects_unsafe() {
        let (pool, _) = setup(RAY);
        let err = pool.open_position(ILK, OPERATOR, wad(10), wad(21)).unwrap_err();
        assert!(matches!(err, PoolError::Unsafe { .. }));
        assert_eq!(pool.total_normalized_debt(ILK).unwrap(), wad(100));
    }

    #[test]
    fn test_repay_pulls_actual_debt_from_payer() {
        let rate = RAY + RAY / U256::from(10u64);
        let (pool, ledger) = setup(rate);
        ledger.mint(DEBT_TOKEN, USER, wad(100)).unwrap();
        ledger.approve(DEBT_TOKEN, USER, POOL, U256::MAX);

        pool.repay(USER, ILK, USER, USER, wad(50)).unwrap();

        assert_eq!(pool.position(ILK, USER).normalized_debt, wad(50));
        assert_eq!(ledger.balance_of(DEBT_TOKEN, POOL), wad(55));
        assert_eq!(ledger.balance_of(DEBT_TOKEN, USER), wad(45));
        assert_eq!(pool.total_normalized_debt(ILK).unwrap(), wad(50));
    }

    #[test]
    fn test_repay_rejects_more_than_owed() {
        let (pool, ledger) = setup(RAY);
        ledger.mint(DEBT_TOKEN, USER, wad(500)).unwrap();
        ledger.approve(DEBT_TOKEN, USER, POOL, U256::MAX);
        let err = pool.repay(USER, ILK, USER, USER, wad(101)).unwrap_err();
        assert!(matches!(err, PoolError::RepayExceedsDebt { .. }));
    }

    #[test]
    fn test_repay_from_foreign_payer_requires_permission() {
        let (pool, ledger) = setup(RAY);
        ledger.mint(DEBT_TOKEN, USER, wad(10)).unwrap();
        ledger.approve(DEBT_TOKEN, USER, POOL, U256::MAX);
        let err = pool.repay(OPERATOR, ILK, USER, USER, wad(1)).unwrap_err();
        assert_eq!(err, PoolError::NotAllowed { owner: USER, caller: OPERATOR });
    }

    #[test]
    fn test_withdraw_requires_permission() {
        let (pool, _) = setup(RAY);
        let err = pool.withdraw_collateral(OPERATOR, ILK, USER, OPERATOR, wad(1)).unwrap_err();
        assert_eq!(err, PoolError::NotAllowed { owner: USER, caller: OPERATOR });

        pool.allow(USER, OPERATOR);
        pool.withdraw_collateral(OPERATOR, ILK, USER, OPERATOR, wad(1)).unwrap();
        assert_eq!(pool.position(ILK, USER).collateral, wad(99));
        assert_eq!(pool.collateral_balance(ILK, OPERATOR), wad(1));
    }

    #[test]
    fn test_withdraw_enforces_safety() {
        let (pool, _) = setup(RAY);
        // 100 debt needs at least 50 collateral at spot 2.0
        pool.withdraw_collateral(USER, ILK, USER, USER, wad(50)).unwrap();
        let err = pool.withdraw_collateral(USER, ILK, USER, USER, U256::from(1u64)).unwrap_err();
        assert!(matches!(err, PoolError::Unsafe { .. }));
    }

    #[test]
    fn test_rate_never_decreases() {
        let (pool, _) = setup(RAY);
        pool.accrue(ILK, RAY + U256::from(1u64)).unwrap();
        assert!(matches!(pool.accrue(ILK, RAY), Err(PoolError::RateDecrease { .. })));
    }

    #[test]
    fn test_collateral_balance_moves_are_custodian_only() {
        let (pool, _) = setup(RAY);
        let custodian = Address::repeat_byte(0xc0);
        assert_eq!(
            pool.credit_collateral_balance(custodian, ILK, USER, wad(1)),
            Err(PoolError::UnauthorizedCustodian(custodian))
        );
        pool.authorize_custodian(custodian);
        assert!(pool.is_custodian_authorized(custodian));
        pool.credit_collateral_balance(custodian, ILK, USER, wad(1)).unwrap();
        pool.debit_collateral_balance(custodian, ILK, USER, wad(1)).unwrap();
        assert!(matches!(
            pool.debit_collateral_balance(custodian, ILK, USER, wad(1)),
            Err(PoolError::InsufficientCollateralBalance { .. })
        ));
    }

    #[test]
    fn test_rollback_restores_positions_and_collateral_balances() {
        let (pool, _) = setup(RAY);
        let snapshot = pool.checkpoint();

        pool.withdraw_collateral(USER, ILK, USER, OPERATOR, wad(10)).unwrap();
        pool.accrue(ILK, RAY * U256::from(2u64)).unwrap();
        pool.rollback(snapshot);

        assert_eq!(pool.position(ILK, USER), Position { collateral: wad(100), normalized_debt: wad(100) });
        assert_eq!(pool.collateral_balance(ILK, OPERATOR), U256::ZERO);
        assert_eq!(pool.rate(ILK).unwrap(), RAY);
    }
}
