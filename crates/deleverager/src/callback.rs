use crate::context::{ContextGuard, TransientContext};
use crate::CallbackError;
use common_types::{Address, IlkIndex, U256};
use lending_pool::{CollateralJoin, LendingPool};
use settlement_engine::TransferCallback;
use token_ledger::TokenLedger;
use tracing::{debug, info};

/// Everything the callback touches besides the transient context.
pub(crate) struct CallbackEnv<'a, P, J> {
    pub(crate) address: Address,
    pub(crate) ilk: IlkIndex,
    pub(crate) debt_token: Address,
    pub(crate) settlement_engine: Address,
    pub(crate) pool: &'a P,
    pub(crate) join: &'a J,
    pub(crate) ledger: &'a TokenLedger,
}

/// Repay `user`'s debt and pull the staged collateral out of the pool.
///
/// `amount` is the sentinel item's amount and must equal the staged debt to
/// repay; `user` is its recipient. The sentinel's `from` is ignored.
pub(crate) fn settle_staged<P: LendingPool, J: CollateralJoin>(
    env: &CallbackEnv<'_, P, J>,
    context: &mut TransientContext,
    msg_sender: Address,
    user: Address,
    amount: U256,
) -> Result<(), CallbackError> {
    if !context.is_initiated() {
        return Err(CallbackError::DeleverageNotInitiated);
    }
    if msg_sender != env.settlement_engine {
        return Err(CallbackError::UnauthorizedCaller { caller: msg_sender, expected: env.settlement_engine });
    }
    let staged = context.take()?;
    if amount != staged.debt_to_repay {
        return Err(CallbackError::DebtMismatch { staged: staged.debt_to_repay, provided: amount });
    }
    if user != staged.user {
        return Err(CallbackError::UserMismatch { staged: staged.user, provided: user });
    }

    // The offer leg is delivered before any consideration item.
    let held = env.ledger.balance_of(env.debt_token, env.address);
    let received = held.saturating_sub(staged.debt_balance_before);
    if received < staged.debt_to_repay {
        return Err(CallbackError::OfferLegMissing { received, required: staged.debt_to_repay });
    }

    let rate = env.pool.rate(env.ilk)?;
    let normalized = rate_math::normalize_debt(staged.debt_to_repay, rate)?;
    debug!(user = %user, rate = %rate, normalized = %normalized, "Converted repayment to normalized debt");

    env.pool.repay(env.address, env.ilk, user, env.address, normalized)?;
    env.pool.withdraw_collateral(env.address, env.ilk, user, env.address, staged.collateral_to_remove)?;
    env.join.exit(env.address, env.address, staged.collateral_to_remove)?;

    // Flooring leaves part of the offer leg unspent; it belongs to the user.
    let paid = rate_math::actual_debt(normalized, rate)?;
    let remainder = staged.debt_to_repay.saturating_sub(paid);
    if !remainder.is_zero() {
        env.ledger.transfer(env.debt_token, env.address, user, remainder)?;
        debug!(user = %user, remainder = %remainder, "Returned rounding remainder");
    }

    info!(
        user = %user,
        ilk = %env.ilk,
        debt_repaid = %staged.debt_to_repay,
        normalized_repaid = %normalized,
        collateral_removed = %staged.collateral_to_remove,
        "Settled deleverage callback"
    );
    Ok(())
}

/// The handle given to the settlement engine for one `deleverage` call.
pub(crate) struct DeleverageCallback<'a, P, J> {
    pub(crate) env: CallbackEnv<'a, P, J>,
    pub(crate) guard: ContextGuard<'a>,
}

impl<P: LendingPool, J: CollateralJoin> DeleverageCallback<'_, P, J> {
    pub(crate) fn is_consumed(&self) -> bool {
        self.guard.is_consumed()
    }
}

impl<P: LendingPool, J: CollateralJoin> TransferCallback for DeleverageCallback<'_, P, J> {
    type Error = CallbackError;

    fn token_address(&self) -> Address {
        self.env.address
    }

    fn transfer_from(&mut self, msg_sender: Address, _from: Address, to: Address, amount: U256) -> Result<(), CallbackError> {
        settle_staged(&self.env, self.guard.context(), msg_sender, to, amount)
    }
}
