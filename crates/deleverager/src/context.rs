use crate::CallbackError;
use common_types::{Address, U256};

/// Values staged by `deleverage` for the callback to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedDeleverage {
    pub user: Address,
    pub collateral_to_remove: U256,
    pub debt_to_repay: U256,
    /// The deleverager's debt-token balance before the engine ran.
    pub debt_balance_before: U256,
}

/// State that only lives for the duration of one `deleverage` call.
///
/// The window is opened by [`TransientContext::stage`] and closed when the
/// returned guard is dropped, whichever way the call ends. Inside the window
/// the staged values can be taken exactly once.
#[derive(Debug, Default)]
pub struct TransientContext {
    initiated: bool,
    staged: Option<StagedDeleverage>,
}

impl TransientContext {
    pub fn is_initiated(&self) -> bool {
        self.initiated
    }

    pub(crate) fn stage(&mut self, staged: StagedDeleverage) -> ContextGuard<'_> {
        self.initiated = true;
        self.staged = Some(staged);
        ContextGuard { context: self }
    }

    /// Consume the staged values. Fails closed outside a window and once the
    /// values have been taken.
    pub(crate) fn take(&mut self) -> Result<StagedDeleverage, CallbackError> {
        if !self.initiated {
            return Err(CallbackError::DeleverageNotInitiated);
        }
        self.staged.take().ok_or(CallbackError::DeleverageNotInitiated)
    }

    fn clear(&mut self) {
        self.initiated = false;
        self.staged = None;
    }
}

/// Open window over a [`TransientContext`]. Dropping it clears the context.
#[derive(Debug)]
pub(crate) struct ContextGuard<'a> {
    context: &'a mut TransientContext,
}

impl ContextGuard<'_> {
    pub(crate) fn context(&mut self) -> &mut TransientContext {
        &mut *self.context
    }

    /// Whether the staged values were consumed during the window.
    pub(crate) fn is_consumed(&self) -> bool {
        self.context.staged.is_none()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged() -> StagedDeleverage {
        StagedDeleverage {
            user: Address::repeat_byte(0x01),
            collateral_to_remove: U256::from(3u64),
            debt_to_repay: U256::from(10u64),
            debt_balance_before: U256::from(5u64),
        }
    }

    #[test]
    fn test_idle_context_fails_closed() {
        let mut context = TransientContext::default();
        assert!(!context.is_initiated());
        assert_eq!(context.take(), Err(CallbackError::DeleverageNotInitiated));
    }

    #[test]
    fn test_staged_values_are_taken_once() {
        let mut context = TransientContext::default();
        let mut guard = context.stage(staged());
        assert!(!guard.is_consumed());
        assert_eq!(guard.context().take(), Ok(staged()));
        assert!(guard.is_consumed());
        assert!(guard.context().is_initiated());
        assert_eq!(guard.context().take(), Err(CallbackError::DeleverageNotInitiated));
    }

    #[test]
    fn test_dropping_guard_clears_context() {
        let mut context = TransientContext::default();
        {
            let _guard = context.stage(staged());
        }
        assert!(!context.is_initiated());
        assert_eq!(context.take(), Err(CallbackError::DeleverageNotInitiated));
    }

    #[test]
    fn test_unwinding_clears_context() {
        let mut context = TransientContext::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = context.stage(staged());
            panic!("settlement aborted");
        }));
        assert!(result.is_err());
        assert!(!context.is_initiated());
    }
}
