use token_ledger::{Checkpoint, LedgerSnapshot, TokenLedger};
use tracing::warn;

/// Checkpoint of the ledger and pool taken before a settlement starts.
///
/// Unless [`SettlementCheckpoint::commit`] is called, dropping it restores
/// both stores, so an error return or an unwind leaves no partial writes.
pub(crate) struct SettlementCheckpoint<'a, P: Checkpoint> {
    ledger: &'a TokenLedger,
    pool: &'a P,
    snapshots: Option<(LedgerSnapshot, P::Snapshot)>,
}

impl<'a, P: Checkpoint> SettlementCheckpoint<'a, P> {
    pub(crate) fn take(ledger: &'a TokenLedger, pool: &'a P) -> Self {
        Self { ledger, pool, snapshots: Some((ledger.checkpoint(), pool.checkpoint())) }
    }

    pub(crate) fn commit(mut self) {
        self.snapshots = None;
    }
}

impl<P: Checkpoint> Drop for SettlementCheckpoint<'_, P> {
    fn drop(&mut self) {
        if let Some((ledger, pool)) = self.snapshots.take() {
            warn!("Settlement did not complete; rolling back ledger and pool");
            self.ledger.rollback(ledger);
            self.pool.rollback(pool);
        }
    }
}
