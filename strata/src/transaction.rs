//! The transaction coordinator: vends transaction ids, drives the WAL for
//! BEGIN/COMMIT/ABORT, and releases locks at the end of a transaction
//! (strict 2PL: locks live until commit or abort).
//!
//! Abort writes the ABORT record and releases locks only; already-applied
//! after-images are not rolled back in this design.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, StorageError};
use crate::lock_manager::LockManager;
use crate::wal::WalManager;
use crate::TxnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

/// Coordinates strict-2PL locking and the WAL for each transaction.
pub struct TransactionManager {
    wal: Arc<WalManager>,
    locks: Arc<LockManager>,
    next_id: AtomicU64,
    statuses: Mutex<HashMap<TxnId, TxnStatus>>,
}

impl TransactionManager {
    pub fn new(wal: Arc<WalManager>, locks: Arc<LockManager>) -> Self {
        TransactionManager {
            wal,
            locks,
            next_id: AtomicU64::new(1),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn status(&self, txn_id: TxnId) -> Option<TxnStatus> {
        self.statuses.lock().unwrap().get(&txn_id).copied()
    }

    fn expect_active(&self, txn_id: TxnId) -> Result<()> {
        match self.status(txn_id) {
            Some(TxnStatus::Active) => Ok(()),
            Some(terminal) => Err(StorageError::logic(format!(
                "transaction {txn_id} is already {terminal:?}"
            ))),
            None => Err(StorageError::logic(format!("unknown transaction {txn_id}"))),
        }
    }

    /// Start a transaction: persist BEGIN, then hand out the id.
    pub fn begin(&self) -> Result<TxnId> {
        let txn_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.wal.log_begin(txn_id)?;
        self.statuses
            .lock()
            .unwrap()
            .insert(txn_id, TxnStatus::Active);
        crate::strata_debug_log!("[txn {txn_id}] BEGIN");
        Ok(txn_id)
    }

    /// Persist COMMIT, then release every lock. If the WAL append fails the
    /// transaction stays Active, keeps its locks, and no COMMIT exists on
    /// disk; the caller is expected to abort it.
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        self.expect_active(txn_id)?;
        self.wal.log_commit(txn_id)?;
        self.statuses
            .lock()
            .unwrap()
            .insert(txn_id, TxnStatus::Committed);
        self.locks.release_all(txn_id);
        crate::strata_debug_log!("[txn {txn_id}] COMMIT");
        Ok(())
    }

    /// Persist ABORT, then release every lock. Advisory: applied changes are
    /// not undone.
    pub fn abort(&self, txn_id: TxnId) -> Result<()> {
        self.expect_active(txn_id)?;
        self.wal.log_abort(txn_id)?;
        self.statuses
            .lock()
            .unwrap()
            .insert(txn_id, TxnStatus::Aborted);
        self.locks.release_all(txn_id);
        crate::strata_debug_log!("[txn {txn_id}] ABORT");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failpoint;
    use crate::lock_manager::LockMode;
    use crate::wal::LogKind;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> TransactionManager {
        let wal = Arc::new(WalManager::open(dir.join("wal.log")).unwrap());
        TransactionManager::new(wal, Arc::new(LockManager::new()))
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let dir = tempdir().unwrap();
        let tm = manager(dir.path());
        assert_eq!(tm.begin().unwrap(), 1);
        assert_eq!(tm.begin().unwrap(), 2);
        assert_eq!(tm.begin().unwrap(), 3);
    }

    #[test]
    fn commit_writes_wal_and_releases_locks() {
        let dir = tempdir().unwrap();
        let tm = manager(dir.path());

        let txn = tm.begin().unwrap();
        tm.locks()
            .acquire(txn, "t:row:0", LockMode::Exclusive)
            .unwrap();
        tm.commit(txn).unwrap();

        // The lock must be free again.
        tm.locks().acquire(99, "t:row:0", LockMode::Exclusive).unwrap();
        tm.locks().release_all(99);

        let records = tm.wal().read_back().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, LogKind::Begin);
        assert_eq!(records[1].kind, LogKind::Commit);
    }

    #[test]
    fn terminal_transactions_reject_further_operations() {
        let dir = tempdir().unwrap();
        let tm = manager(dir.path());

        let txn = tm.begin().unwrap();
        tm.commit(txn).unwrap();
        assert!(tm.commit(txn).is_err());
        assert!(tm.abort(txn).is_err());
        assert_eq!(tm.status(txn), Some(TxnStatus::Committed));

        assert!(tm.commit(12345).is_err());
    }

    #[test]
    fn abort_logs_abort_and_releases_locks() {
        let dir = tempdir().unwrap();
        let tm = manager(dir.path());

        let txn = tm.begin().unwrap();
        tm.locks()
            .acquire(txn, "t:row:8", LockMode::Exclusive)
            .unwrap();
        tm.abort(txn).unwrap();
        assert_eq!(tm.status(txn), Some(TxnStatus::Aborted));

        let records = tm.wal().read_back().unwrap();
        assert_eq!(records[1].kind, LogKind::Abort);
        tm.locks().acquire(99, "t:row:8", LockMode::Shared).unwrap();
    }

    #[test]
    fn failed_commit_sync_keeps_transaction_active() {
        let dir = tempdir().unwrap();
        let tm = manager(dir.path());

        let txn = tm.begin().unwrap();
        failpoint::clear();
        failpoint::enable("wal.append.sync");
        let result = tm.commit(txn);
        failpoint::clear();

        // commit() must not report success, and the transaction must stay
        // Active (locks kept) so the caller can fall back to abort.
        assert!(result.is_err());
        assert_eq!(tm.status(txn), Some(TxnStatus::Active));
        tm.abort(txn).unwrap();
        assert_eq!(tm.status(txn), Some(TxnStatus::Aborted));
    }
}
