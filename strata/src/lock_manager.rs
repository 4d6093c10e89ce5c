//! Strict-2PL lock manager. Resources are opaque strings (by convention
//! `<table>:row:<offset>`); each gets a holder map and a FIFO waiter queue.
//! A request is granted only when it reaches the head of the queue and is
//! compatible with every current holder, so late shared requests cannot
//! barge past a waiting exclusive one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Result, StorageError};
use crate::{RowOffset, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Conventional resource name for a single row.
pub fn row_resource(table: &str, offset: RowOffset) -> String {
    format!("{table}:row:{offset}")
}

/// Conventional resource name for a whole page. Reserved for future use.
pub fn page_resource(table: &str, page_id: u32) -> String {
    format!("{table}:page:{page_id}")
}

#[derive(Debug, Default)]
struct EntryState {
    holders: HashMap<TxnId, LockMode>,
    waiters: VecDeque<(TxnId, LockMode)>,
}

impl EntryState {
    fn compatible(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.holders.iter().all(|(&holder, &held)| {
            holder == txn_id || (mode == LockMode::Shared && held == LockMode::Shared)
        })
    }
}

#[derive(Debug, Default)]
struct LockEntry {
    state: Mutex<EntryState>,
    granted: Condvar,
}

/// Two-level locking: one mutex guards the resource map, a per-entry mutex
/// and condvar carry the waiters.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<String, Arc<LockEntry>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, resource: &str) -> Arc<LockEntry> {
        let mut table = self.table.lock().unwrap();
        table.entry(resource.to_string()).or_default().clone()
    }

    /// Block until `txn_id` holds `mode` on `resource`. Re-acquiring the
    /// mode already held returns immediately; asking for a different mode on
    /// a held resource is an error (upgrades are unsupported).
    pub fn acquire(&self, txn_id: TxnId, resource: &str, mode: LockMode) -> Result<()> {
        let entry = self.entry(resource);
        let mut state = entry.state.lock().unwrap();

        match state.holders.get(&txn_id) {
            Some(&held) if held == mode => return Ok(()),
            Some(&held) => {
                return Err(StorageError::logic(format!(
                    "transaction {txn_id} holds {held:?} on '{resource}'; upgrade to {mode:?} is unsupported"
                )))
            }
            None => {}
        }

        state.waiters.push_back((txn_id, mode));
        crate::strata_debug_log!("[lock] txn {txn_id} waiting for {mode:?} on '{resource}'");
        loop {
            let at_head = state.waiters.front() == Some(&(txn_id, mode));
            if at_head && state.compatible(txn_id, mode) {
                state.waiters.pop_front();
                state.holders.insert(txn_id, mode);
                crate::strata_debug_log!("[lock] txn {txn_id} granted {mode:?} on '{resource}'");
                return Ok(());
            }
            if !state.waiters.contains(&(txn_id, mode)) {
                // release_all removed the request out from under us.
                return Err(StorageError::logic(format!(
                    "lock request of transaction {txn_id} on '{resource}' was cancelled"
                )));
            }
            state = entry.granted.wait(state).unwrap();
        }
    }

    /// Drop every lock and pending request of `txn_id`, waking waiters.
    /// Entries are kept in the table even when they go idle: another thread
    /// may already hold the entry handle without having queued yet, and
    /// pruning here would strand its waiter on an unreachable condvar.
    pub fn release_all(&self, txn_id: TxnId) {
        let table = self.table.lock().unwrap();
        for (resource, entry) in table.iter() {
            let mut state = entry.state.lock().unwrap();
            let held = state.holders.remove(&txn_id).is_some();
            let queued = state.waiters.iter().any(|&(t, _)| t == txn_id);
            state.waiters.retain(|&(t, _)| t != txn_id);
            if held || queued {
                crate::strata_debug_log!("[lock] txn {txn_id} released '{resource}'");
                entry.granted.notify_all();
            }
        }
    }
}
