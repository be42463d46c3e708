use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar};

use crate::common::PageId;
use crate::concurrency::{Permissions, TransactionId};

/// Page-level lock tables: shared and exclusive counts, holders and waiters
/// per page, and the per-page condition variables waiters block on.
///
/// The tables carry no lock of their own. They live inside the buffer pool's
/// process-wide latch, so lock metadata, the page cache and the eviction
/// queue mutate under one mutex and eviction can never race an acquisition.
/// The blocking loop itself is driven by the buffer pool, which owns the
/// latch the condition variables are paired with.
pub struct LockPool {
    read_locks: HashMap<PageId, usize>,
    write_locks: HashMap<PageId, usize>,
    holding: HashMap<PageId, HashMap<TransactionId, Permissions>>,
    waiting: HashMap<TransactionId, HashMap<PageId, Permissions>>,
    conditions: HashMap<PageId, Arc<Condvar>>,
}

impl LockPool {
    pub fn new() -> Self {
        Self {
            read_locks: HashMap::new(),
            write_locks: HashMap::new(),
            holding: HashMap::new(),
            waiting: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    /// Ensures the per-page entries exist. Called when a page enters the
    /// cache and again after every wake-up, since an unlocked page can be
    /// evicted and reloaded while a requester sleeps.
    pub fn page_lock_setup(&mut self, pid: PageId) {
        self.read_locks.entry(pid).or_insert(0);
        self.write_locks.entry(pid).or_insert(0);
        self.conditions
            .entry(pid)
            .or_insert_with(|| Arc::new(Condvar::new()));
    }

    /// Drops every entry for an evicted page.
    pub fn remove_page(&mut self, pid: PageId) {
        self.read_locks.remove(&pid);
        self.write_locks.remove(&pid);
        self.holding.remove(&pid);
        for waits in self.waiting.values_mut() {
            waits.remove(&pid);
        }
        self.conditions.remove(&pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> Option<Permissions> {
        self.holding.get(&pid).and_then(|holders| holders.get(&tid)).copied()
    }

    pub fn is_locked(&self, pid: PageId) -> bool {
        self.holding
            .get(&pid)
            .map(|holders| !holders.is_empty())
            .unwrap_or(false)
    }

    pub fn has_waiters(&self, pid: PageId) -> bool {
        self.waiting.values().any(|waits| waits.contains_key(&pid))
    }

    pub fn held_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.holding
            .iter()
            .filter(|(_, holders)| holders.contains_key(&tid))
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// True while the request cannot be granted: any exclusive holder blocks
    /// everything; an exclusive request additionally needs the shared count
    /// down to zero, or down to one when the requester is upgrading its own
    /// shared lock.
    pub fn must_wait(&self, pid: PageId, perm: Permissions, upgrade: bool) -> bool {
        let mut blocked = self.write_locks[&pid] != 0;
        if perm == Permissions::ReadWrite {
            let allowed_readers = usize::from(upgrade);
            blocked = blocked || self.read_locks[&pid] != allowed_readers;
        }
        blocked
    }

    pub fn add_waiting(&mut self, tid: TransactionId, pid: PageId, perm: Permissions) {
        self.waiting.entry(tid).or_default().insert(pid, perm);
    }

    pub fn remove_waiting(&mut self, tid: TransactionId, pid: PageId) {
        if let Some(waits) = self.waiting.get_mut(&tid) {
            waits.remove(&pid);
        }
    }

    /// Records a granted request and clears its waiting entry.
    pub fn grant(&mut self, tid: TransactionId, pid: PageId, perm: Permissions, upgrade: bool) {
        match perm {
            Permissions::ReadOnly => {
                *self.read_locks.get_mut(&pid).unwrap() += 1;
            }
            Permissions::ReadWrite => {
                *self.write_locks.get_mut(&pid).unwrap() = 1;
                if upgrade {
                    *self.read_locks.get_mut(&pid).unwrap() = 0;
                }
            }
        }
        self.holding.entry(pid).or_default().insert(tid, perm);
        self.remove_waiting(tid, pid);
    }

    pub fn condition(&self, pid: PageId) -> Arc<Condvar> {
        Arc::clone(&self.conditions[&pid])
    }

    /// Releases one lock. Returns the page's condition variable when waiters
    /// should be woken.
    pub fn release_lock(&mut self, tid: TransactionId, pid: PageId) -> Option<Arc<Condvar>> {
        let perm = self.holding.get_mut(&pid)?.remove(&tid)?;
        match perm {
            Permissions::ReadOnly => {
                *self.read_locks.get_mut(&pid).unwrap() -= 1;
            }
            Permissions::ReadWrite => {
                *self.write_locks.get_mut(&pid).unwrap() = 0;
            }
        }
        self.conditions.get(&pid).cloned()
    }

    /// Releases every lock a transaction holds and clears its waiting set.
    /// Iterates over a snapshot so release never mutates the map being
    /// walked. Returns the condition variables to wake.
    pub fn release_locks(&mut self, tid: TransactionId) -> Vec<Arc<Condvar>> {
        let mut conditions = Vec::new();
        for pid in self.held_pages(tid) {
            if let Some(condition) = self.release_lock(tid, pid) {
                conditions.push(condition);
            }
        }
        self.waiting.remove(&tid);
        conditions
    }

    /// Depth-first search over the wait-for graph, starting from `tid`
    /// blocked on `pid`. Edges run from a waiter to every holder of the page
    /// it waits on, and from each holder onwards through its own waiting
    /// entries. Re-encountering a transaction on the current path is a cycle.
    pub fn detect_deadlock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.find_cycle(tid, pid, &mut HashSet::new())
    }

    fn find_cycle(
        &self,
        tid: TransactionId,
        pid: PageId,
        path: &mut HashSet<TransactionId>,
    ) -> bool {
        let Some(holders) = self.holding.get(&pid) else {
            return false;
        };
        if !path.insert(tid) {
            return true;
        }

        for &holder in holders.keys() {
            if holder == tid {
                continue;
            }
            if let Some(waits) = self.waiting.get(&holder) {
                for &waited_pid in waits.keys() {
                    if self.find_cycle(holder, waited_pid, path) {
                        return true;
                    }
                }
            }
            path.remove(&holder);
        }
        false
    }
}

impl Default for LockPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::LockPool;
    use crate::concurrency::Permissions;

    const P1: (u32, u32) = (1, 0);
    const P2: (u32, u32) = (1, 1);

    #[test]
    fn shared_locks_accumulate() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);

        assert!(!locks.must_wait(P1, Permissions::ReadOnly, false));
        locks.grant(1, P1, Permissions::ReadOnly, false);
        assert!(!locks.must_wait(P1, Permissions::ReadOnly, false));
        locks.grant(2, P1, Permissions::ReadOnly, false);

        assert_eq!(locks.holds_lock(1, P1), Some(Permissions::ReadOnly));
        assert_eq!(locks.holds_lock(2, P1), Some(Permissions::ReadOnly));
        assert!(locks.must_wait(P1, Permissions::ReadWrite, false));
    }

    #[test]
    fn exclusive_lock_blocks_everyone() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);
        locks.grant(1, P1, Permissions::ReadWrite, false);

        assert!(locks.must_wait(P1, Permissions::ReadOnly, false));
        assert!(locks.must_wait(P1, Permissions::ReadWrite, false));

        locks.release_lock(1, P1);
        assert!(!locks.must_wait(P1, Permissions::ReadOnly, false));
    }

    #[test]
    fn upgrade_needs_sole_readership() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);
        locks.grant(1, P1, Permissions::ReadOnly, false);
        locks.grant(2, P1, Permissions::ReadOnly, false);

        assert!(locks.must_wait(P1, Permissions::ReadWrite, true));
        locks.release_lock(2, P1);
        assert!(!locks.must_wait(P1, Permissions::ReadWrite, true));

        locks.grant(1, P1, Permissions::ReadWrite, true);
        assert_eq!(locks.holds_lock(1, P1), Some(Permissions::ReadWrite));
        // the old shared count is gone, a later release fully frees the page
        locks.release_lock(1, P1);
        assert!(!locks.must_wait(P1, Permissions::ReadWrite, false));
    }

    #[test]
    fn detects_two_transaction_cycle() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);
        locks.page_lock_setup(P2);

        locks.grant(1, P1, Permissions::ReadOnly, false);
        locks.grant(2, P2, Permissions::ReadOnly, false);

        locks.add_waiting(1, P2, Permissions::ReadWrite);
        assert!(!locks.detect_deadlock(1, P2));

        locks.add_waiting(2, P1, Permissions::ReadWrite);
        assert!(locks.detect_deadlock(2, P1));
    }

    #[test]
    fn detects_self_upgrade_cycle() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);

        locks.grant(1, P1, Permissions::ReadOnly, false);
        locks.grant(2, P1, Permissions::ReadOnly, false);

        locks.add_waiting(1, P1, Permissions::ReadWrite);
        assert!(!locks.detect_deadlock(1, P1));

        locks.add_waiting(2, P1, Permissions::ReadWrite);
        assert!(locks.detect_deadlock(2, P1));
    }

    #[test]
    fn no_cycle_in_a_plain_queue() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);
        locks.page_lock_setup(P2);

        locks.grant(1, P1, Permissions::ReadWrite, false);
        locks.add_waiting(2, P1, Permissions::ReadWrite);
        locks.add_waiting(3, P1, Permissions::ReadOnly);

        assert!(!locks.detect_deadlock(2, P1));
        assert!(!locks.detect_deadlock(3, P1));
    }

    #[test]
    fn release_locks_clears_everything() {
        let mut locks = LockPool::new();
        locks.page_lock_setup(P1);
        locks.page_lock_setup(P2);

        locks.grant(1, P1, Permissions::ReadOnly, false);
        locks.grant(1, P2, Permissions::ReadWrite, false);
        locks.add_waiting(1, P2, Permissions::ReadWrite);

        let woken = locks.release_locks(1);
        assert_eq!(woken.len(), 2);
        assert_eq!(locks.holds_lock(1, P1), None);
        assert_eq!(locks.holds_lock(1, P2), None);
        assert!(!locks.has_waiters(P2));
        assert!(!locks.is_locked(P1));
    }
}
