use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use rand::Rng;

use crate::common::{PageId, TableId};
use crate::concurrency::lock_pool::LockPool;
use crate::concurrency::{Permissions, TransactionId};
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::storage::heap_page::HeapPage;
use crate::tuple::Tuple;

pub type PageRef = Arc<RwLock<HeapPage>>;

/// Cache state and lock tables, guarded together by one mutex. Every cached
/// page appears in the eviction queue exactly once; the queue runs from the
/// oldest entry at the front to the most recently touched at the back.
struct PoolState {
    cache: HashMap<PageId, PageRef>,
    eviction_queue: Vec<PageId>,
    locks: LockPool,
}

/// A bounded page cache that doubles as the lock manager front end. Fetching
/// a page acquires the requested page lock and may block; eviction is
/// NO-STEAL, so dirty pages stay pinned in memory until their transaction
/// resolves.
pub struct BufferPool {
    capacity: usize,
    latch: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            latch: Mutex::new(PoolState {
                cache: HashMap::new(),
                eviction_queue: Vec::new(),
                locks: LockPool::new(),
            }),
        }
    }

    /// Retrieves a page with the requested permission.
    ///
    /// Structural phase first, under the latch: make room, read the page in
    /// if absent, refresh its position in the eviction queue. Then, with the
    /// latch released, block until the lock is granted. A page can be evicted
    /// by someone else in that window, in which case the whole dance repeats.
    pub fn get_page(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef> {
        loop {
            {
                let mut state = self.latch.lock().unwrap();
                while state.cache.len() >= self.capacity && !state.cache.contains_key(&pid) {
                    Self::evict_one(&mut state)?;
                }

                if state.cache.contains_key(&pid) {
                    state.eviction_queue.retain(|queued| *queued != pid);
                } else {
                    let page = ctx.catalog().table(pid.0)?.read_page(pid)?;
                    let pid = page.id();
                    state.cache.insert(pid, Arc::new(RwLock::new(page)));
                    state.locks.page_lock_setup(pid);
                }
                state.eviction_queue.push(pid);
            }

            self.acquire_lock(tid, pid, perm)?;

            let state = self.latch.lock().unwrap();
            if let Some(page) = state.cache.get(&pid) {
                return Ok(Arc::clone(page));
            }
            // evicted between the structural phase and the lock grant; the
            // lock we now hold keeps the reloaded page stable next round
        }
    }

    /// The blocking half of lock acquisition. Re-requests by a holder return
    /// immediately; a shared holder asking for exclusive enters the upgrade
    /// path. Before every wait the wait-for graph is searched, and the
    /// requester aborts itself when it closes a cycle.
    fn acquire_lock(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<()> {
        let mut state = self.latch.lock().unwrap();
        state.locks.page_lock_setup(pid);

        let upgrade = match state.locks.holds_lock(tid, pid) {
            Some(Permissions::ReadWrite) => return Ok(()),
            Some(Permissions::ReadOnly) if perm == Permissions::ReadOnly => return Ok(()),
            Some(Permissions::ReadOnly) => true,
            None => false,
        };

        while state.locks.must_wait(pid, perm, upgrade) {
            state.locks.add_waiting(tid, pid, perm);
            if state.locks.detect_deadlock(tid, pid) {
                state.locks.remove_waiting(tid, pid);
                return Err(DbError::TransactionAborted(tid));
            }
            let condition = state.locks.condition(pid);
            state = condition.wait(state).unwrap();
            state.locks.page_lock_setup(pid);
        }

        state.locks.grant(tid, pid, perm, upgrade);
        Ok(())
    }

    /// NO-STEAL eviction: walk the queue from oldest to newest and drop the
    /// first clean page nobody holds or waits for. Dirty pages must survive
    /// until their transaction commits or aborts.
    fn evict_one(state: &mut MutexGuard<PoolState>) -> Result<()> {
        let candidate = state.eviction_queue.iter().copied().find(|pid| {
            state.cache[pid].read().unwrap().is_dirty().is_none()
                && !state.locks.is_locked(*pid)
                && !state.locks.has_waiters(*pid)
        });

        match candidate {
            Some(pid) => {
                state.cache.remove(&pid);
                state.locks.remove_page(pid);
                state.eviction_queue.retain(|queued| *queued != pid);
                Ok(())
            }
            None => Err(DbError::Db(
                "cannot evict: all pages are dirty or in use".to_owned(),
            )),
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> Option<Permissions> {
        self.latch.lock().unwrap().locks.holds_lock(tid, pid)
    }

    /// Releases a single page lock early. Risky under two-phase locking;
    /// meant for callers that know the page was only probed, never read.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        let mut state = self.latch.lock().unwrap();
        if let Some(condition) = state.locks.release_lock(tid, pid) {
            condition.notify_all();
        }
    }

    /// Inserts a tuple into the table on behalf of `tid`, write-locking the
    /// page it lands on and marking every page the insert dirtied.
    pub fn insert_tuple(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = ctx.catalog().table(table_id)?;
        let dirtied = file.insert_tuple(ctx, tid, tuple)?;
        for page in dirtied {
            page.write().unwrap().mark_dirty(true, tid);
        }
        Ok(())
    }

    /// Deletes a tuple on behalf of `tid`, write-locking its page.
    pub fn delete_tuple(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let (pid, _) = tuple
            .record_id()
            .ok_or_else(|| DbError::Db("tuple is not stored on any page".to_owned()))?;
        let file = ctx.catalog().table(pid.0)?;
        let page = file.delete_tuple(ctx, tid, tuple)?;
        page.write().unwrap().mark_dirty(true, tid);
        Ok(())
    }

    /// Commits or aborts a transaction. On commit every held page is flushed
    /// (log first) and re-snapshotted; on abort the on-disk image replaces
    /// the cached copy. Locks are released only after the page fixup, so no
    /// other transaction ever observes intermediate state. An aborted
    /// transaction sleeps a short random jitter so an immediate retry is
    /// unlikely to re-collide with the surviving party.
    pub fn transaction_complete(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        commit: bool,
    ) -> Result<()> {
        let held = {
            let state = self.latch.lock().unwrap();
            state.locks.held_pages(tid)
        };

        for pid in &held {
            if commit {
                self.flush_page(ctx, *pid)?;
                if let Some(page) = self.cached_page(*pid) {
                    page.read().unwrap().set_before_image();
                }
            } else if let Some(page) = self.cached_page(*pid) {
                let fresh = ctx.catalog().table(pid.0)?.read_page(*pid)?;
                *page.write().unwrap() = fresh;
            }
        }

        let woken = {
            let mut state = self.latch.lock().unwrap();
            state.locks.release_locks(tid)
        };
        for condition in woken {
            condition.notify_all();
        }

        if !commit {
            let jitter = rand::thread_rng().gen_range(0..100);
            std::thread::sleep(Duration::from_millis(jitter));
        }
        Ok(())
    }

    fn cached_page(&self, pid: PageId) -> Option<PageRef> {
        self.latch.lock().unwrap().cache.get(&pid).cloned()
    }

    /// Flushes one page if it is dirty: update record to the log, force the
    /// log, clear the dirty mark, then write the page image. The page is
    /// clean at the moment its bytes hit the file.
    pub fn flush_page(&self, ctx: &DbContext, pid: PageId) -> Result<()> {
        let Some(page) = self.cached_page(pid) else {
            return Ok(());
        };

        let mut guard = page.write().unwrap();
        if let Some(tid) = guard.is_dirty() {
            ctx.log()
                .log_write(tid, &guard.before_image(), &guard.page_data())?;
            ctx.log().force()?;

            guard.mark_dirty(false, tid);
            ctx.catalog().table(pid.0)?.write_page(&guard)?;
        }
        Ok(())
    }

    /// Flushes every page dirtied by one transaction.
    pub fn flush_pages(&self, ctx: &DbContext, tid: TransactionId) -> Result<()> {
        for pid in self.queued_pages() {
            let dirtied_by = self
                .cached_page(pid)
                .and_then(|page| page.read().unwrap().is_dirty());
            if dirtied_by == Some(tid) {
                self.flush_page(ctx, pid)?;
            }
        }
        Ok(())
    }

    /// Flushes every dirty page. Breaks NO-STEAL for uncommitted
    /// transactions; reserved for shutdown paths.
    pub fn flush_all_pages(&self, ctx: &DbContext) -> Result<()> {
        for pid in self.queued_pages() {
            self.flush_page(ctx, pid)?;
        }
        Ok(())
    }

    fn queued_pages(&self) -> Vec<PageId> {
        self.latch.lock().unwrap().eviction_queue.clone()
    }
}
