use std::sync::atomic::{AtomicU64, Ordering};

use crate::db::DbContext;
use crate::error::Result;

pub mod lock_pool;

pub type TransactionId = u64;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// The two lock modes a transaction can request on a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// A transaction handle: a fresh monotonically increasing id plus the
/// commit/abort entry points. All transaction state lives in the lock pool
/// (held and waited-for pages) and the buffer pool (pages dirtied on its
/// behalf), so the handle itself stays copyable.
///
/// The driver pattern: run the operator tree, and on
/// `DbError::TransactionAborted` call `abort` and optionally retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            id: NEXT_TID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Flushes every page this transaction touched (forcing the log first)
    /// and releases its locks.
    pub fn commit(&self, ctx: &DbContext) -> Result<()> {
        ctx.buffer_pool().transaction_complete(ctx, self.id, true)
    }

    /// Discards this transaction's in-memory page modifications and releases
    /// its locks.
    pub fn abort(&self, ctx: &DbContext) -> Result<()> {
        ctx.buffer_pool().transaction_complete(ctx, self.id, false)
    }
}
