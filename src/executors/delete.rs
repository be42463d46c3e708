use std::sync::Arc;

use lazy_static::lazy_static;

use crate::concurrency::TransactionId;
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::executors::{BoxedExecutor, Executor};
use crate::tuple::desc::TupleDesc;
use crate::tuple::field::{Field, Type};
use crate::tuple::Tuple;

lazy_static! {
    static ref DELETE_DESC: TupleDesc = TupleDesc::named(vec![(Type::Int, "deleted")]);
}

/// Deletes every tuple its child produces (resolved through their record
/// ids), then emits exactly one tuple holding the delete count.
pub struct Delete {
    ctx: Arc<DbContext>,
    tid: TransactionId,
    child: BoxedExecutor,
    done: bool,
}

impl Delete {
    pub fn new(ctx: Arc<DbContext>, tid: TransactionId, child: BoxedExecutor) -> Self {
        Self {
            ctx,
            tid,
            child,
            done: false,
        }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut deleted = 0;
        while let Some(mut tuple) = self.child.next().transpose()? {
            self.ctx
                .buffer_pool()
                .delete_tuple(&self.ctx, self.tid, &mut tuple)?;
            deleted += 1;
        }
        Ok(Some(Tuple::new(
            DELETE_DESC.clone(),
            vec![Field::Int(deleted)],
        )))
    }
}

impl Executor for Delete {
    fn desc(&self) -> &TupleDesc {
        &DELETE_DESC
    }

    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::Db("delete cannot be rewound".to_owned()))
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn children(&mut self) -> Vec<&mut BoxedExecutor> {
        vec![&mut self.child]
    }

    fn set_children(&mut self, mut children: Vec<BoxedExecutor>) {
        debug_assert_eq!(children.len(), 1);
        self.child = children.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use super::Delete;
    use crate::concurrency::Transaction;
    use crate::executors::filter::Filter;
    use crate::executors::seq_scan::SeqScan;
    use crate::executors::tests::{drain, drain_sorted, TestDb};
    use crate::executors::{BoxedExecutor, Predicate};
    use crate::tuple::field::{Field, Op};

    #[test]
    fn insert_delete_round_trip() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);

        let rows: Vec<Vec<i32>> = (0..100).map(|i| vec![i, i + 1]).collect();
        let row_refs: Vec<&[i32]> = rows.iter().map(|r| r.as_slice()).collect();
        db.insert_rows(table_id, &row_refs);

        // scan sees the full multiset
        let tx = Transaction::begin();
        let mut scan: BoxedExecutor =
            Box::new(SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?);
        assert_eq!(drain_sorted(&mut scan)?, rows);
        tx.commit(&db.ctx)?;

        // delete everything, reporting 100
        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?;
        let mut delete: BoxedExecutor =
            Box::new(Delete::new(Arc::clone(&db.ctx), tx.id(), Box::new(scan)));
        let result = drain(&mut delete)?;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].field(0)?.as_i32(), 100);
        tx.commit(&db.ctx)?;

        // a fresh scan comes back empty, and pages are not reclaimed
        let tx = Transaction::begin();
        let mut scan: BoxedExecutor =
            Box::new(SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?);
        assert!(drain_sorted(&mut scan)?.is_empty());
        tx.commit(&db.ctx)?;
        assert!(db.ctx.catalog().table(table_id)?.num_pages()? >= 1);
        Ok(())
    }

    #[test]
    fn deletes_only_filtered_rows() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 1], &[2, 2], &[3, 3], &[4, 4]]);

        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?;
        let filter = Filter::new(
            Predicate::new(0, Op::LessThanOrEq, Field::Int(2)),
            Box::new(scan),
        );
        let mut delete: BoxedExecutor =
            Box::new(Delete::new(Arc::clone(&db.ctx), tx.id(), Box::new(filter)));
        let result = drain(&mut delete)?;
        assert_eq!(result[0].field(0)?.as_i32(), 2);
        tx.commit(&db.ctx)?;

        let tx = Transaction::begin();
        let mut scan: BoxedExecutor =
            Box::new(SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?);
        assert_eq!(drain_sorted(&mut scan)?, vec![vec![3, 3], vec![4, 4]]);
        tx.commit(&db.ctx)?;
        Ok(())
    }
}
