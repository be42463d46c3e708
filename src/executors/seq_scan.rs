use std::sync::Arc;

use crate::common::TableId;
use crate::concurrency::TransactionId;
use crate::db::DbContext;
use crate::error::Result;
use crate::executors::Executor;
use crate::storage::heap_file::HeapFileIterator;
use crate::tuple::desc::{TdItem, TupleDesc};
use crate::tuple::Tuple;

/// Scans a table in page order under read locks. The reported schema carries
/// `alias.field` names so a planner can tell two scans of the same table
/// apart; a missing alias or column name shows up as `null`.
pub struct SeqScan {
    ctx: Arc<DbContext>,
    tid: TransactionId,
    table_id: TableId,
    desc: TupleDesc,
    iter: HeapFileIterator,
    exhausted: bool,
}

impl SeqScan {
    pub fn new(
        ctx: Arc<DbContext>,
        tid: TransactionId,
        table_id: TableId,
        alias: Option<&str>,
    ) -> Result<Self> {
        let file = ctx.catalog().table(table_id)?;
        let base = file.desc().clone();
        let alias = alias.unwrap_or("null");
        let items = base
            .items()
            .iter()
            .map(|item| {
                let name = item.name.as_deref().unwrap_or("null");
                TdItem::new(item.field_type, Some(format!("{alias}.{name}")))
            })
            .collect();

        let iter = file.iter(Arc::clone(&ctx), tid)?;
        Ok(Self {
            ctx,
            tid,
            table_id,
            desc: TupleDesc::new(items),
            iter,
            exhausted: false,
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.exhausted {
            return Ok(None);
        }
        let next = self.iter.next()?;
        if next.is_none() {
            self.exhausted = true;
        }
        Ok(next)
    }
}

impl Executor for SeqScan {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        self.iter.open();
        Ok(())
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.exhausted = false;
        // restart from page 0, picking up pages appended since construction
        let file = self.ctx.catalog().table(self.table_id)?;
        self.iter = file.iter(Arc::clone(&self.ctx), self.tid)?;
        self.iter.open();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.iter.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use super::SeqScan;
    use crate::concurrency::Transaction;
    use crate::executors::tests::{drain_sorted, TestDb};
    use crate::executors::{BoxedExecutor, Executor};

    #[test]
    fn scans_every_row() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 2], &[3, 4], &[5, 6]]);

        let tx = Transaction::begin();
        let mut scan: BoxedExecutor = Box::new(SeqScan::new(
            Arc::clone(&db.ctx),
            tx.id(),
            table_id,
            Some("n"),
        )?);
        let rows = drain_sorted(&mut scan)?;
        assert_eq!(rows, vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn alias_prefixes_field_names() -> Result<()> {
        let db = TestDb::new();
        let desc = crate::tuple::desc::TupleDesc::named(vec![
            (crate::tuple::field::Type::Int, "id"),
            (crate::tuple::field::Type::Int, "amount"),
        ]);
        let table_id = db.ctx.catalog().add_table("orders", desc)?;

        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, Some("o"))?;
        assert_eq!(scan.desc().field_name(0)?, Some("o.id"));
        assert_eq!(scan.desc().field_name(1)?, Some("o.amount"));

        let unaliased = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?;
        assert_eq!(unaliased.desc().field_name(0)?, Some("null.id"));
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn rewind_restarts_from_the_first_page() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 2], &[3, 4]]);

        let tx = Transaction::begin();
        let mut scan: BoxedExecutor =
            Box::new(SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?);
        scan.open()?;
        assert!(scan.next().is_some());
        assert!(scan.next().is_some());
        assert!(scan.next().is_none());
        // exhaustion is stable
        assert!(scan.next().is_none());

        scan.rewind()?;
        let mut rows = 0;
        while let Some(tuple) = scan.next() {
            tuple?;
            rows += 1;
        }
        assert_eq!(rows, 2);
        scan.close()?;
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn next_before_open_is_an_error() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 2]]);

        let tx = Transaction::begin();
        let mut scan: BoxedExecutor =
            Box::new(SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?);
        assert!(matches!(scan.next(), Some(Err(_))));
        tx.commit(&db.ctx)?;
        Ok(())
    }
}
