use std::sync::Arc;

use lazy_static::lazy_static;

use crate::common::TableId;
use crate::concurrency::TransactionId;
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::executors::{BoxedExecutor, Executor};
use crate::tuple::desc::TupleDesc;
use crate::tuple::field::{Field, Type};
use crate::tuple::Tuple;

lazy_static! {
    static ref INSERT_DESC: TupleDesc = TupleDesc::named(vec![(Type::Int, "inserted")]);
}

/// Drains its child into the target table through the buffer pool, then
/// emits exactly one tuple holding the insert count.
pub struct Insert {
    ctx: Arc<DbContext>,
    tid: TransactionId,
    table_id: TableId,
    child: BoxedExecutor,
    done: bool,
}

impl Insert {
    pub fn new(
        ctx: Arc<DbContext>,
        tid: TransactionId,
        child: BoxedExecutor,
        table_id: TableId,
    ) -> Result<Self> {
        let table_desc = ctx.catalog().tuple_desc(table_id)?;
        if child.desc() != &table_desc {
            return Err(DbError::Db(format!(
                "cannot insert schema {} into table with schema {}",
                child.desc(),
                table_desc
            )));
        }
        Ok(Self {
            ctx,
            tid,
            table_id,
            child,
            done: false,
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut inserted = 0;
        while let Some(mut tuple) = self.child.next().transpose()? {
            self.ctx
                .buffer_pool()
                .insert_tuple(&self.ctx, self.tid, self.table_id, &mut tuple)?;
            inserted += 1;
        }
        Ok(Some(Tuple::new(
            INSERT_DESC.clone(),
            vec![Field::Int(inserted)],
        )))
    }
}

impl Executor for Insert {
    fn desc(&self) -> &TupleDesc {
        &INSERT_DESC
    }

    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::Db("insert cannot be rewound".to_owned()))
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
