use crate::error::Result;
use crate::executors::{BoxedExecutor, Executor, Predicate};
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// Propagates only the child tuples its predicate accepts.
pub struct Filter {
    predicate: Predicate,
    child: BoxedExecutor,
}

impl Filter {
    pub fn new(predicate: Predicate, child: BoxedExecutor) -> Self {
        Self { predicate, child }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next().transpose()? {
            if self.predicate.filter(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

impl Executor for Filter {
    fn desc(&self) -> &TupleDesc {
        self.child.desc()
    }

    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
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
