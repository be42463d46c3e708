use crate::error::Result;
use crate::tuple::desc::TupleDesc;
use crate::tuple::field::{Field, Op};
use crate::tuple::Tuple;

pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod insert;
pub mod join;
pub mod seq_scan;

pub type BoxedExecutor = Box<dyn Executor + Send>;

/// The pull-iterator contract every relational operator implements. A driver
/// opens the root, pulls with `next` until it returns `None`, and closes.
/// `rewind` restarts the stream without rebuilding the operator. Operators
/// own their children by value; `children`/`set_children` exist so plan
/// rewrites can rewire a built tree in place.
pub trait Executor {
    fn desc(&self) -> &TupleDesc;

    fn open(&mut self) -> Result<()>;

    /// Returns the next tuple, `Some(Err(..))` on failure, or `None` once the
    /// stream is exhausted. Exhaustion is stable: further calls keep
    /// returning `None`.
    fn next(&mut self) -> Option<Result<Tuple>>;

    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn children(&mut self) -> Vec<&mut BoxedExecutor> {
        Vec::new()
    }

    fn set_children(&mut self, children: Vec<BoxedExecutor>) {
        debug_assert!(children.is_empty(), "operator has no child slots");
    }
}

/// Compares one tuple field against a constant.
#[derive(Clone, Debug)]
pub struct Predicate {
    field: usize,
    op: Op,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: Field) -> Self {
        Self { field, op, operand }
    }

    pub fn filter(&self, tuple: &Tuple) -> Result<bool> {
        Ok(tuple.field(self.field)?.compare(self.op, &self.operand))
    }
}

/// Compares a field of the left tuple against a field of the right tuple.
#[derive(Copy, Clone, Debug)]
pub struct JoinPredicate {
    field1: usize,
    op: Op,
    field2: usize,
}

impl JoinPredicate {
    pub fn new(field1: usize, op: Op, field2: usize) -> Self {
        Self { field1, op, field2 }
    }

    pub fn field1(&self) -> usize {
        self.field1
    }

    pub fn field2(&self) -> usize {
        self.field2
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn filter(&self, left: &Tuple, right: &Tuple) -> Result<bool> {
        Ok(left
            .field(self.field1)?
            .compare(self.op, right.field(self.field2)?))
    }
}
