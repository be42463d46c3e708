use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// Maps each tuple to the index of the partition (and thus the worker) that
/// owns it. Implementations live in the partition-function library; the core
/// only fixes the interface and ships the single-field hash everybody uses.
pub trait PartitionFunction: Send + Sync {
    fn num_partitions(&self) -> usize;

    fn partition(&self, tuple: &Tuple, desc: &TupleDesc) -> Result<usize>;
}

/// Hashes one field and takes it modulo the partition count, so equal join
/// keys land on the same worker.
pub struct SingleFieldHashPartition {
    num_partitions: usize,
    field: usize,
}

impl SingleFieldHashPartition {
    pub fn new(num_partitions: usize, field: usize) -> Self {
        assert!(num_partitions > 0);
        Self {
            num_partitions,
            field,
        }
    }
}

impl PartitionFunction for SingleFieldHashPartition {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, tuple: &Tuple, _desc: &TupleDesc) -> Result<usize> {
        let mut hasher = DefaultHasher::new();
        tuple.field(self.field)?.hash(&mut hasher);
        Ok((hasher.finish() % self.num_partitions as u64) as usize)
    }
}
