use std::collections::HashMap;

use crate::error::Result;
use crate::executors::{BoxedExecutor, Executor, JoinPredicate};
use crate::tuple::desc::TupleDesc;
use crate::tuple::field::{Field, Op};
use crate::tuple::Tuple;

/// General θ join over two child streams, hash-based: on the first pull both
/// children are drained into hash tables keyed on their join fields, and the
/// result is enumerated bucket pair by bucket pair. Bucket advancement is
/// operator-aware, so with sorted key sequences the enumeration skips key
/// pairs the operator rules out instead of touching the full cross product.
pub struct Join {
    predicate: JoinPredicate,
    left: BoxedExecutor,
    right: BoxedExecutor,
    desc: TupleDesc,
    state: Option<HashState>,
}

/// Enumeration state over the two bucket collections. `i`/`j` index the
/// sorted key sequences, `a`/`b` the tuples inside the current buckets.
#[derive(Copy, Clone)]
struct Cursor {
    i: usize,
    j: usize,
    a: usize,
    b: usize,
}

const START: Cursor = Cursor {
    i: 0,
    j: 0,
    a: 0,
    b: 0,
};

struct HashState {
    left_keys: Vec<Field>,
    right_keys: Vec<Field>,
    left_buckets: Vec<Vec<Tuple>>,
    right_buckets: Vec<Vec<Tuple>>,
    cursor: Cursor,
}

/// Flattens a hash table into parallel key and bucket vectors, keys sorted
/// by field order.
fn sorted_buckets(map: HashMap<Field, Vec<Tuple>>) -> (Vec<Field>, Vec<Vec<Tuple>>) {
    let mut pairs: Vec<_> = map.into_iter().collect();
    pairs.sort_by(|left, right| left.0.cmp(&right.0));
    pairs.into_iter().unzip()
}

impl HashState {
    fn valid(&self) -> bool {
        self.cursor.i < self.left_keys.len() && self.cursor.j < self.right_keys.len()
    }

    fn finish(&mut self) {
        self.cursor.i = self.left_keys.len();
        self.cursor.j = self.right_keys.len();
    }

    /// The single transition table of the enumeration. Innermost the right
    /// bucket advances, then (depending on the operator) the right key, then
    /// the left bucket, then the left key.
    fn advance(&mut self, op: Op) {
        let Cursor { i, j, a, b } = self.cursor;

        if b + 1 < self.right_buckets[j].len() {
            self.cursor.b = b + 1;
            return;
        }
        self.cursor.b = 0;

        match op {
            Op::Equals => {
                // key sets were intersected, both sides advance in lock step
                if a + 1 < self.left_buckets[i].len() {
                    self.cursor.a = a + 1;
                } else if i + 1 < self.left_keys.len() {
                    self.cursor.a = 0;
                    self.cursor.i = i + 1;
                    self.cursor.j = i + 1;
                } else {
                    self.finish();
                }
                return;
            }
            Op::GreaterThan | Op::GreaterThanOrEq => {
                // right keys ascend: the first failing key ends this row
                if j + 1 < self.right_keys.len()
                    && self.left_keys[i].compare(op, &self.right_keys[j + 1])
                {
                    self.cursor.j = j + 1;
                    return;
                }
                self.cursor.j = 0;
            }
            Op::LessThan | Op::LessThanOrEq => {
                // skip forward until a right key satisfies the operator
                let mut next_j = j;
                while next_j + 1 < self.right_keys.len() {
                    next_j += 1;
                    if self.left_keys[i].compare(op, &self.right_keys[next_j]) {
                        self.cursor.j = next_j;
                        return;
                    }
                }
                self.cursor.j = 0;
            }
            Op::NotEquals | Op::Like => {
                // no order to exploit, enumerate every right key
                if j + 1 < self.right_keys.len() {
                    self.cursor.j = j + 1;
                    return;
                }
                self.cursor.j = 0;
            }
        }

        if a + 1 < self.left_buckets[i].len() {
            self.cursor.a = a + 1;
            return;
        }
        self.cursor.a = 0;
        if i + 1 < self.left_keys.len() {
            self.cursor.i = i + 1;
        } else {
            self.finish();
        }
    }
}

impl Join {
    pub fn new(predicate: JoinPredicate, left: BoxedExecutor, right: BoxedExecutor) -> Self {
        let desc = TupleDesc::merge(left.desc(), right.desc());
        Self {
            predicate,
            left,
            right,
            desc,
            state: None,
        }
    }

    fn build(&mut self) -> Result<HashState> {
        let mut left_map: HashMap<Field, Vec<Tuple>> = HashMap::new();
        while let Some(tuple) = self.left.next().transpose()? {
            let key = tuple.field(self.predicate.field1())?.clone();
            left_map.entry(key).or_default().push(tuple);
        }

        let mut right_map: HashMap<Field, Vec<Tuple>> = HashMap::new();
        while let Some(tuple) = self.right.next().transpose()? {
            let key = tuple.field(self.predicate.field2())?.clone();
            right_map.entry(key).or_default().push(tuple);
        }

        if self.predicate.op() == Op::Equals {
            left_map.retain(|key, _| right_map.contains_key(key));
            right_map.retain(|key, _| left_map.contains_key(key));
        }

        let (left_keys, left_buckets) = sorted_buckets(left_map);
        let (right_keys, right_buckets) = sorted_buckets(right_map);
        Ok(HashState {
            left_keys,
            right_keys,
            left_buckets,
            right_buckets,
            cursor: START,
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.state.is_none() {
            let state = self.build()?;
            self.state = Some(state);
        }
        let predicate = self.predicate;
        let state = self.state.as_mut().unwrap();

        // evaluate the candidate, then advance, then emit: the cursor always
        // points one step past the pair just produced
        while state.valid() {
            let left = &state.left_buckets[state.cursor.i][state.cursor.a];
            let right = &state.right_buckets[state.cursor.j][state.cursor.b];
            let joined = if predicate.filter(left, right)? {
                Some(Tuple::combine(left, right))
            } else {
                None
            };
            state.advance(predicate.op());
            if joined.is_some() {
                return Ok(joined);
            }
        }
        Ok(None)
    }
}

impl Executor for Join {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        // the hash tables survive a rewind, only the enumeration restarts
        if let Some(state) = self.state.as_mut() {
            state.cursor = START;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state = None;
        self.left.close()?;
        self.right.close()
    }

    fn children(&mut self) -> Vec<&mut BoxedExecutor> {
        vec![&mut self.left, &mut self.right]
    }

    fn set_children(&mut self, mut children: Vec<BoxedExecutor>) {
        debug_assert_eq!(children.len(), 2);
        self.right = children.remove(1);
        self.left = children.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use super::Join;
    use crate::common::TableId;
    use crate::concurrency::Transaction;
    use crate::executors::seq_scan::SeqScan;
    use crate::executors::tests::{drain_sorted, TestDb};
    use crate::executors::{BoxedExecutor, JoinPredicate};
    use crate::tuple::field::Op;

    fn join_tables(
        db: &TestDb,
        left: TableId,
        right: TableId,
        predicate: JoinPredicate,
    ) -> Result<(Transaction, BoxedExecutor)> {
        let tx = Transaction::begin();
        let left = SeqScan::new(Arc::clone(&db.ctx), tx.id(), left, Some("l"))?;
        let right = SeqScan::new(Arc::clone(&db.ctx), tx.id(), right, Some("r"))?;
        let join = Join::new(predicate, Box::new(left), Box::new(right));
        Ok((tx, Box::new(join)))
    }

    fn two_three_tables(db: &TestDb) -> (TableId, TableId) {
        let left = db.create_table("left", 2);
        let right = db.create_table("right", 3);
        db.insert_rows(left, &[&[1, 2], &[3, 4], &[5, 6], &[7, 8]]);
        db.insert_rows(
            right,
            &[&[1, 2, 3], &[2, 3, 4], &[3, 4, 5], &[4, 5, 6], &[5, 6, 7]],
        );
        (left, right)
    }

    #[test]
    fn equi_join_matches_common_keys() -> Result<()> {
        let db = TestDb::new();
        let (left, right) = two_three_tables(&db);

        let (tx, mut join) = join_tables(&db, left, right, JoinPredicate::new(0, Op::Equals, 0))?;
        assert_eq!(join.desc().num_fields(), 5);
        let rows = drain_sorted(&mut join)?;
        assert_eq!(
            rows,
            vec![
                vec![1, 2, 1, 2, 3],
                vec![3, 4, 3, 4, 5],
                vec![5, 6, 5, 6, 7],
            ]
        );
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn greater_than_join_enumerates_all_dominated_pairs() -> Result<()> {
        let db = TestDb::new();
        let (left, right) = two_three_tables(&db);

        let (tx, mut join) =
            join_tables(&db, left, right, JoinPredicate::new(0, Op::GreaterThan, 0))?;
        let rows = drain_sorted(&mut join)?;
        assert_eq!(rows.len(), 11);
        assert!(rows.contains(&vec![3, 4, 1, 2, 3]));
        assert!(rows.contains(&vec![3, 4, 2, 3, 4]));
        assert!(rows.iter().all(|row| row[0] > row[2]));
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn less_than_or_eq_join() -> Result<()> {
        let db = TestDb::new();
        let (left, right) = two_three_tables(&db);

        let (tx, mut join) =
            join_tables(&db, left, right, JoinPredicate::new(0, Op::LessThanOrEq, 0))?;
        let rows = drain_sorted(&mut join)?;
        // 1 <= {1..5}: 5 pairs, 3 <= {3,4,5}: 3 pairs, 5 <= {5}: 1 pair
        assert_eq!(rows.len(), 9);
        assert!(rows.iter().all(|row| row[0] <= row[2]));
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn not_equals_join_covers_the_complement() -> Result<()> {
        let db = TestDb::new();
        let (left, right) = two_three_tables(&db);

        let (tx, mut join) =
            join_tables(&db, left, right, JoinPredicate::new(0, Op::NotEquals, 0))?;
        let rows = drain_sorted(&mut join)?;
        // 4 * 5 pairs minus the 3 equal-key ones
        assert_eq!(rows.len(), 17);
        assert!(rows.iter().all(|row| row[0] != row[2]));
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn duplicate_keys_produce_every_pairing_once() -> Result<()> {
        let db = TestDb::new();
        let left = db.create_table("left", 2);
        let right = db.create_table("right", 2);
        db.insert_rows(left, &[&[1, 10], &[1, 11], &[2, 20]]);
        db.insert_rows(right, &[&[1, 100], &[1, 101], &[2, 200], &[3, 300]]);

        let (tx, mut join) = join_tables(&db, left, right, JoinPredicate::new(0, Op::Equals, 0))?;
        let rows = drain_sorted(&mut join)?;
        assert_eq!(
            rows,
            vec![
                vec![1, 10, 1, 100],
                vec![1, 10, 1, 101],
                vec![1, 11, 1, 100],
                vec![1, 11, 1, 101],
                vec![2, 20, 2, 200],
            ]
        );
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn empty_side_yields_no_rows() -> Result<()> {
        let db = TestDb::new();
        let left = db.create_table("left", 1);
        let right = db.create_table("right", 1);
        db.insert_rows(left, &[&[1], &[2]]);

        let (tx, mut join) = join_tables(&db, left, right, JoinPredicate::new(0, Op::Equals, 0))?;
        assert!(drain_sorted(&mut join)?.is_empty());
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn rewind_replays_without_rebuilding() -> Result<()> {
        let db = TestDb::new();
        let (left, right) = two_three_tables(&db);

        let (tx, mut join) = join_tables(&db, left, right, JoinPredicate::new(0, Op::Equals, 0))?;
        join.open()?;
        let mut first_pass = 0;
        while let Some(tuple) = join.next() {
            tuple?;
            first_pass += 1;
        }
        assert_eq!(first_pass, 3);

        join.rewind()?;
        let mut second_pass = 0;
        while let Some(tuple) = join.next() {
            tuple?;
            second_pass += 1;
        }
        assert_eq!(second_pass, 3);

        join.close()?;
        tx.commit(&db.ctx)?;
        Ok(())
    }
}
