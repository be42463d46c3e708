use std::collections::HashMap;
use std::fmt::Display;

use crate::error::{DbError, Result};
use crate::executors::{BoxedExecutor, Executor};
use crate::tuple::desc::{TdItem, TupleDesc};
use crate::tuple::field::{Field, Type};
use crate::tuple::Tuple;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl Display for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        write!(f, "{s}")
    }
}

/// Replays a materialized tuple list; what an aggregator hands back once its
/// input is consumed.
pub struct TupleIterator {
    desc: TupleDesc,
    tuples: Vec<Tuple>,
    pos: usize,
}

impl TupleIterator {
    pub fn new(desc: TupleDesc, tuples: Vec<Tuple>) -> Self {
        Self {
            desc,
            tuples,
            pos: 0,
        }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn next(&mut self) -> Option<Tuple> {
        let tuple = self.tuples.get(self.pos).cloned();
        if tuple.is_some() {
            self.pos += 1;
        }
        tuple
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

/// Builds the output schema shared by both aggregators: `(INT)` without
/// grouping, `(group_type, INT)` with.
fn output_desc(
    group_type: Option<Type>,
    group_name: Option<String>,
    agg_name: Option<String>,
) -> TupleDesc {
    match group_type {
        None => TupleDesc::new(vec![TdItem::new(Type::Int, agg_name)]),
        Some(group_type) => TupleDesc::new(vec![
            TdItem::new(group_type, group_name),
            TdItem::new(Type::Int, agg_name),
        ]),
    }
}

fn output_tuple(desc: &TupleDesc, group: &Option<Field>, value: i32) -> Tuple {
    match group {
        None => Tuple::new(desc.clone(), vec![Field::Int(value)]),
        Some(group) => Tuple::new(desc.clone(), vec![group.clone(), Field::Int(value)]),
    }
}

/// Streaming group-by over an integer column. MIN/MAX keep the extremum,
/// SUM/COUNT accumulate, AVG keeps a running sum and count and divides on
/// output (integer division).
pub struct IntegerAggregator {
    group_by: Option<usize>,
    group_type: Option<Type>,
    afield: usize,
    op: AggregateOp,
    groups: HashMap<Option<Field>, i32>,
    counts: HashMap<Option<Field>, i32>,
    group_name: Option<String>,
    agg_name: Option<String>,
}

impl IntegerAggregator {
    pub fn new(
        group_by: Option<usize>,
        group_type: Option<Type>,
        afield: usize,
        op: AggregateOp,
    ) -> Self {
        Self {
            group_by,
            group_type,
            afield,
            op,
            groups: HashMap::new(),
            counts: HashMap::new(),
            group_name: None,
            agg_name: None,
        }
    }

    fn capture_names(&mut self, tuple: &Tuple) -> Result<()> {
        if self.agg_name.is_none() {
            if let Some(group_by) = self.group_by {
                self.group_name = tuple.desc().field_name(group_by)?.map(str::to_owned);
            }
            let afield_name = tuple.desc().field_name(self.afield)?.unwrap_or("null");
            self.agg_name = Some(format!("{}({})", self.op, afield_name));
        }
        Ok(())
    }

    pub fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> Result<()> {
        self.capture_names(tuple)?;
        let key = match self.group_by {
            None => None,
            Some(group_by) => Some(tuple.field(group_by)?.clone()),
        };
        let value = match tuple.field(self.afield)? {
            Field::Int(value) => *value,
            other => {
                return Err(DbError::Db(format!(
                    "integer aggregator fed a {} field",
                    other.field_type()
                )))
            }
        };

        match self.op {
            AggregateOp::Min => {
                self.groups
                    .entry(key)
                    .and_modify(|old| *old = (*old).min(value))
                    .or_insert(value);
            }
            AggregateOp::Max => {
                self.groups
                    .entry(key)
                    .and_modify(|old| *old = (*old).max(value))
                    .or_insert(value);
            }
            AggregateOp::Sum => {
                *self.groups.entry(key).or_insert(0) += value;
            }
            AggregateOp::Avg => {
                *self.groups.entry(key.clone()).or_insert(0) += value;
                *self.counts.entry(key).or_insert(0) += 1;
            }
            AggregateOp::Count => {
                *self.groups.entry(key).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// One output tuple per group. With no grouping and no input, COUNT
    /// still emits a zero; every other empty aggregate emits nothing.
    pub fn iterator(&self) -> TupleIterator {
        let desc = output_desc(
            self.group_type,
            self.group_name.clone(),
            self.agg_name.clone(),
        );

        let mut tuples: Vec<Tuple> = self
            .groups
            .iter()
            .map(|(group, accumulated)| {
                let value = match self.op {
                    AggregateOp::Avg => accumulated / self.counts[group],
                    _ => *accumulated,
                };
                output_tuple(&desc, group, value)
            })
            .collect();

        if tuples.is_empty() && self.group_by.is_none() && self.op == AggregateOp::Count {
            tuples.push(output_tuple(&desc, &None, 0));
        }

        TupleIterator::new(desc, tuples)
    }
}

/// Group-by over a string column. Only COUNT is meaningful, anything else is
/// rejected at construction.
pub struct StringAggregator {
    group_by: Option<usize>,
    group_type: Option<Type>,
    afield: usize,
    op: AggregateOp,
    counts: HashMap<Option<Field>, i32>,
    group_name: Option<String>,
    agg_name: Option<String>,
}

impl StringAggregator {
    pub fn new(
        group_by: Option<usize>,
        group_type: Option<Type>,
        afield: usize,
        op: AggregateOp,
    ) -> Result<Self> {
        if op != AggregateOp::Count {
            return Err(DbError::Db(format!(
                "string aggregates only support count, got {op}"
            )));
        }
        Ok(Self {
            group_by,
            group_type,
            afield,
            op,
            counts: HashMap::new(),
            group_name: None,
            agg_name: None,
        })
    }

    pub fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> Result<()> {
        if self.agg_name.is_none() {
            if let Some(group_by) = self.group_by {
                self.group_name = tuple.desc().field_name(group_by)?.map(str::to_owned);
            }
            let afield_name = tuple.desc().field_name(self.afield)?.unwrap_or("null");
            self.agg_name = Some(format!("{}({})", self.op, afield_name));
        }

        let key = match self.group_by {
            None => None,
            Some(group_by) => Some(tuple.field(group_by)?.clone()),
        };
        tuple.field(self.afield)?;
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    pub fn iterator(&self) -> TupleIterator {
        let desc = output_desc(
            self.group_type,
            self.group_name.clone(),
            self.agg_name.clone(),
        );

        let mut tuples: Vec<Tuple> = self
            .counts
            .iter()
            .map(|(group, count)| output_tuple(&desc, group, *count))
            .collect();

        if tuples.is_empty() && self.group_by.is_none() {
            tuples.push(output_tuple(&desc, &None, 0));
        }

        TupleIterator::new(desc, tuples)
    }
}

enum Aggregator {
    Int(IntegerAggregator),
    Str(StringAggregator),
}

impl Aggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<()> {
        match self {
            Aggregator::Int(agg) => agg.merge_tuple_into_group(tuple),
            Aggregator::Str(agg) => agg.merge_tuple_into_group(tuple),
        }
    }

    fn iterator(&self) -> TupleIterator {
        match self {
            Aggregator::Int(agg) => agg.iterator(),
            Aggregator::Str(agg) => agg.iterator(),
        }
    }
}

/// The aggregation operator: drains its child into the aggregator picked by
/// the aggregate column's type on the first pull, then replays the grouped
/// results.
pub struct Aggregate {
    child: BoxedExecutor,
    afield: usize,
    group_by: Option<usize>,
    op: AggregateOp,
    desc: TupleDesc,
    results: Option<TupleIterator>,
}

impl Aggregate {
    pub fn new(
        child: BoxedExecutor,
        afield: usize,
        group_by: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self> {
        let child_desc = child.desc();
        let group_type = match group_by {
            None => None,
            Some(group_by) => Some(child_desc.field_type(group_by)?),
        };
        let group_name = match group_by {
            None => None,
            Some(group_by) => child_desc.field_name(group_by)?.map(str::to_owned),
        };
        let agg_name = format!(
            "{op}({})",
            child_desc.field_name(afield)?.unwrap_or("null")
        );
        let desc = output_desc(group_type, group_name, Some(agg_name));

        Ok(Self {
            child,
            afield,
            group_by,
            op,
            desc,
            results: None,
        })
    }

    fn perform_aggregate(&mut self) -> Result<TupleIterator> {
        let group_type = match self.group_by {
            None => None,
            Some(group_by) => Some(self.child.desc().field_type(group_by)?),
        };
        let mut aggregator = match self.child.desc().field_type(self.afield)? {
            Type::Int => Aggregator::Int(IntegerAggregator::new(
                self.group_by,
                group_type,
                self.afield,
                self.op,
            )),
            Type::Str => Aggregator::Str(StringAggregator::new(
                self.group_by,
                group_type,
                self.afield,
                self.op,
            )?),
        };

        while let Some(tuple) = self.child.next().transpose()? {
            aggregator.merge(&tuple)?;
        }
        Ok(aggregator.iterator())
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.results.is_none() {
            let results = self.perform_aggregate()?;
            self.results = Some(results);
        }
        Ok(self.results.as_mut().unwrap().next())
    }
}

impl Executor for Aggregate {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        if let Some(results) = self.results.as_mut() {
            results.rewind();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.results = None;
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

    use super::{Aggregate, AggregateOp, IntegerAggregator, StringAggregator};
    use crate::concurrency::Transaction;
    use crate::executors::seq_scan::SeqScan;
    use crate::executors::tests::{drain_sorted, TestDb};
    use crate::executors::{BoxedExecutor, Executor};
    use crate::tuple::desc::TupleDesc;
    use crate::tuple::field::{Field, Type};
    use crate::tuple::tests::int_tuple;
    use crate::tuple::Tuple;

    #[test]
    fn grouped_average_uses_integer_division() -> Result<()> {
        let mut agg = IntegerAggregator::new(Some(0), Some(Type::Int), 1, AggregateOp::Avg);
        for row in [[1, 10], [1, 20], [2, 30], [2, 40], [2, 50]] {
            agg.merge_tuple_into_group(&int_tuple(&row))?;
        }

        let mut iter = agg.iterator();
        let mut rows: Vec<(i32, i32)> = Vec::new();
        while let Some(tuple) = iter.next() {
            rows.push((tuple.field(0)?.as_i32(), tuple.field(1)?.as_i32()));
        }
        rows.sort();
        assert_eq!(rows, vec![(1, 15), (2, 40)]);
        Ok(())
    }

    #[test]
    fn min_max_sum_count_over_groups() -> Result<()> {
        let data = [[1, 3], [1, 7], [2, 5], [2, 1], [2, 6]];
        let expect = [
            (AggregateOp::Min, vec![(1, 3), (2, 1)]),
            (AggregateOp::Max, vec![(1, 7), (2, 6)]),
            (AggregateOp::Sum, vec![(1, 10), (2, 12)]),
            (AggregateOp::Count, vec![(1, 2), (2, 3)]),
        ];

        for (op, expected) in expect {
            let mut agg = IntegerAggregator::new(Some(0), Some(Type::Int), 1, op);
            for row in data {
                agg.merge_tuple_into_group(&int_tuple(&row))?;
            }
            let mut iter = agg.iterator();
            let mut rows: Vec<(i32, i32)> = Vec::new();
            while let Some(tuple) = iter.next() {
                rows.push((tuple.field(0)?.as_i32(), tuple.field(1)?.as_i32()));
            }
            rows.sort();
            assert_eq!(rows, expected, "op {op}");
        }
        Ok(())
    }

    #[test]
    fn ungrouped_count_of_nothing_is_zero() -> Result<()> {
        let agg = IntegerAggregator::new(None, None, 0, AggregateOp::Count);
        let mut iter = agg.iterator();
        let tuple = iter.next().unwrap();
        assert_eq!(tuple.field(0)?.as_i32(), 0);
        assert!(iter.next().is_none());

        // other empty aggregates emit nothing
        let agg = IntegerAggregator::new(None, None, 0, AggregateOp::Sum);
        assert!(agg.iterator().next().is_none());
        Ok(())
    }

    #[test]
    fn string_aggregator_counts_only() -> Result<()> {
        assert!(StringAggregator::new(None, None, 0, AggregateOp::Max).is_err());

        let mut agg = StringAggregator::new(Some(0), Some(Type::Str), 1, AggregateOp::Count)?;
        let desc = TupleDesc::from_types(vec![Type::Str, Type::Str]);
        for (group, value) in [("a", "x"), ("a", "y"), ("b", "z")] {
            let tuple = Tuple::new(desc.clone(), vec![Field::str(group), Field::str(value)]);
            agg.merge_tuple_into_group(&tuple)?;
        }

        let mut iter = agg.iterator();
        let mut rows: Vec<(String, i32)> = Vec::new();
        while let Some(tuple) = iter.next() {
            rows.push((tuple.field(0)?.as_str().to_owned(), tuple.field(1)?.as_i32()));
        }
        rows.sort();
        assert_eq!(rows, vec![("a".to_owned(), 2), ("b".to_owned(), 1)]);
        Ok(())
    }

    #[test]
    fn aggregate_operator_drains_its_child() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 10], &[1, 20], &[2, 30], &[2, 40], &[2, 50]]);

        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?;
        let mut agg: BoxedExecutor = Box::new(Aggregate::new(
            Box::new(scan),
            1,
            Some(0),
            AggregateOp::Avg,
        )?);
        assert_eq!(agg.desc().num_fields(), 2);

        let rows = drain_sorted(&mut agg)?;
        assert_eq!(rows, vec![vec![1, 15], vec![2, 40]]);
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn aggregate_output_column_is_named_after_the_op() -> Result<()> {
        let db = TestDb::new();
        let desc = TupleDesc::named(vec![(Type::Int, "dept"), (Type::Int, "salary")]);
        let table_id = db.ctx.catalog().add_table("salaries", desc)?;
        db.insert_rows(table_id, &[&[1, 100]]);

        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, Some("s"))?;
        let agg = Aggregate::new(Box::new(scan), 1, Some(0), AggregateOp::Max)?;
        assert_eq!(agg.desc().field_name(0)?, Some("s.dept"));
        assert_eq!(agg.desc().field_name(1)?, Some("max(s.salary)"));
        tx.commit(&db.ctx)?;
        Ok(())
    }

    #[test]
    fn rewind_replays_aggregated_results() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        db.insert_rows(table_id, &[&[1, 1], &[2, 2]]);

        let tx = Transaction::begin();
        let scan = SeqScan::new(Arc::clone(&db.ctx), tx.id(), table_id, None)?;
        let mut agg: BoxedExecutor = Box::new(Aggregate::new(
            Box::new(scan),
            1,
            Some(0),
            AggregateOp::Sum,
        )?);
        agg.open()?;
        let mut first = 0;
        while let Some(tuple) = agg.next() {
            tuple?;
            first += 1;
        }
        agg.rewind()?;
        let mut second = 0;
        while let Some(tuple) = agg.next() {
            tuple?;
            second += 1;
        }
        assert_eq!(first, 2);
        assert_eq!(second, 2);
        agg.close()?;
        tx.commit(&db.ctx)?;
        Ok(())
    }
}
