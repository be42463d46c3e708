use std::sync::Arc;

use crate::catalog::Catalog;
use crate::common::TableId;
use crate::concurrency::TransactionId;
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::executors::aggregate::{Aggregate, AggregateOp};
use crate::executors::delete::Delete;
use crate::executors::filter::Filter;
use crate::executors::insert::Insert;
use crate::executors::join::Join;
use crate::executors::seq_scan::SeqScan;
use crate::executors::{BoxedExecutor, JoinPredicate, Predicate};
use crate::parallel::collect::{CollectConsumer, CollectProducer};
use crate::parallel::partition::PartitionFunction;
use crate::parallel::shuffle::{ShuffleConsumer, ShuffleProducer};
use crate::parallel::worker::InBufferRegistry;
use crate::parallel::{ExchangeId, ExchangeTransport, WorkerId};
use crate::tuple::desc::TupleDesc;

/// A shippable description of an operator tree. A coordinator builds one
/// plan per worker; table references travel by name and are resolved against
/// each worker's own catalog before execution.
#[derive(Clone)]
pub enum QueryPlan {
    SeqScan {
        table: String,
        table_id: Option<TableId>,
        alias: Option<String>,
    },
    Filter {
        predicate: Predicate,
        child: Box<QueryPlan>,
    },
    Join {
        predicate: JoinPredicate,
        left: Box<QueryPlan>,
        right: Box<QueryPlan>,
    },
    Aggregate {
        afield: usize,
        group_by: Option<usize>,
        op: AggregateOp,
        child: Box<QueryPlan>,
    },
    Insert {
        table: String,
        table_id: Option<TableId>,
        child: Box<QueryPlan>,
    },
    Delete {
        child: Box<QueryPlan>,
    },
    ShuffleProducer {
        exchange: ExchangeId,
        dests: Vec<WorkerId>,
        partition_fn: Arc<dyn PartitionFunction>,
        child: Box<QueryPlan>,
    },
    ShuffleConsumer {
        exchange: ExchangeId,
        sources: Vec<WorkerId>,
        desc: TupleDesc,
        child: Option<Box<QueryPlan>>,
    },
    CollectProducer {
        exchange: ExchangeId,
        dest: WorkerId,
        child: Box<QueryPlan>,
    },
    CollectConsumer {
        exchange: ExchangeId,
        sources: Vec<WorkerId>,
        desc: TupleDesc,
        child: Option<Box<QueryPlan>>,
    },
}

impl QueryPlan {
    /// Collects the exchange ids of every consumer in the tree; the worker
    /// needs them to set up inbound queues before execution starts.
    pub fn consumer_exchanges(&self, out: &mut Vec<ExchangeId>) {
        match self {
            QueryPlan::SeqScan { .. } => {}
            QueryPlan::Filter { child, .. }
            | QueryPlan::Aggregate { child, .. }
            | QueryPlan::Insert { child, .. }
            | QueryPlan::Delete { child }
            | QueryPlan::ShuffleProducer { child, .. }
            | QueryPlan::CollectProducer { child, .. } => child.consumer_exchanges(out),
            QueryPlan::Join { left, right, .. } => {
                left.consumer_exchanges(out);
                right.consumer_exchanges(out);
            }
            QueryPlan::ShuffleConsumer {
                exchange, child, ..
            }
            | QueryPlan::CollectConsumer {
                exchange, child, ..
            } => {
                out.push(*exchange);
                if let Some(child) = child {
                    child.consumer_exchanges(out);
                }
            }
        }
    }

    /// Replaces table names with the ids of this worker's catalog.
    pub fn localize(&mut self, catalog: &Catalog) -> Result<()> {
        match self {
            QueryPlan::SeqScan {
                table, table_id, ..
            } => {
                *table_id = Some(catalog.table_id(table)?);
            }
            QueryPlan::Insert {
                table,
                table_id,
                child,
            } => {
                *table_id = Some(catalog.table_id(table)?);
                child.localize(catalog)?;
            }
            QueryPlan::Filter { child, .. }
            | QueryPlan::Aggregate { child, .. }
            | QueryPlan::Delete { child }
            | QueryPlan::ShuffleProducer { child, .. }
            | QueryPlan::CollectProducer { child, .. } => child.localize(catalog)?,
            QueryPlan::Join { left, right, .. } => {
                left.localize(catalog)?;
                right.localize(catalog)?;
            }
            QueryPlan::ShuffleConsumer { child, .. }
            | QueryPlan::CollectConsumer { child, .. } => {
                if let Some(child) = child {
                    child.localize(catalog)?;
                }
            }
        }
        Ok(())
    }
}

/// What the exchange operators of a plan need at build time: the identity of
/// this worker, the way out, and the inbound queues.
#[derive(Clone)]
pub struct ExchangeEnv {
    pub worker_id: WorkerId,
    pub transport: Arc<dyn ExchangeTransport>,
    pub registry: Arc<InBufferRegistry>,
}

/// Turns a localized plan into an executor tree.
pub struct ExecutorBuilder {
    ctx: Arc<DbContext>,
    tid: TransactionId,
    exchange: Option<ExchangeEnv>,
}

impl ExecutorBuilder {
    /// A builder for purely local plans; exchange nodes will be rejected.
    pub fn new(ctx: Arc<DbContext>, tid: TransactionId) -> Self {
        Self {
            ctx,
            tid,
            exchange: None,
        }
    }

    pub fn with_exchange(ctx: Arc<DbContext>, tid: TransactionId, env: ExchangeEnv) -> Self {
        Self {
            ctx,
            tid,
            exchange: Some(env),
        }
    }

    fn env(&self) -> Result<&ExchangeEnv> {
        self.exchange
            .as_ref()
            .ok_or_else(|| DbError::Db("plan has exchange operators but no exchange environment".to_owned()))
    }

    fn resolve(&self, table: &str, table_id: Option<TableId>) -> Result<TableId> {
        match table_id {
            Some(table_id) => Ok(table_id),
            None => self.ctx.catalog().table_id(table),
        }
    }

    pub fn build(&self, plan: QueryPlan) -> Result<BoxedExecutor> {
        match plan {
            QueryPlan::SeqScan {
                table,
                table_id,
                alias,
            } => {
                let table_id = self.resolve(&table, table_id)?;
                Ok(Box::new(SeqScan::new(
                    Arc::clone(&self.ctx),
                    self.tid,
                    table_id,
                    alias.as_deref(),
                )?))
            }
            QueryPlan::Filter { predicate, child } => {
                Ok(Box::new(Filter::new(predicate, self.build(*child)?)))
            }
            QueryPlan::Join {
                predicate,
                left,
                right,
            } => Ok(Box::new(Join::new(
                predicate,
                self.build(*left)?,
                self.build(*right)?,
            ))),
            QueryPlan::Aggregate {
                afield,
                group_by,
                op,
                child,
            } => Ok(Box::new(Aggregate::new(
                self.build(*child)?,
                afield,
                group_by,
                op,
            )?)),
            QueryPlan::Insert {
                table,
                table_id,
                child,
            } => {
                let table_id = self.resolve(&table, table_id)?;
                Ok(Box::new(Insert::new(
                    Arc::clone(&self.ctx),
                    self.tid,
                    self.build(*child)?,
                    table_id,
                )?))
            }
            QueryPlan::Delete { child } => Ok(Box::new(Delete::new(
                Arc::clone(&self.ctx),
                self.tid,
                self.build(*child)?,
            ))),
            QueryPlan::ShuffleProducer {
                exchange,
                dests,
                partition_fn,
                child,
            } => {
                let env = self.env()?;
                Ok(Box::new(ShuffleProducer::new(
                    exchange,
                    env.worker_id.clone(),
                    dests,
                    partition_fn,
                    Arc::clone(&env.transport),
                    self.build(*child)?,
                )))
            }
            QueryPlan::ShuffleConsumer {
                exchange,
                sources,
                desc,
                child,
            } => {
                let child = match child {
                    Some(child) => Some(self.build(*child)?),
                    None => None,
                };
                let env = self.env()?;
                let queue = env.registry.take_receiver(exchange)?;
                Ok(Box::new(ShuffleConsumer::new(
                    exchange, &sources, desc, queue, child,
                )))
            }
            QueryPlan::CollectProducer {
                exchange,
                dest,
                child,
            } => {
                let env = self.env()?;
                Ok(Box::new(CollectProducer::new(
                    exchange,
                    env.worker_id.clone(),
                    dest,
                    Arc::clone(&env.transport),
                    self.build(*child)?,
                )))
            }
            QueryPlan::CollectConsumer {
                exchange,
                sources,
                desc,
                child,
            } => {
                let child = match child {
                    Some(child) => Some(self.build(*child)?),
                    None => None,
                };
                let env = self.env()?;
                let queue = env.registry.take_receiver(exchange)?;
                Ok(Box::new(CollectConsumer::new(
                    exchange, &sources, desc, queue, child,
                )))
            }
        }
    }
}
