use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{DbError, Result};
use crate::executors::{BoxedExecutor, Executor};
use crate::parallel::partition::PartitionFunction;
use crate::parallel::tuple_bag::{OutBuffer, TupleBag};
use crate::parallel::{ExchangeId, ExchangeTransport, Inbox, WorkerId};
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// The sending half of a shuffle edge. `open` hands the child to a writer
/// thread that routes every tuple through the partition function into one
/// buffer per destination worker; `next` joins that thread, so pulling the
/// producer blocks until the child is exhausted and every buffer (plus its
/// end-of-stream marker) has been shipped.
pub struct ShuffleProducer {
    exchange: ExchangeId,
    worker: WorkerId,
    dests: Vec<WorkerId>,
    partition_fn: Arc<dyn PartitionFunction>,
    transport: Arc<dyn ExchangeTransport>,
    desc: TupleDesc,
    child: Option<BoxedExecutor>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl ShuffleProducer {
    pub fn new(
        exchange: ExchangeId,
        worker: WorkerId,
        dests: Vec<WorkerId>,
        partition_fn: Arc<dyn PartitionFunction>,
        transport: Arc<dyn ExchangeTransport>,
        child: BoxedExecutor,
    ) -> Self {
        let desc = child.desc().clone();
        Self {
            exchange,
            worker,
            dests,
            partition_fn,
            transport,
            desc,
            child: Some(child),
            writer: None,
        }
    }

    fn join_writer(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer
                .join()
                .map_err(|_| DbError::Db("shuffle writer thread panicked".to_owned()))?,
            None => Ok(()),
        }
    }
}

impl Executor for ShuffleProducer {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        if self.partition_fn.num_partitions() != self.dests.len() {
            return Err(DbError::Db(format!(
                "partition function yields {} partitions for {} workers",
                self.partition_fn.num_partitions(),
                self.dests.len()
            )));
        }
        let mut child = self
            .child
            .take()
            .ok_or_else(|| DbError::Db("shuffle producer opened twice".to_owned()))?;

        let exchange = self.exchange;
        let worker = self.worker.clone();
        let dests = self.dests.clone();
        let partition_fn = Arc::clone(&self.partition_fn);
        let transport = Arc::clone(&self.transport);
        let desc = self.desc.clone();

        self.writer = Some(std::thread::spawn(move || {
            child.open()?;
            let mut buffers: Vec<OutBuffer> = dests
                .iter()
                .map(|dest| {
                    OutBuffer::new(
                        exchange,
                        worker.clone(),
                        dest.clone(),
                        desc.clone(),
                        Arc::clone(&transport),
                    )
                })
                .collect();

            while let Some(tuple) = child.next().transpose()? {
                let partition = partition_fn.partition(&tuple, &desc)?;
                buffers[partition].push(tuple)?;
            }
            child.close()?;

            for buffer in buffers {
                buffer.finish()?;
            }
            Ok(())
        }));
        Ok(())
    }

    /// Yields no tuples; blocks until the writer thread has drained the
    /// child and flushed every buffer.
    fn next(&mut self) -> Option<Result<Tuple>> {
        match self.join_writer() {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::Db("a shuffle producer cannot be rewound".to_owned()))
    }

    fn close(&mut self) -> Result<()> {
        self.join_writer()
    }
}

/// The receiving half of a shuffle edge: re-assembles the tuples the source
/// workers' producers routed to this worker. In a worker's plan tree the
/// local ShuffleProducer hangs below its consumer as the optional child, so
/// opening the consumer starts the local writer while the inbound queue
/// fills with bags from every worker.
pub struct ShuffleConsumer {
    exchange: ExchangeId,
    desc: TupleDesc,
    inbox: Inbox,
    child: Option<BoxedExecutor>,
}

impl ShuffleConsumer {
    pub fn new(
        exchange: ExchangeId,
        sources: &[WorkerId],
        desc: TupleDesc,
        queue: Receiver<TupleBag>,
        child: Option<BoxedExecutor>,
    ) -> Self {
        Self {
            exchange,
            desc,
            inbox: Inbox::new(sources, queue),
            child,
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }
}

impl Executor for ShuffleConsumer {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        match self.child.as_mut() {
            Some(child) => child.open(),
            None => Ok(()),
        }
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.inbox.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.inbox.rewind();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inbox.clear();
        match self.child.as_mut() {
            Some(child) => child.close(),
            None => Ok(()),
        }
    }

    fn children(&mut self) -> Vec<&mut BoxedExecutor> {
        self.child.as_mut().into_iter().collect()
    }

    fn set_children(&mut self, mut children: Vec<BoxedExecutor>) {
        if let Some(child) = children.pop() {
            self.child = Some(child);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc::{channel, Sender};
    use std::sync::{Arc, Mutex};

    use anyhow::Result;

    use super::{ShuffleConsumer, ShuffleProducer};
    use crate::error::Result as DbResult;
    use crate::executors::tests::{drain, drain_sorted, TestDb};
    use crate::executors::{BoxedExecutor, Executor};
    use crate::parallel::partition::SingleFieldHashPartition;
    use crate::parallel::tuple_bag::TupleBag;
    use crate::parallel::{ExchangeId, ExchangeTransport, WorkerId};
    use crate::tuple::desc::TupleDesc;
    use crate::tuple::field::Type;
    use crate::tuple::tests::int_tuple;

    /// Routes bags into one channel per destination worker.
    pub(crate) struct RoutingTransport {
        routes: Mutex<HashMap<WorkerId, Sender<TupleBag>>>,
    }

    impl RoutingTransport {
        pub(crate) fn new() -> Self {
            Self {
                routes: Mutex::new(HashMap::new()),
            }
        }

        pub(crate) fn route(&self, dest: WorkerId, sender: Sender<TupleBag>) {
            self.routes.lock().unwrap().insert(dest, sender);
        }
    }

    impl ExchangeTransport for RoutingTransport {
        fn send(&self, dest: &WorkerId, bag: TupleBag) -> DbResult<()> {
            self.routes.lock().unwrap()[dest].send(bag).unwrap();
            Ok(())
        }
    }

    #[test]
    fn shuffle_partitions_rows_across_consumers() -> Result<()> {
        let db = TestDb::new();
        let table_id = db.create_table("numbers", 2);
        let rows: Vec<Vec<i32>> = (0..50).map(|i| vec![i, i * 2]).collect();
        let row_refs: Vec<&[i32]> = rows.iter().map(|r| r.as_slice()).collect();
        db.insert_rows(table_id, &row_refs);

        let workers: Vec<WorkerId> = vec!["w1:1".to_owned(), "w2:1".to_owned()];
        let transport = Arc::new(RoutingTransport::new());
        let (s1, r1) = channel();
        let (s2, r2) = channel();
        transport.route(workers[0].clone(), s1);
        transport.route(workers[1].clone(), s2);

        let exchange = ExchangeId::fresh();
        let tx = crate::concurrency::Transaction::begin();
        let scan = crate::executors::seq_scan::SeqScan::new(
            Arc::clone(&db.ctx),
            tx.id(),
            table_id,
            None,
        )?;
        let mut producer: BoxedExecutor = Box::new(ShuffleProducer::new(
            exchange,
            "w0:1".to_owned(),
            workers.clone(),
            Arc::new(SingleFieldHashPartition::new(2, 0)),
            transport,
            Box::new(scan),
        ));

        // draining the producer blocks until everything is shipped
        assert!(drain(&mut producer)?.is_empty());
        tx.commit(&db.ctx)?;

        let sources = vec!["w0:1".to_owned()];
        let desc = TupleDesc::from_types(vec![Type::Int, Type::Int]);
        let mut c1: BoxedExecutor = Box::new(ShuffleConsumer::new(
            exchange,
            &sources,
            desc.clone(),
            r1,
            None,
        ));
        let mut c2: BoxedExecutor = Box::new(ShuffleConsumer::new(exchange, &sources, desc, r2, None));

        let part1 = drain_sorted(&mut c1)?;
        let part2 = drain_sorted(&mut c2)?;
        assert!(!part1.is_empty());
        assert!(!part2.is_empty());

        let mut all: Vec<Vec<i32>> = part1.into_iter().chain(part2).collect();
        all.sort();
        assert_eq!(all, rows);
        Ok(())
    }

    #[test]
    fn consumer_waits_for_every_source_eos() -> Result<()> {
        let sources = vec!["a:1".to_owned(), "b:1".to_owned()];
        let (sender, receiver) = channel();
        let exchange = ExchangeId::fresh();
        let desc = TupleDesc::from_types(vec![Type::Int]);
        let mut consumer = ShuffleConsumer::new(exchange, &sources, desc.clone(), receiver, None);

        sender.send(TupleBag::new(
            exchange,
            sources[0].clone(),
            desc.clone(),
            vec![int_tuple(&[1])],
        ))?;
        sender.send(TupleBag::eos(exchange, sources[0].clone()))?;
        sender.send(TupleBag::new(
            exchange,
            sources[1].clone(),
            desc,
            vec![int_tuple(&[2])],
        ))?;
        sender.send(TupleBag::eos(exchange, sources[1].clone()))?;

        consumer.open()?;
        let mut values = Vec::new();
        while let Some(tuple) = consumer.next() {
            values.push(tuple?.field(0)?.as_i32());
        }
        assert_eq!(values, vec![1, 2]);

        // rewind replays the buffered bags
        consumer.rewind()?;
        let mut replay = Vec::new();
        while let Some(tuple) = consumer.next() {
            replay.push(tuple?.field(0)?.as_i32());
        }
        assert_eq!(replay, values);
        consumer.close()?;
        Ok(())
    }

    #[test]
    fn tuple_order_within_one_source_is_preserved() -> Result<()> {
        let sources = vec!["a:1".to_owned()];
        let (sender, receiver) = channel();
        let exchange = ExchangeId::fresh();
        let desc = TupleDesc::from_types(vec![Type::Int]);
        let mut consumer = ShuffleConsumer::new(exchange, &sources, desc.clone(), receiver, None);

        for batch in [vec![1, 2, 3], vec![4, 5]] {
            let tuples = batch.iter().map(|i| int_tuple(&[*i])).collect();
            sender.send(TupleBag::new(
                exchange,
                sources[0].clone(),
                desc.clone(),
                tuples,
            ))?;
        }
        sender.send(TupleBag::eos(exchange, sources[0].clone()))?;

        consumer.open()?;
        let mut values = Vec::new();
        while let Some(tuple) = consumer.next() {
            values.push(tuple?.field(0)?.as_i32());
        }
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        Ok(())
    }
}
