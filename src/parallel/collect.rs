use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{DbError, Result};
use crate::executors::{BoxedExecutor, Executor};
use crate::parallel::tuple_bag::{OutBuffer, TupleBag};
use crate::parallel::{ExchangeId, ExchangeTransport, Inbox, WorkerId};
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// The broadcast-to-one exchange: every non-root worker runs a
/// CollectProducer that ships its whole subtree to the root's
/// CollectConsumer. Batching and the writer-thread lifecycle are identical
/// to the shuffle side, just with a single destination.
pub struct CollectProducer {
    exchange: ExchangeId,
    worker: WorkerId,
    dest: WorkerId,
    transport: Arc<dyn ExchangeTransport>,
    desc: TupleDesc,
    child: Option<BoxedExecutor>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl CollectProducer {
    pub fn new(
        exchange: ExchangeId,
        worker: WorkerId,
        dest: WorkerId,
        transport: Arc<dyn ExchangeTransport>,
        child: BoxedExecutor,
    ) -> Self {
        let desc = child.desc().clone();
        Self {
            exchange,
            worker,
            dest,
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
                .map_err(|_| DbError::Db("collect writer thread panicked".to_owned()))?,
            None => Ok(()),
        }
    }
}

impl Executor for CollectProducer {
    fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<()> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| DbError::Db("collect producer opened twice".to_owned()))?;

        let exchange = self.exchange;
        let worker = self.worker.clone();
        let dest = self.dest.clone();
        let transport = Arc::clone(&self.transport);
        let desc = self.desc.clone();

        self.writer = Some(std::thread::spawn(move || {
            child.open()?;
            let mut buffer = OutBuffer::new(exchange, worker, dest, desc, transport);
            while let Some(tuple) = child.next().transpose()? {
                buffer.push(tuple)?;
            }
            child.close()?;
            buffer.finish()
        }));
        Ok(())
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        match self.join_writer() {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::Db("a collect producer cannot be rewound".to_owned()))
    }

    fn close(&mut self) -> Result<()> {
        self.join_writer()
    }
}

/// The root-side sink of a collect edge: merges the streams of every source
/// worker, in arrival order across sources and send order within one.
pub struct CollectConsumer {
    exchange: ExchangeId,
    desc: TupleDesc,
    inbox: Inbox,
    child: Option<BoxedExecutor>,
}

impl CollectConsumer {
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

impl Executor for CollectConsumer {
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
