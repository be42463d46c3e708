use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::parallel::{ExchangeId, ExchangeTransport, WorkerId};
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// A batch of tuples crossing an exchange edge. An empty bag with the
/// end-of-stream flag set closes one source worker's contribution to the
/// edge. The wire framing is the transport's business; the core treats bags
/// as opaque values.
#[derive(Clone, Debug)]
pub struct TupleBag {
    exchange: ExchangeId,
    worker: WorkerId,
    desc: Option<TupleDesc>,
    tuples: Vec<Tuple>,
    eos: bool,
}

impl TupleBag {
    /// A buffer is shipped once it holds this many tuples.
    pub const MAX_SIZE: usize = 500;
    /// A buffer at least this full is also shipped on a timer.
    pub const MIN_SIZE: usize = 100;
    /// Milliseconds between timer-driven flushes.
    pub const MAX_MS: u128 = 1000;

    pub fn new(
        exchange: ExchangeId,
        worker: WorkerId,
        desc: TupleDesc,
        tuples: Vec<Tuple>,
    ) -> Self {
        Self {
            exchange,
            worker,
            desc: Some(desc),
            tuples,
            eos: false,
        }
    }

    /// The end-of-stream marker for one source worker.
    pub fn eos(exchange: ExchangeId, worker: WorkerId) -> Self {
        Self {
            exchange,
            worker,
            desc: None,
            tuples: Vec::new(),
            eos: true,
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn desc(&self) -> Option<&TupleDesc> {
        self.desc.as_ref()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }
}

/// One producer-side buffer per destination worker, enforcing the batching
/// rules: ship at `MAX_SIZE`, ship a buffer at least `MIN_SIZE` full once
/// `MAX_MS` milliseconds have passed since its last flush, and on shutdown
/// ship the remainder followed by an end-of-stream bag.
pub struct OutBuffer {
    exchange: ExchangeId,
    worker: WorkerId,
    dest: WorkerId,
    desc: TupleDesc,
    transport: Arc<dyn ExchangeTransport>,
    tuples: Vec<Tuple>,
    last_flush: Instant,
}

impl OutBuffer {
    pub fn new(
        exchange: ExchangeId,
        worker: WorkerId,
        dest: WorkerId,
        desc: TupleDesc,
        transport: Arc<dyn ExchangeTransport>,
    ) -> Self {
        Self {
            exchange,
            worker,
            dest,
            desc,
            transport,
            tuples: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, tuple: Tuple) -> Result<()> {
        self.tuples.push(tuple);
        if self.tuples.len() >= TupleBag::MAX_SIZE {
            self.flush()?;
        } else if self.tuples.len() >= TupleBag::MIN_SIZE
            && self.last_flush.elapsed().as_millis() > TupleBag::MAX_MS
        {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.tuples.is_empty() {
            let bag = TupleBag::new(
                self.exchange,
                self.worker.clone(),
                self.desc.clone(),
                std::mem::take(&mut self.tuples),
            );
            self.transport.send(&self.dest, bag)?;
        }
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Ships the remainder and the end-of-stream marker.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.transport
            .send(&self.dest, TupleBag::eos(self.exchange, self.worker.clone()))
    }
}
