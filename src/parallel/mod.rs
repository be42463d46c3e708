use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Receiver;

use crate::error::{DbError, Result};
use crate::parallel::tuple_bag::TupleBag;
use crate::tuple::Tuple;

pub mod collect;
pub mod partition;
pub mod shuffle;
pub mod tuple_bag;
pub mod worker;

/// A worker is addressed by its `host:port` string, which doubles as its id.
pub type WorkerId = String;

/// Identifies one exchange edge of a distributed plan. Every producer tags
/// outgoing bags with it and every consumer owns the matching inbound queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeId(pub u32);

static NEXT_EXCHANGE_ID: AtomicU32 = AtomicU32::new(1);

impl ExchangeId {
    pub fn fresh() -> Self {
        Self(NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The transport contract producers write through. How bags are framed and
/// moved between processes belongs to the network layer; the core only
/// demands that bags for one destination arrive in send order.
pub trait ExchangeTransport: Send + Sync {
    fn send(&self, dest: &WorkerId, bag: TupleBag) -> Result<()>;
}

/// The coordinator as a worker sees it: something to acknowledge plans to
/// and to ping for liveness.
pub trait Coordinator: Send + Sync {
    fn acknowledge(&self, worker: &WorkerId);
    fn ping(&self) -> bool;
}

/// The receiving half of an exchange edge, shared by the shuffle and collect
/// consumers. Keeps a bit per source worker that has signalled end-of-stream
/// plus a buffer of every bag taken off the queue, so a rewind can replay
/// them before blocking for more.
pub(crate) struct Inbox {
    source_index: HashMap<WorkerId, usize>,
    eos: Vec<bool>,
    queue: Receiver<TupleBag>,
    buffer: Vec<TupleBag>,
    bag_index: usize,
    tuple_index: usize,
}

impl Inbox {
    pub(crate) fn new(sources: &[WorkerId], queue: Receiver<TupleBag>) -> Self {
        let source_index = sources
            .iter()
            .enumerate()
            .map(|(index, worker)| (worker.clone(), index))
            .collect();
        Self {
            source_index,
            eos: vec![false; sources.len()],
            queue,
            buffer: Vec::new(),
            bag_index: 0,
            tuple_index: 0,
        }
    }

    fn all_sources_done(&self) -> bool {
        self.eos.iter().all(|done| *done)
    }

    /// The next tuple: drains the current bag, then the buffered bags, then
    /// blocks on the queue until a bag with tuples or the last end-of-stream
    /// marker arrives.
    pub(crate) fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(bag) = self.buffer.get(self.bag_index) {
                if let Some(tuple) = bag.tuples().get(self.tuple_index) {
                    let tuple = tuple.clone();
                    self.tuple_index += 1;
                    return Ok(Some(tuple));
                }
                self.bag_index += 1;
                self.tuple_index = 0;
                continue;
            }

            if self.all_sources_done() {
                return Ok(None);
            }

            let bag = self.queue.recv().map_err(|_| {
                DbError::Db("exchange queue closed before every source finished".to_owned())
            })?;
            if bag.is_eos() {
                let index = self.source_index.get(bag.worker()).ok_or_else(|| {
                    DbError::Db(format!("bag from unknown worker {}", bag.worker()))
                })?;
                self.eos[*index] = true;
            } else if !bag.tuples().is_empty() {
                self.buffer.push(bag);
            }
        }
    }

    /// Replays the buffered bags from the start; fresh bags still arrive
    /// after them.
    pub(crate) fn rewind(&mut self) {
        self.bag_index = 0;
        self.tuple_index = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
        self.bag_index = 0;
        self.tuple_index = 0;
        self.eos.fill(false);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{Coordinator, ExchangeTransport, WorkerId};
    use crate::error::{DbError, Result};
    use crate::parallel::tuple_bag::TupleBag;
    use crate::parallel::worker::InBufferRegistry;

    /// Routes bags straight into the destination worker's inbound queues.
    pub(crate) struct LocalTransport {
        registries: Mutex<HashMap<WorkerId, Arc<InBufferRegistry>>>,
    }

    impl LocalTransport {
        pub(crate) fn new() -> Self {
            Self {
                registries: Mutex::new(HashMap::new()),
            }
        }

        pub(crate) fn attach(&self, worker: WorkerId, registry: Arc<InBufferRegistry>) {
            self.registries.lock().unwrap().insert(worker, registry);
        }
    }

    impl ExchangeTransport for LocalTransport {
        fn send(&self, dest: &WorkerId, bag: TupleBag) -> Result<()> {
            let registry = self
                .registries
                .lock()
                .unwrap()
                .get(dest)
                .cloned()
                .ok_or_else(|| DbError::Db(format!("no route to worker {dest}")))?;
            registry.deliver(bag)
        }
    }

    /// Records acknowledgements and answers pings until told to play dead.
    pub(crate) struct TestCoordinator {
        pub(crate) acks: Mutex<Vec<WorkerId>>,
        alive: AtomicBool,
    }

    impl TestCoordinator {
        pub(crate) fn new() -> Self {
            Self {
                acks: Mutex::new(Vec::new()),
                alive: AtomicBool::new(true),
            }
        }

        pub(crate) fn go_dark(&self) {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    impl Coordinator for TestCoordinator {
        fn acknowledge(&self, worker: &WorkerId) {
            self.acks.lock().unwrap().push(worker.clone());
        }

        fn ping(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
    }
}
