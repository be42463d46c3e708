use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;

use crate::concurrency::Transaction;
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::parallel::tuple_bag::TupleBag;
use crate::parallel::{Coordinator, ExchangeId, ExchangeTransport, WorkerId};
use crate::plan::{ExchangeEnv, ExecutorBuilder, QueryPlan};

/// Control messages a worker accepts from the coordinator. Tuple data does
/// not travel this way: the transport delivers bags straight into the
/// inbound queues, so a worker can keep receiving while it executes.
pub enum ControlMessage {
    Plan(QueryPlan),
    Start,
    Shutdown,
}

/// The inbound queues of one worker, one per consumer exchange of the
/// current plan. The sending half stays here (the transport delivers through
/// it); each consumer takes its receiving half at build time.
pub struct InBufferRegistry {
    senders: Mutex<HashMap<ExchangeId, Sender<TupleBag>>>,
    receivers: Mutex<HashMap<ExchangeId, Receiver<TupleBag>>>,
}

impl InBufferRegistry {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, exchange: ExchangeId) {
        let (sender, receiver) = channel();
        self.senders.lock().unwrap().insert(exchange, sender);
        self.receivers.lock().unwrap().insert(exchange, receiver);
    }

    pub fn take_receiver(&self, exchange: ExchangeId) -> Result<Receiver<TupleBag>> {
        self.receivers
            .lock()
            .unwrap()
            .remove(&exchange)
            .ok_or_else(|| {
                DbError::Db(format!("no inbound queue for exchange {}", exchange.0))
            })
    }

    /// Routes a received bag into the queue of its exchange.
    pub fn deliver(&self, bag: TupleBag) -> Result<()> {
        let senders = self.senders.lock().unwrap();
        let sender = senders.get(&bag.exchange()).ok_or_else(|| {
            DbError::Db(format!("no consumer for exchange {}", bag.exchange().0))
        })?;
        sender
            .send(bag)
            .map_err(|_| DbError::Db("inbound queue is closed".to_owned()))
    }

    pub fn clear(&self) {
        self.senders.lock().unwrap().clear();
        self.receivers.lock().unwrap().clear();
    }
}

impl Default for InBufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const CONTROL_POLL: Duration = Duration::from_millis(50);
const LIVENESS_PERIOD_MS: u64 = 200;
const LIVENESS_RETRIES: usize = 3;

/// A query-execution worker. Lifecycle per plan: receive it, set up inbound
/// queues, localize table references, acknowledge with the worker id, wait
/// for `start`, run the root producer to exhaustion under a fresh
/// transaction, then clear the queues and wait for the next plan. A liveness
/// thread pings the coordinator and stops the worker once the coordinator
/// stays unreachable.
pub struct Worker {
    id: WorkerId,
    ctx: Arc<DbContext>,
    transport: Arc<dyn ExchangeTransport>,
    coordinator: Arc<dyn Coordinator>,
    control: Receiver<ControlMessage>,
    registry: Arc<InBufferRegistry>,
    to_shutdown: Arc<AtomicBool>,
    plan: Option<QueryPlan>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        ctx: Arc<DbContext>,
        transport: Arc<dyn ExchangeTransport>,
        coordinator: Arc<dyn Coordinator>,
        control: Receiver<ControlMessage>,
    ) -> Self {
        Self {
            id,
            ctx,
            transport,
            coordinator,
            control,
            registry: Arc::new(InBufferRegistry::new()),
            to_shutdown: Arc::new(AtomicBool::new(false)),
            plan: None,
        }
    }

    /// The registry the transport should deliver this worker's bags into.
    pub fn registry(&self) -> Arc<InBufferRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn is_running(&self) -> bool {
        self.plan.is_some()
    }

    /// Serves plans until a shutdown message arrives, the control channel
    /// closes, or the liveness controller gives up on the coordinator.
    pub fn run(mut self) {
        let liveness = spawn_liveness_controller(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.to_shutdown),
        );

        while !self.to_shutdown.load(Ordering::Relaxed) {
            match self.control.recv_timeout(CONTROL_POLL) {
                Ok(ControlMessage::Plan(plan)) => {
                    if let Err(e) = self.receive_plan(plan) {
                        eprintln!("worker {}: rejecting plan: {e}", self.id);
                    }
                }
                Ok(ControlMessage::Start) => {
                    if let Err(e) = self.execute_query() {
                        eprintln!("worker {}: query failed: {e}", self.id);
                    }
                }
                Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.to_shutdown.store(true, Ordering::Relaxed);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        let _ = liveness.join();
    }

    fn receive_plan(&mut self, mut plan: QueryPlan) -> Result<()> {
        if self.plan.is_some() {
            return Err(DbError::Db(
                "worker is still processing the previous plan".to_owned(),
            ));
        }

        let mut exchanges = Vec::new();
        plan.consumer_exchanges(&mut exchanges);
        self.registry.clear();
        for exchange in exchanges {
            self.registry.register(exchange);
        }

        plan.localize(self.ctx.catalog())?;
        self.plan = Some(plan);
        self.coordinator.acknowledge(&self.id);
        Ok(())
    }

    fn execute_query(&mut self) -> Result<()> {
        let plan = self
            .plan
            .take()
            .ok_or_else(|| DbError::Db("start received without a plan".to_owned()))?;

        let tx = Transaction::begin();
        let env = ExchangeEnv {
            worker_id: self.id.clone(),
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
        };
        let builder = ExecutorBuilder::with_exchange(Arc::clone(&self.ctx), tx.id(), env);

        let outcome = run_plan(&builder, plan);
        self.registry.clear();
        match outcome {
            Ok(()) => tx.commit(&self.ctx),
            Err(e) => {
                tx.abort(&self.ctx)?;
                Err(e)
            }
        }
    }
}

fn run_plan(builder: &ExecutorBuilder, plan: QueryPlan) -> Result<()> {
    let mut root = builder.build(plan)?;
    root.open()?;
    while let Some(tuple) = root.next() {
        tuple?;
    }
    root.close()
}

/// Periodically checks that the coordinator is reachable. After
/// `LIVENESS_RETRIES` consecutive failed pings the worker is told to shut
/// down. The period carries a random jitter so a fleet of workers does not
/// ping in lock step.
fn spawn_liveness_controller(
    coordinator: Arc<dyn Coordinator>,
    to_shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let jitter = rand::thread_rng().gen_range(0..LIVENESS_PERIOD_MS);
        std::thread::sleep(Duration::from_millis(LIVENESS_PERIOD_MS + jitter));
        if to_shutdown.load(Ordering::Relaxed) {
            return;
        }
        if !(0..LIVENESS_RETRIES).any(|_| coordinator.ping()) {
            to_shutdown.store(true, Ordering::Relaxed);
            return;
        }
    })
}
