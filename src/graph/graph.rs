use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::graph::counter::{RemainingCounter, SeedSignal};
use crate::graph::node::{Feeds, Node, Step};
use crate::graph::phase::{Phase, PhaseRegister};
use crate::graph::queue::{BoundedQueue, Closable, Discipline};
use crate::graph::request::Request;
use crate::graph::value::Fetched;

/// State reachable from the stepping thread and from every queue runner.
struct Shared {
    phase: PhaseRegister,
    seed: Arc<SeedSignal>,
    closables: Mutex<Vec<Arc<dyn Closable>>>,
    failure: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for closable in self.closables.lock().iter() {
            closable.close();
        }
        self.seed.close();
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn fail(&self, message: String) {
        self.failure.lock().get_or_insert(message);
        self.close();
    }
}

struct Runner {
    name: String,
    node: Node<()>,
}

/// The execution session: phase register, queues and their background runners.
///
/// Dropping the graph closes every queue it created, which unblocks and ends
/// all runner threads, and then joins them.
pub struct Graph {
    shared: Arc<Shared>,
    pending: Mutex<Vec<Runner>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            shared: Arc::new(Shared {
                phase: PhaseRegister::new(Phase::None),
                seed: Arc::new(SeedSignal::default()),
                closables: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            pending: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.shared.phase.set(phase);
    }

    pub fn seed_signal(&self) -> Arc<SeedSignal> {
        self.shared.seed.clone()
    }

    /// New remaining-total-size register wired to this graph's seed signal.
    pub fn counter(&self, name: &str) -> Arc<RemainingCounter> {
        Arc::new(RemainingCounter::new(name, self.shared.seed.clone()))
    }

    /// Creates a queue owned by this graph; it is closed when the graph closes.
    pub fn queue<T: Send + 'static>(
        &self,
        name: &str,
        capacity: usize,
        discipline: Discipline,
    ) -> Result<Arc<BoundedQueue<T>>> {
        let queue = Arc::new(BoundedQueue::new(name, capacity, discipline)?);
        if self.shared.is_closed() {
            queue.close();
        }
        self.shared.closables.lock().push(queue.clone());
        Ok(queue)
    }

    /// Registers `node` to be evaluated over and over on its own thread once
    /// the runners start. A runner ends when a queue it touches is closed.
    pub fn add_queue_runner(&self, name: &str, node: Node<()>) {
        self.pending.lock().push(Runner {
            name: name.to_owned(),
            node,
        });
    }

    /// Spawns one thread per registered runner; returns how many were started.
    pub fn start_queue_runners(&self) -> Result<usize> {
        if self.shared.is_closed() {
            return Err(Error::missing("cannot start queue runners on a closed graph"));
        }
        let runners: Vec<Runner> = self.pending.lock().drain(..).collect();
        let count = runners.len();
        let mut handles = self.handles.lock();
        for runner in runners {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(runner.name.clone())
                .spawn(move || run_queue_runner(shared, runner))?;
            handles.push(handle);
        }
        info!(count, "queue runners started");
        Ok(count)
    }

    /// Executes one step with the current phase and returns every fetch.
    pub fn run(&self, request: Request) -> Result<Fetched> {
        if let Some(failure) = self.shared.failure() {
            return Err(Error::RunnerFailed(failure));
        }
        let (feeds, fetches) = request.into_parts();
        let mut step = Step::new(self.phase(), feeds);
        let mut fetched = Fetched::new();
        for fetch in &fetches {
            match fetch.run(&mut step) {
                Ok(value) => fetched.insert(fetch.key(), value),
                Err(err) => return Err(self.explain(err)),
            }
        }
        Ok(fetched)
    }

    /// Evaluates a single node in a fresh step.
    pub fn eval<T>(&self, node: &Node<T>, feeds: Feeds) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Some(failure) = self.shared.failure() {
            return Err(Error::RunnerFailed(failure));
        }
        let mut step = Step::new(self.phase(), feeds);
        node.eval(&mut step).map_err(|err| self.explain(err))
    }

    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes every queue and wakes every blocked step and runner.
    pub fn close(&self) {
        self.shared.close();
    }

    // A closed queue seen by the stepping thread is the symptom; the runner
    // failure that closed it is the cause worth reporting.
    fn explain(&self, err: Error) -> Error {
        match (err, self.shared.failure()) {
            (Error::QueueClosed(_), Some(failure)) => Error::RunnerFailed(failure),
            (err, _) => err,
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.shared.close();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_queue_runner(shared: Arc<Shared>, runner: Runner) {
    debug!(runner = %runner.name, "queue runner running");
    while !shared.is_closed() {
        let mut step = Step::new(shared.phase.get(), Feeds::new());
        match runner.node.eval(&mut step) {
            Ok(()) => {}
            Err(Error::QueueClosed(queue)) => {
                debug!(runner = %runner.name, %queue, "queue runner stopped");
                break;
            }
            Err(err) => {
                error!(runner = %runner.name, error = %err, "queue runner failed");
                shared.fail(format!("{}: {}", runner.name, err));
                break;
            }
        }
    }
}
