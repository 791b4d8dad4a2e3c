// Execution Context
//
// Every execution of a plan runs in its own cancellation group. Workers are
// spawned through the context, and every blocking read they perform also
// waits on the group's cancellation signal, so cancelling a run wakes all of
// its workers at once.
//
// Live runs are tracked in a process-wide registry. The termination handler
// cancels every registered run before the process exits.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Select, Sender};
use log::{debug, error, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::common::Message;
use crate::query::executor::error::{ExecError, ExecResult};

/// Identifier of a worker, unique within its run
pub type WorkerId = u64;

/// Runs that have not been dropped yet
static ACTIVE_RUNS: Lazy<Mutex<Vec<Weak<RunState>>>> = Lazy::new(|| Mutex::new(Vec::new()));

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

const TERM_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

struct RunState {
    id: u64,
    cancelled: AtomicBool,
    /// Dropped on cancellation, which disconnects `cancel_rx` for every reader
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
    next_worker: AtomicU64,
    workers: Mutex<Vec<(WorkerId, JoinHandle<()>)>>,
    /// First fatal error reported by a worker
    failure: Mutex<Option<ExecError>>,
}

/// Handle on one run's cancellation group, shared by all its workers
#[derive(Clone)]
pub struct ExecutionContext {
    state: Arc<RunState>,
}

impl ExecutionContext {
    /// Create a new run and register it for process-wide termination
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = bounded(0);
        let state = Arc::new(RunState {
            id: NEXT_RUN_ID.fetch_add(1, Ordering::SeqCst),
            cancelled: AtomicBool::new(false),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
            next_worker: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        });

        let mut runs = ACTIVE_RUNS.lock();
        runs.retain(|run| run.strong_count() > 0);
        runs.push(Arc::downgrade(&state));
        drop(runs);

        debug!("Started run {}", state.id);
        ExecutionContext { state }
    }

    pub fn run_id(&self) -> u64 {
        self.state.id
    }

    /// Number of workers spawned so far for this run
    pub fn worker_count(&self) -> u64 {
        self.state.next_worker.load(Ordering::SeqCst)
    }

    /// Start a worker thread running `task` within this run
    pub fn spawn<F>(&self, role: &str, task: F) -> ExecResult<WorkerId>
    where
        F: FnOnce(&ExecutionContext) -> ExecResult<()> + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let id = self.state.next_worker.fetch_add(1, Ordering::SeqCst);
        let name = format!("run{}-{}-{}", self.state.id, role, id);
        let ctx = self.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| task(&ctx))) {
                Ok(result) => result,
                Err(_) => Err(ExecError::WorkerPanicked(id)),
            };
            ctx.finish(&name, result);
        })?;

        self.reap_finished();
        self.state.workers.lock().push((id, handle));
        debug!("Spawned worker {} in run {}", id, self.state.id);
        Ok(id)
    }

    /// Join workers that have already exited, so long runs do not hold on
    /// to the handles of every worker they ever spawned
    fn reap_finished(&self) {
        let finished: Vec<(WorkerId, JoinHandle<()>)> = {
            let mut workers = self.state.workers.lock();
            let (finished, running): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *workers).into_iter().partition(|(_, handle)| handle.is_finished());
            *workers = running;
            finished
        };
        for (id, handle) in finished {
            if handle.join().is_err() {
                self.fail(ExecError::WorkerPanicked(id));
            }
        }
    }

    fn finish(&self, name: &str, result: ExecResult<()>) {
        match result {
            Ok(()) => debug!("Worker {} finished", name),
            Err(ExecError::Cancelled) => debug!("Worker {} cancelled", name),
            Err(ExecError::Disconnected) => debug!("Worker {} stopped, its consumer went away", name),
            Err(e) => {
                error!("Worker {} failed: {}", name, e);
                self.fail(e);
            }
        }
    }

    /// Error for an input channel that closed without EOF
    fn closed_input(&self) -> ExecError {
        if self.is_cancelled() {
            ExecError::Cancelled
        } else {
            ExecError::ProtocolViolation("input stream ended without EOF".to_string())
        }
    }

    /// Block until `input` yields an item or the run is cancelled
    pub fn recv(&self, input: &Receiver<Message>) -> ExecResult<Message> {
        self.recv_any(&[input]).map(|(_, message)| message)
    }

    /// Block until any of `inputs` yields an item or the run is cancelled.
    /// Returns the index of the input that was ready along with its item.
    pub fn recv_any(&self, inputs: &[&Receiver<Message>]) -> ExecResult<(usize, Message)> {
        if self.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let mut select = Select::new();
        for input in inputs {
            select.recv(*input);
        }
        let cancel_index = select.recv(&self.state.cancel_rx);

        let operation = select.select();
        let index = operation.index();
        if index == cancel_index {
            let _ = operation.recv(&self.state.cancel_rx);
            return Err(ExecError::Cancelled);
        }
        match operation.recv(inputs[index]) {
            Ok(message) => Ok((index, message)),
            Err(_) => Err(self.closed_input()),
        }
    }

    /// Deliver an item downstream
    pub fn send(&self, out: &Sender<Message>, message: Message) -> ExecResult<()> {
        if self.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        out.send(message).map_err(|_| ExecError::Disconnected)
    }

    /// Cancel the run, waking every worker blocked in `recv`
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Cancelling run {}", self.state.id);
        }
        self.state.cancel_tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Record a fatal error and cancel the run. Only the first error is kept.
    pub fn fail(&self, error: ExecError) {
        {
            let mut failure = self.state.failure.lock();
            if failure.is_none() {
                *failure = Some(error);
            }
        }
        self.cancel();
    }

    /// Join every worker of the run, including those spawned while waiting.
    /// Returns the first fatal error, or `Cancelled` when the run was
    /// cancelled without one.
    pub fn wait(&self) -> ExecResult<()> {
        loop {
            let workers: Vec<_> = std::mem::take(&mut *self.state.workers.lock());
            if workers.is_empty() {
                break;
            }
            for (id, handle) in workers {
                if handle.join().is_err() {
                    self.fail(ExecError::WorkerPanicked(id));
                }
            }
        }

        match self.state.failure.lock().take() {
            Some(e) => Err(e),
            None if self.is_cancelled() => Err(ExecError::Cancelled),
            None => Ok(()),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel every live run in the process. Returns the number of workers
/// those runs have spawned.
pub fn terminate_all() -> usize {
    let runs: Vec<Arc<RunState>> = ACTIVE_RUNS.lock().iter().filter_map(Weak::upgrade).collect();
    let mut workers = 0;
    for state in runs {
        workers += state.next_worker.load(Ordering::SeqCst) as usize;
        ExecutionContext { state }.cancel();
    }
    workers
}

/// Exit status of a process stopped by `signal`
pub fn signal_exit_status(signal: i32) -> i32 {
    128 + signal
}

/// Install a handler for SIGINT, SIGTERM and SIGHUP that cancels every live
/// run, then exits with the conventional status for the signal received.
pub fn install_termination_handler() -> io::Result<()> {
    let mut signals = Signals::new(TERM_SIGNALS)?;
    thread::Builder::new().name("termination".to_string()).spawn(move || {
        if let Some(signal) = signals.forever().next() {
            let workers = terminate_all();
            warn!("Termination requested by signal {}, cancelled {} workers", signal, workers);
            std::process::exit(signal_exit_status(signal));
        }
    })?;
    Ok(())
}
