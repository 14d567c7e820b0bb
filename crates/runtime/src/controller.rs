//! Runner lifecycle controller.
//!
//! Owns one execution context at a time and drives it through
//! `Idle → Loading → Ready ⇄ Running`. All state lives in a slot guarded by
//! a `parking_lot` mutex that is never held across an `.await`; every
//! context gets a generation number so late results from a torn-down
//! context are recognized and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use pybridge_channel::{Broadcaster, CoordinationMessage, InputBroker, SharedTransport, Subscription};
use pybridge_core::{PackageSet, RunnerConfig};
use pybridge_runner::{
    ExecutionContext, OutputSink, RunnerError, SessionInfo, SharedFactory, Traceback, Worker,
};
use tokio::sync::{oneshot, watch};

use crate::error::LifecycleError;
use crate::event::RunnerEvent;
use crate::output::OutputBuffer;
use crate::state::{RunnerState, validate_transition};

/// What a run that reached user code produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Everything the run wrote to stdout.
    pub stdout: String,
    /// Rendered traceback when user code raised, empty otherwise.
    pub stderr: String,
    /// The exception raised by user code.
    pub traceback: Option<Traceback>,
}

impl RunOutcome {
    /// Whether user code raised.
    pub fn raised(&self) -> bool {
        self.traceback.is_some()
    }
}

/// The live session together with the runner's current state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunnerSession {
    /// Correlation root for the session's input requests.
    pub session_id: pybridge_core::SessionId,
    /// State at the time of the snapshot.
    pub state: RunnerState,
    /// Version reported by the interpreter.
    pub interpreter_version: String,
}

/// Permission to run on a context that was moved to `Running`.
struct RunPermit {
    generation: u64,
    worker: Arc<Worker>,
}

type Ticket = oneshot::Sender<Result<RunPermit, LifecycleError>>;

enum Admission {
    Now(RunPermit),
    Queued {
        ticket: oneshot::Receiver<Result<RunPermit, LifecycleError>>,
        initialize: bool,
    },
}

struct Slot {
    state: RunnerState,
    worker: Option<Arc<Worker>>,
    session: Option<SessionInfo>,
    queued: Option<Ticket>,
}

struct Inner {
    config: RunnerConfig,
    factory: SharedFactory,
    transport: SharedTransport,
    broker: Arc<InputBroker>,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    output: OutputBuffer,
    watched: Mutex<IndexSet<String>>,
    events: Broadcaster<RunnerEvent>,
    state_tx: watch::Sender<RunnerState>,
}

impl Inner {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn spawn_worker(self: &Arc<Self>) -> Arc<Worker> {
        let generation = self.generation();
        let weak: Weak<Self> = Arc::downgrade(self);
        let sink: OutputSink = Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message(generation, message);
            }
        });
        let context = ExecutionContext::new(self.factory.create(), Arc::clone(&self.transport), sink);
        tracing::debug!(generation, "execution context created");
        Arc::new(Worker::spawn(context))
    }

    fn on_message(&self, generation: u64, message: CoordinationMessage) {
        if generation != self.generation() {
            return;
        }
        if let CoordinationMessage::OutputChunk(chunk) = message {
            self.output.push(chunk.text.clone());
            self.events.emit(RunnerEvent::Output {
                session_id: chunk.session_id,
                text: chunk.text,
            });
        }
    }

    fn set_state(&self, slot: &mut Slot, to: RunnerState) {
        let from = slot.state;
        if from == to {
            return;
        }
        slot.state = to;
        self.state_tx.send_replace(to);
        tracing::debug!(%from, %to, "runner state changed");
        self.events.emit(RunnerEvent::StateChanged { from, to });
    }

    /// Destroy the current context and forget its session.
    fn teardown(self: &Arc<Self>, slot: &mut Slot, respawn: bool) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(worker) = slot.worker.take() {
            worker.terminate();
        }
        if let Some(session) = slot.session.take() {
            let discarded = self.transport.discard_session(session.session_id);
            self.broker.discard_session(session.session_id);
            tracing::debug!(session_id = %session.session_id, discarded, "session discarded");
        }
        if respawn {
            slot.worker = Some(self.spawn_worker());
        }
    }

    fn fail_queued(slot: &mut Slot, err: LifecycleError) {
        if let Some(ticket) = slot.queued.take() {
            let _ = ticket.send(Err(err));
        }
    }

    fn begin_run(&self, slot: &mut Slot) -> Result<RunPermit, LifecycleError> {
        validate_transition(slot.state, RunnerState::Running)?;
        let worker = slot.worker.clone().ok_or(LifecycleError::NotReady)?;
        self.output.clear();
        self.set_state(slot, RunnerState::Running);
        Ok(RunPermit {
            generation: self.generation(),
            worker,
        })
    }

    fn finish_loading(
        self: &Arc<Self>,
        generation: u64,
        result: Result<SessionInfo, RunnerError>,
    ) -> Result<SessionInfo, LifecycleError> {
        let mut slot = self.slot.lock();
        if generation != self.generation() || slot.state != RunnerState::Loading {
            return Err(LifecycleError::Interrupted);
        }

        match result {
            Ok(info) => {
                slot.session = Some(info.clone());
                self.set_state(&mut slot, RunnerState::Ready);
                self.events.emit(RunnerEvent::Ready {
                    session_id: info.session_id,
                    interpreter_version: info.interpreter_version.clone(),
                });
                tracing::info!(session_id = %info.session_id, "runner ready");

                if let Some(ticket) = slot.queued.take() {
                    let permit = self.begin_run(&mut slot);
                    if let Err(Ok(_)) = ticket.send(permit) {
                        self.set_state(&mut slot, RunnerState::Ready);
                    }
                }
                Ok(info)
            }
            Err(err) => {
                tracing::error!(error = %err, "runner initialization failed");
                self.teardown(&mut slot, true);
                self.set_state(&mut slot, RunnerState::Idle);
                self.events.emit(RunnerEvent::InitializationFailed {
                    error: err.to_string(),
                });
                let err = LifecycleError::Initialization(err);
                Self::fail_queued(&mut slot, err.clone());
                Err(err)
            }
        }
    }

    /// Returns the outcome and whether the runner went back to `Ready`.
    fn finish_run(
        self: &Arc<Self>,
        generation: u64,
        result: Option<Result<(), RunnerError>>,
    ) -> (Result<RunOutcome, LifecycleError>, bool) {
        let mut slot = self.slot.lock();
        if generation != self.generation() || slot.state != RunnerState::Running {
            return (Err(LifecycleError::Interrupted), false);
        }

        let traceback = match result {
            None => {
                let timeout_ms = self.config.timeout_ms;
                tracing::warn!(timeout_ms, "execution timed out");
                self.teardown(&mut slot, true);
                self.set_state(&mut slot, RunnerState::Idle);
                self.output.set_stderr(format!(
                    "Execution timed out. Reached limit of {timeout_ms} ms."
                ));
                self.events.emit(RunnerEvent::TimedOut { timeout_ms });
                return (Err(LifecycleError::Timeout { timeout_ms }), false);
            }
            Some(Ok(())) => None,
            Some(Err(RunnerError::Execution(tb))) => {
                self.output
                    .set_stderr(format!("Traceback (most recent call last):\n{tb}"));
                Some(tb)
            }
            Some(Err(err)) => {
                self.output.set_stderr(err.to_string());
                let fatal = matches!(
                    err,
                    RunnerError::WorkerGone
                        | RunnerError::Interpreter(pybridge_runner::InterpreterError::Crashed(_))
                );
                if fatal {
                    tracing::error!(error = %err, "execution context died");
                    self.teardown(&mut slot, true);
                    self.set_state(&mut slot, RunnerState::Idle);
                    return (Err(err.into()), false);
                }
                self.set_state(&mut slot, RunnerState::Ready);
                return (Err(err.into()), true);
            }
        };

        self.set_state(&mut slot, RunnerState::Ready);
        self.events.emit(RunnerEvent::RunCompleted {
            raised: traceback.is_some(),
        });
        let outcome = RunOutcome {
            stdout: self.output.stdout(),
            stderr: self.output.stderr(),
            traceback,
        };
        (Ok(outcome), true)
    }

    /// Tear down a context abandoned in `expected` by a dropped caller.
    fn abandon(self: &Arc<Self>, generation: u64, expected: RunnerState) {
        let mut slot = self.slot.lock();
        if generation != self.generation() || slot.state != expected {
            return;
        }
        tracing::warn!(state = %expected, "caller went away, resetting execution context");
        self.teardown(&mut slot, true);
        self.set_state(&mut slot, RunnerState::Idle);
        Self::fail_queued(&mut slot, LifecycleError::Interrupted);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if let Some(worker) = slot.worker.take() {
            worker.terminate();
        }
        if let Some(session) = slot.session.take() {
            self.transport.discard_session(session.session_id);
            self.broker.discard_session(session.session_id);
        }
    }
}

/// Resets the runner if an `initialize` or `run` future is dropped
/// mid-flight.
struct AbandonGuard {
    inner: Arc<Inner>,
    generation: u64,
    state: RunnerState,
    armed: bool,
}

impl AbandonGuard {
    fn new(inner: &Arc<Inner>, generation: u64, state: RunnerState) -> Self {
        Self {
            inner: Arc::clone(inner),
            generation,
            state,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon(self.generation, self.state);
        }
    }
}

/// Drives one Python runner through its lifecycle.
///
/// Cheap to clone; clones share the runner.
///
/// # Examples
///
/// ```ignore
/// let runner = provider.runner(PackageSet::new(["numpy"], Vec::<String>::new()));
/// runner.initialize().await?;
/// let outcome = runner.run("import numpy; print(numpy.arange(3))").await?;
/// println!("{}", outcome.stdout);
/// ```
#[derive(Clone)]
pub struct RunnerController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RunnerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerController")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl RunnerController {
    /// Create a controller. No context exists until one is needed.
    ///
    /// `config.packages` is the package set loaded by [`initialize`](Self::initialize).
    pub fn new(
        config: RunnerConfig,
        factory: SharedFactory,
        transport: SharedTransport,
        broker: Arc<InputBroker>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunnerState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                transport,
                broker,
                slot: Mutex::new(Slot {
                    state: RunnerState::Idle,
                    worker: None,
                    session: None,
                    queued: None,
                }),
                generation: AtomicU64::new(0),
                output: OutputBuffer::new(),
                watched: Mutex::new(IndexSet::new()),
                events: Broadcaster::default(),
                state_tx,
            }),
        }
    }

    /// Current state. `AwaitingInput` is reported while running and the
    /// broker holds a request of the live session.
    pub fn state(&self) -> RunnerState {
        let slot = self.inner.slot.lock();
        match (&slot.state, &slot.session) {
            (RunnerState::Running, Some(session))
                if self.inner.broker.is_session_awaiting(session.session_id) =>
            {
                RunnerState::AwaitingInput
            }
            (state, _) => *state,
        }
    }

    /// Receiver of stored state changes.
    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> Subscription<RunnerEvent> {
        self.inner.events.subscribe()
    }

    /// The live session.
    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.slot.lock().session.clone()
    }

    /// Snapshot of the live session, `None` without one.
    pub fn runner_session(&self) -> Option<RunnerSession> {
        let state = self.state();
        self.session().map(|info| RunnerSession {
            session_id: info.session_id,
            state,
            interpreter_version: info.interpreter_version,
        })
    }

    /// Whether code can run right now.
    pub fn is_ready(&self) -> bool {
        self.inner.slot.lock().state == RunnerState::Ready
    }

    /// Whether the interpreter is loading.
    pub fn is_loading(&self) -> bool {
        self.inner.slot.lock().state.is_loading()
    }

    /// Whether user code is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.slot.lock().state.is_busy()
    }

    /// Configuration this runner was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Stdout of the current or last run.
    pub fn stdout(&self) -> String {
        self.inner.output.stdout()
    }

    /// Stderr of the current or last run.
    pub fn stderr(&self) -> String {
        self.inner.output.stderr()
    }

    /// Allocate a fresh, unstarted execution context.
    ///
    /// Valid from `Idle` and `Terminated`; ends in `Idle`.
    pub fn create_execution_context(&self) -> Result<(), LifecycleError> {
        let mut slot = self.inner.slot.lock();
        match slot.state {
            RunnerState::Idle | RunnerState::Terminated => {
                self.inner.teardown(&mut slot, true);
                self.inner.set_state(&mut slot, RunnerState::Idle);
                Ok(())
            }
            from => Err(LifecycleError::InvalidTransition {
                from,
                to: RunnerState::Idle,
            }),
        }
    }

    /// Load the interpreter with the configured packages.
    pub async fn initialize(&self) -> Result<SessionInfo, LifecycleError> {
        self.initialize_with(self.inner.config.packages.clone()).await
    }

    /// Load the interpreter with `packages`.
    ///
    /// `Idle → Loading → Ready`; on failure the runner returns to `Idle`
    /// with a fresh unstarted context. A queued run is started as soon as
    /// the session is ready.
    pub async fn initialize_with(&self, packages: PackageSet) -> Result<SessionInfo, LifecycleError> {
        let (generation, worker) = {
            let mut slot = self.inner.slot.lock();
            validate_transition(slot.state, RunnerState::Loading)?;
            let worker = match &slot.worker {
                Some(worker) => Arc::clone(worker),
                None => {
                    let worker = self.inner.spawn_worker();
                    slot.worker = Some(Arc::clone(&worker));
                    worker
                }
            };
            self.inner.set_state(&mut slot, RunnerState::Loading);
            (self.inner.generation(), worker)
        };

        let mut guard = AbandonGuard::new(&self.inner, generation, RunnerState::Loading);
        let result = worker.init(packages).await;
        guard.disarm();
        self.inner.finish_loading(generation, result)
    }

    /// Run `code` and wait for it to finish.
    ///
    /// Output of the previous run is cleared once this run is admitted; a
    /// rejected call leaves it untouched.
    ///
    /// An exception in user code is not an error: it is returned in
    /// [`RunOutcome::traceback`] and rendered into stderr.
    pub async fn run(&self, code: impl Into<String>) -> Result<RunOutcome, LifecycleError> {
        let code = code.into();
        let permit = match self.admit()? {
            Admission::Now(permit) => permit,
            Admission::Queued { ticket, initialize } => {
                if initialize && let Err(err) = self.initialize().await {
                    tracing::debug!(error = %err, "lazy initialization did not complete");
                }
                ticket.await.map_err(|_| LifecycleError::Interrupted)??
            }
        };

        let (outcome, ready) = self.execute(permit, code).await;
        if ready && self.inner.config.terminate_after_each_run {
            self.terminate();
        }
        outcome
    }

    fn admit(&self) -> Result<Admission, LifecycleError> {
        let lazy = self.inner.config.lazy_start;
        let mut slot = self.inner.slot.lock();
        match slot.state {
            RunnerState::Ready => self.inner.begin_run(&mut slot).map(Admission::Now),
            RunnerState::Loading if lazy => Ok(self.enqueue(&mut slot, false)),
            RunnerState::Idle | RunnerState::Terminated if lazy => {
                if slot.state == RunnerState::Terminated {
                    self.inner.teardown(&mut slot, true);
                    self.inner.set_state(&mut slot, RunnerState::Idle);
                }
                Ok(self.enqueue(&mut slot, true))
            }
            from @ (RunnerState::Running | RunnerState::AwaitingInput) => {
                Err(LifecycleError::InvalidTransition {
                    from,
                    to: RunnerState::Running,
                })
            }
            _ => Err(LifecycleError::NotReady),
        }
    }

    fn enqueue(&self, slot: &mut Slot, initialize: bool) -> Admission {
        // Last write wins: at most one run waits for loading to finish.
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = slot.queued.replace(tx) {
            tracing::debug!("queued run superseded");
            let _ = previous.send(Err(LifecycleError::Superseded));
        }
        Admission::Queued {
            ticket: rx,
            initialize,
        }
    }

    async fn execute(&self, permit: RunPermit, code: String) -> (Result<RunOutcome, LifecycleError>, bool) {
        let mut guard = AbandonGuard::new(&self.inner, permit.generation, RunnerState::Running);
        let watched: Vec<String> = self.inner.watched.lock().iter().cloned().collect();
        let worker = permit.worker;
        let work = async move {
            if !watched.is_empty() {
                worker.reload(watched).await?;
            }
            worker.run(code).await
        };

        let result = match self.inner.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, work).await.ok(),
            None => Some(work.await),
        };
        guard.disarm();
        self.inner.finish_run(permit.generation, result)
    }

    /// Destroy the context and return to `Idle` with a fresh unstarted one.
    ///
    /// Pending input requests of the session are discarded, captured output
    /// and any queued run are dropped. Safe to call in any state, repeatedly.
    pub fn interrupt(&self) {
        let mut slot = self.inner.slot.lock();
        self.inner.teardown(&mut slot, true);
        Inner::fail_queued(&mut slot, LifecycleError::Interrupted);
        self.inner.output.clear();
        self.inner.set_state(&mut slot, RunnerState::Idle);
        self.inner.events.emit(RunnerEvent::Interrupted);
        tracing::info!("execution interrupted");
    }

    /// Destroy the context for good; ends in `Terminated`.
    ///
    /// Output of the last run stays readable.
    pub fn terminate(&self) {
        let mut slot = self.inner.slot.lock();
        self.inner.teardown(&mut slot, false);
        Inner::fail_queued(&mut slot, LifecycleError::Interrupted);
        self.inner.set_state(&mut slot, RunnerState::Terminated);
        tracing::debug!("execution context terminated");
    }

    /// Answer the live session's outstanding input request.
    pub fn send_input(&self, value: impl Into<String>) -> Result<(), LifecycleError> {
        let session = self.session().ok_or(LifecycleError::NotReady)?;
        let request = self
            .inner
            .broker
            .outstanding_for(session.session_id)
            .into_iter()
            .next()
            .ok_or(LifecycleError::NoPendingInput)?;
        self.inner.broker.submit(request.request_id, value)?;
        Ok(())
    }

    /// Prompt of the live session's outstanding input request.
    pub fn prompt(&self) -> Option<String> {
        let session = self.session()?;
        self.inner
            .broker
            .outstanding_for(session.session_id)
            .into_iter()
            .next()
            .map(|request| request.prompt)
    }

    /// Whether the live session is blocked on input.
    pub fn is_awaiting_input(&self) -> bool {
        self.session()
            .is_some_and(|session| self.inner.broker.is_session_awaiting(session.session_id))
    }

    /// Reload these modules before every run, if imported.
    pub fn watch_modules<I, S>(&self, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .watched
            .lock()
            .extend(modules.into_iter().map(Into::into));
    }

    /// Stop reloading these modules.
    pub fn unwatch_modules<I, S>(&self, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut watched = self.inner.watched.lock();
        for module in modules {
            watched.shift_remove(module.as_ref());
        }
    }

    /// Watched modules in insertion order.
    pub fn watched_modules(&self) -> Vec<String> {
        self.inner.watched.lock().iter().cloned().collect()
    }

    fn live_worker(&self) -> Result<Arc<Worker>, LifecycleError> {
        let slot = self.inner.slot.lock();
        match (&slot.session, &slot.worker) {
            (Some(_), Some(worker)) => Ok(Arc::clone(worker)),
            _ => Err(LifecycleError::NotReady),
        }
    }

    /// Read a UTF-8 text file from the interpreter's file system.
    pub async fn read_file(&self, path: impl Into<String>) -> Result<String, LifecycleError> {
        Ok(self.live_worker()?.read_file(path).await?)
    }

    /// Write a UTF-8 text file to the interpreter's file system.
    pub async fn write_file(
        &self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        Ok(self.live_worker()?.write_file(path, contents).await?)
    }

    /// Create a directory in the interpreter's file system.
    pub async fn mkdir(&self, path: impl Into<String>) -> Result<(), LifecycleError> {
        Ok(self.live_worker()?.mkdir(path).await?)
    }

    /// Remove an empty directory from the interpreter's file system.
    pub async fn rmdir(&self, path: impl Into<String>) -> Result<(), LifecycleError> {
        Ok(self.live_worker()?.rmdir(path).await?)
    }
}
