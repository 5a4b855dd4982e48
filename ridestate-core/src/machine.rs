//! State machine engine - serialized transitions over a single committed state.
//!
//! Each [`StateMachine`] owns one worker task, spawned on the executor given
//! at construction. Submissions are queued FIFO and the worker evaluates them
//! one at a time against the state committed at their turn. An asynchronous
//! transition keeps the worker busy until its operation resolves, so no two
//! operations ever race to commit on top of the same stale state.

use crate::broadcast::StateBroadcaster;
use crate::config::MachineConfig;
use crate::error::{MachineError, TransitionError};
use crate::executor::{BoxFuture, Executor};
use crate::logger::{FailureKind, TracingLogger, TransitionFailure, TransitionLogger};
use crate::stream::StateStream;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

tokio::task_local! {
    /// Machine whose transition closure is running on the current task.
    static EVALUATING: Uuid;
}

/// Describes where a transition came from, for failure logs.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    label: Option<Cow<'static, str>>,
    location: &'static Location<'static>,
}

impl TransitionContext {
    /// Context with an explicit label.
    #[track_caller]
    pub fn labeled(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            label: Some(label.into()),
            location: Location::caller(),
        }
    }

    /// Context identified by the caller's source location.
    #[track_caller]
    pub fn at_caller() -> Self {
        Self {
            label: None,
            location: Location::caller(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for TransitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => f.write_str(label),
            None => write!(f, "{}:{}", self.location.file(), self.location.line()),
        }
    }
}

/// Lifecycle of the engine itself (not of the caller's state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No transition is being evaluated.
    Idle,
    /// A transition closure or its awaited operation is in progress.
    Processing,
    /// Torn down. Terminal.
    Disposed,
}

/// Machine statistics.
#[derive(Debug, Default)]
pub struct MachineStats {
    /// Transitions accepted into the queue.
    pub submitted: AtomicU64,
    /// Transitions whose result was committed.
    pub committed: AtomicU64,
    /// Transitions rejected by their closure.
    pub rejected: AtomicU64,
    /// Async transitions whose operation failed.
    pub failed: AtomicU64,
    /// Results dropped because the machine was disposed first.
    pub discarded: AtomicU64,
    /// Requests waiting for the worker. Back to zero once a disposed
    /// machine's worker has stopped.
    pub queue_depth: AtomicU64,
}

type SyncFn<S> = Box<dyn FnOnce(&S) -> Result<S, TransitionError> + Send>;
type AsyncFn<S> = Box<
    dyn FnOnce(&S) -> Result<BoxFuture<'static, Result<S, TransitionError>>, TransitionError>
        + Send,
>;

enum Request<S> {
    Sync {
        context: TransitionContext,
        apply: SyncFn<S>,
    },
    Async {
        context: TransitionContext,
        start: AsyncFn<S>,
    },
    Flush(oneshot::Sender<()>),
}

struct Shared<S> {
    id: Uuid,
    config: MachineConfig,
    broadcaster: StateBroadcaster<S>,
    logger: Arc<dyn TransitionLogger>,
    stats: MachineStats,
    processing: AtomicBool,
}

impl<S> Shared<S> {
    fn disposed(&self) -> MachineError {
        MachineError::Disposed {
            machine: self.config.name.clone(),
        }
    }
}

/// Builder for [`StateMachine`].
pub struct StateMachineBuilder<S> {
    initial: S,
    config: MachineConfig,
    logger: Arc<dyn TransitionLogger>,
}

impl<S> StateMachineBuilder<S>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            config: MachineConfig::default(),
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransitionLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Creates the machine and spawns its worker on `executor`.
    pub fn build<E: Executor + ?Sized>(self, executor: &E) -> StateMachine<S> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            config: self.config,
            broadcaster: StateBroadcaster::new(self.initial),
            logger: self.logger,
            stats: MachineStats::default(),
            processing: AtomicBool::new(false),
        });

        let worker = Worker {
            shared: shared.clone(),
            requests: requests_rx,
            shutdown: shutdown_rx,
        };
        executor.spawn(Box::pin(worker.run()));

        tracing::debug!(machine = %shared.config.name, "State machine created");

        StateMachine {
            shared,
            requests: requests_tx,
            shutdown: shutdown_tx,
        }
    }
}

/// A reactive state machine over a caller-defined state type.
///
/// The machine never inspects `S`. Callers decide whether a transition is
/// valid by returning [`TransitionError::InvalidStateTransition`] from the
/// closure; the engine logs the rejection and leaves the state untouched.
///
/// Dropping the machine disposes it.
pub struct StateMachine<S> {
    shared: Arc<Shared<S>>,
    requests: mpsc::UnboundedSender<Request<S>>,
    shutdown: broadcast::Sender<()>,
}

impl<S> StateMachine<S>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Creates a machine with `initial` committed, logging through `tracing`.
    pub fn new<E: Executor + ?Sized>(initial: S, executor: &E) -> Self {
        StateMachineBuilder::new(initial).build(executor)
    }

    pub fn builder(initial: S) -> StateMachineBuilder<S> {
        StateMachineBuilder::new(initial)
    }

    /// Subscribes to committed states.
    ///
    /// The stream yields the current state first, then every later commit.
    pub fn observe(&self) -> StateStream<S> {
        self.shared.broadcaster.subscribe()
    }

    /// Returns the last committed state without waiting.
    pub fn current_state(&self) -> Result<S, MachineError> {
        self.shared
            .broadcaster
            .latest()
            .ok_or_else(|| self.shared.disposed())
    }

    /// Submits a synchronous transition.
    ///
    /// `f` runs on the worker with the state committed at its turn in the
    /// queue. Its failure is logged with the caller's source location.
    #[track_caller]
    pub fn transition<F>(&self, f: F) -> Result<(), MachineError>
    where
        F: FnOnce(&S) -> Result<S, TransitionError> + Send + 'static,
    {
        self.submit(Request::Sync {
            context: TransitionContext::at_caller(),
            apply: Box::new(f),
        })
    }

    /// Submits a synchronous transition logged under `label`.
    #[track_caller]
    pub fn transition_as<F>(
        &self,
        label: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Result<(), MachineError>
    where
        F: FnOnce(&S) -> Result<S, TransitionError> + Send + 'static,
    {
        self.submit(Request::Sync {
            context: TransitionContext::labeled(label),
            apply: Box::new(f),
        })
    }

    /// Submits an asynchronous transition.
    ///
    /// `f` runs on the worker with the state committed at its turn. It may
    /// reject synchronously by returning `Err`, or start an operation by
    /// returning its future. No other transition is evaluated until that
    /// future resolves.
    #[track_caller]
    pub fn async_transition<F, Fut>(&self, f: F) -> Result<(), MachineError>
    where
        F: FnOnce(&S) -> Result<Fut, TransitionError> + Send + 'static,
        Fut: Future<Output = Result<S, TransitionError>> + Send + 'static,
    {
        self.submit(Request::Async {
            context: TransitionContext::at_caller(),
            start: box_async(f),
        })
    }

    /// Submits an asynchronous transition logged under `label`.
    #[track_caller]
    pub fn async_transition_as<F, Fut>(
        &self,
        label: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Result<(), MachineError>
    where
        F: FnOnce(&S) -> Result<Fut, TransitionError> + Send + 'static,
        Fut: Future<Output = Result<S, TransitionError>> + Send + 'static,
    {
        self.submit(Request::Async {
            context: TransitionContext::labeled(label),
            start: box_async(f),
        })
    }

    /// Waits until every transition submitted before this call has been
    /// evaluated.
    ///
    /// Must not be awaited from inside one of this machine's own
    /// transitions: the worker would wait on itself.
    pub async fn flush(&self) -> Result<(), MachineError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Request::Flush(done_tx))?;
        done_rx.await.map_err(|_| self.shared.disposed())
    }

    /// Tears the machine down.
    ///
    /// Queued transitions are dropped, subscriber streams end after their
    /// buffered values, and the result of an outstanding async transition is
    /// discarded when it arrives. The operation itself is not cancelled.
    pub fn dispose(&self) {
        if self.shared.broadcaster.close() {
            let _ = self.shutdown.send(());
            tracing::debug!(machine = %self.shared.config.name, "State machine disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.broadcaster.is_closed()
    }

    pub fn phase(&self) -> EnginePhase {
        if self.is_disposed() {
            EnginePhase::Disposed
        } else if self.shared.processing.load(Ordering::SeqCst) {
            EnginePhase::Processing
        } else {
            EnginePhase::Idle
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &MachineConfig {
        &self.shared.config
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.broadcaster.subscriber_count()
    }

    pub fn stats(&self) -> &MachineStats {
        &self.shared.stats
    }

    fn submit(&self, request: Request<S>) -> Result<(), MachineError> {
        self.enqueue(request)?;
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enqueue(&self, request: Request<S>) -> Result<(), MachineError> {
        self.assert_not_reentrant();

        if self.is_disposed() {
            return Err(self.shared.disposed());
        }

        let stats = &self.shared.stats;
        let depth = stats.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.requests.send(request).is_err() {
            stats.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(self.shared.disposed());
        }

        if self.shared.config.exceeds_queue_threshold(depth as usize) {
            tracing::warn!(
                machine = %self.shared.config.name,
                depth,
                "Transition queue above warning threshold"
            );
        }
        Ok(())
    }

    /// Submitting from inside a closure breaks the single-writer contract.
    fn assert_not_reentrant(&self) {
        if cfg!(debug_assertions) {
            let reentrant = EVALUATING
                .try_with(|id| *id == self.shared.id)
                .unwrap_or(false);
            if reentrant {
                panic!(
                    "state machine '{}': transition submitted from inside one of its own transitions",
                    self.shared.config.name
                );
            }
        }
    }
}

impl<S> Drop for StateMachine<S> {
    fn drop(&mut self) {
        if self.shared.broadcaster.close() {
            let _ = self.shutdown.send(());
            tracing::debug!(machine = %self.shared.config.name, "State machine dropped");
        }
    }
}

impl<S> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.shared.config.name)
            .field("disposed", &self.shared.broadcaster.is_closed())
            .field("subscribers", &self.shared.broadcaster.subscriber_count())
            .finish()
    }
}

fn box_async<S, F, Fut>(f: F) -> AsyncFn<S>
where
    F: FnOnce(&S) -> Result<Fut, TransitionError> + Send + 'static,
    Fut: Future<Output = Result<S, TransitionError>> + Send + 'static,
{
    Box::new(move |state: &S| {
        f(state).map(|operation| Box::pin(operation) as BoxFuture<'static, _>)
    })
}

/// Drains the request queue, one transition at a time.
struct Worker<S> {
    shared: Arc<Shared<S>>,
    requests: mpsc::UnboundedReceiver<Request<S>>,
    shutdown: broadcast::Receiver<()>,
}

impl<S> Worker<S>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
{
    async fn run(mut self) {
        let name = self.shared.config.name.clone();
        tracing::trace!(machine = %name, "Worker started");

        loop {
            let request = tokio::select! {
                biased;

                _ = self.shutdown.recv() => break,
                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.shared.stats.queue_depth.fetch_sub(1, Ordering::SeqCst);

            if !self.shared.process(request).await {
                break;
            }
        }

        // Pending flush waiters see their sender dropped.
        self.requests.close();
        let mut dropped = 0;
        while self.requests.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            self.shared
                .stats
                .queue_depth
                .fetch_sub(dropped, Ordering::SeqCst);
            tracing::debug!(machine = %name, dropped, "Dropped queued requests on dispose");
        }
        tracing::trace!(machine = %name, "Worker stopped");
    }
}

impl<S> Shared<S>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Evaluates one request. Returns false once the machine is disposed.
    async fn process(&self, request: Request<S>) -> bool {
        let Some(current) = self.broadcaster.latest() else {
            return false;
        };

        match request {
            Request::Flush(done) => {
                let _ = done.send(());
            }
            Request::Sync { context, apply } => {
                self.processing.store(true, Ordering::SeqCst);
                let outcome = EVALUATING.sync_scope(self.id, || apply(&current));
                self.settle(&context, outcome, FailureKind::Rejected);
                self.processing.store(false, Ordering::SeqCst);
            }
            Request::Async { context, start } => {
                self.processing.store(true, Ordering::SeqCst);
                let started = EVALUATING.sync_scope(self.id, || start(&current));
                match started {
                    Err(error) => self.report(&context, FailureKind::Rejected, &error),
                    Ok(operation) => {
                        tracing::trace!(
                            machine = %self.config.name,
                            transition = %context,
                            "Awaiting async transition"
                        );
                        let outcome = operation.await;

                        if self.broadcaster.is_closed() {
                            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                machine = %self.config.name,
                                transition = %context,
                                "Discarding async result after disposal"
                            );
                            return false;
                        }
                        self.settle(&context, outcome, FailureKind::OperationFailed);
                    }
                }
                self.processing.store(false, Ordering::SeqCst);
            }
        }

        true
    }

    fn settle(
        &self,
        context: &TransitionContext,
        outcome: Result<S, TransitionError>,
        failure_kind: FailureKind,
    ) {
        match outcome {
            Ok(next) => {
                tracing::trace!(
                    machine = %self.config.name,
                    transition = %context,
                    state = ?next,
                    "Committing state"
                );
                if self.broadcaster.commit(next) {
                    self.stats.committed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(error) => self.report(context, failure_kind, &error),
        }
    }

    fn report(&self, context: &TransitionContext, kind: FailureKind, error: &TransitionError) {
        let counter = match kind {
            FailureKind::Rejected => &self.stats.rejected,
            FailureKind::OperationFailed => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.logger.transition_failed(&TransitionFailure {
            machine: &self.config.name,
            context,
            kind,
            error,
        });
    }
}
