//! Subscriber side of a state machine's broadcast.

use crate::executor::Executor;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// A live subscription to committed states.
///
/// The first item is the state that was committed when the subscription was
/// made; every later commit follows in commit order. The stream ends after
/// the machine is disposed and the buffered values have been drained.
/// Dropping the stream cancels the subscription; the broadcaster releases
/// its sender on the next subscribe or commit.
pub struct StateStream<S> {
    id: String,
    receiver: mpsc::UnboundedReceiver<S>,
}

impl<S> StateStream<S> {
    pub(crate) fn new(id: String, receiver: mpsc::UnboundedReceiver<S>) -> Self {
        Self { id, receiver }
    }

    /// Returns the subscription ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next committed state.
    ///
    /// Returns `None` once the machine is disposed and nothing is buffered.
    pub async fn recv(&mut self) -> Option<S> {
        self.receiver.recv().await
    }

    /// Returns the next buffered state without waiting.
    pub fn try_recv(&mut self) -> Option<S> {
        self.receiver.try_recv().ok()
    }

    /// Drains every buffered state without waiting.
    pub fn drain(&mut self) -> Vec<S> {
        let mut states = Vec::new();
        while let Some(state) = self.try_recv() {
            states.push(state);
        }
        states
    }

    /// Returns true when no more states will ever arrive.
    pub fn is_terminated(&self) -> bool {
        self.receiver.is_closed() && self.receiver.is_empty()
    }
}

impl<S: Send + 'static> StateStream<S> {
    /// Delivers every state to `callback` on a task spawned by `executor`.
    ///
    /// States reach the callback in commit order. Delivery stops when the
    /// stream ends or the returned handle is cancelled or dropped.
    pub fn deliver_on<E, F>(mut self, executor: &E, mut callback: F) -> DeliveryHandle
    where
        E: Executor + ?Sized,
        F: FnMut(S) + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let subscription_id = self.id.clone();

        executor.spawn(Box::pin(async move {
            // Cleared when the handle is detached: the sender is then dropped
            // without a signal.
            let mut cancellable = true;
            loop {
                tokio::select! {
                    biased;

                    signal = &mut cancel_rx, if cancellable => {
                        if signal.is_ok() {
                            tracing::trace!("Delivery for {} cancelled", subscription_id);
                            break;
                        }
                        cancellable = false;
                    }
                    state = self.recv() => match state {
                        Some(state) => callback(state),
                        None => break,
                    },
                }
            }
            done.store(true, Ordering::SeqCst);
        }));

        DeliveryHandle {
            cancel: Some(cancel_tx),
            finished,
        }
    }
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.receiver.poll_recv(cx)
    }
}

impl<S> std::fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStream")
            .field("id", &self.id)
            .field("buffered", &self.receiver.len())
            .finish()
    }
}

/// Handle to a delivery task started by [`StateStream::deliver_on`].
///
/// Dropping the handle cancels delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    cancel: Option<oneshot::Sender<()>>,
    finished: Arc<AtomicBool>,
}

impl DeliveryHandle {
    /// Stops delivery. States already handed to the callback are unaffected.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Returns true once the delivery task has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Keeps delivery running for as long as the stream lives.
    pub fn detach(mut self) {
        drop(self.cancel.take());
    }
}

impl Drop for DeliveryHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
