//! Replay-latest broadcasting of committed states.
//!
//! The broadcaster holds the last committed value and the list of live
//! subscribers behind one lock. Committing and subscribing both take that
//! lock, so a new subscriber sees the committed value exactly once and then
//! every later commit, and every subscriber sees the same sequence.

use crate::stream::StateStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Subscriber<S> {
    id: String,
    sender: mpsc::UnboundedSender<S>,
}

struct Inner<S> {
    latest: S,
    subscribers: Vec<Subscriber<S>>,
    closed: bool,
    commits: u64,
}

/// Multicast channel of committed states with replay of the latest value.
pub struct StateBroadcaster<S> {
    inner: Mutex<Inner<S>>,
}

impl<S: Clone> StateBroadcaster<S> {
    /// Creates a broadcaster with `initial` already committed.
    pub fn new(initial: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest: initial,
                subscribers: Vec::new(),
                closed: false,
                commits: 0,
            }),
        }
    }

    /// Registers a subscriber.
    ///
    /// The returned stream already holds the latest value. On a closed
    /// broadcaster the stream ends right after that value. Subscribers whose
    /// stream has been dropped are pruned.
    pub fn subscribe(&self) -> StateStream<S> {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        // Receiver is alive, cannot fail.
        let _ = sender.send(inner.latest.clone());
        if !inner.closed {
            inner.subscribers.retain(|s| !s.sender.is_closed());
            inner.subscribers.push(Subscriber {
                id: subscription_id.clone(),
                sender,
            });
        }

        StateStream::new(subscription_id, receiver)
    }

    /// Replaces the latest value and sends it to every subscriber.
    ///
    /// Returns false, without committing, if the broadcaster is closed.
    /// Subscribers whose stream has been dropped are pruned.
    pub fn commit(&self, state: S) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }

        inner.subscribers.retain(|s| s.sender.send(state.clone()).is_ok());
        inner.latest = state;
        inner.commits += 1;
        true
    }

    /// Returns the latest committed value, or `None` once closed.
    pub fn latest(&self) -> Option<S> {
        let inner = self.inner.lock();
        if inner.closed {
            None
        } else {
            Some(inner.latest.clone())
        }
    }
}

impl<S> StateBroadcaster<S> {
    /// Removes a subscriber. Returns true if it was registered.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != subscription_id);
        inner.subscribers.len() != before
    }

    /// Closes the broadcaster and ends every subscriber stream after the
    /// values already delivered to it.
    ///
    /// Returns true the first time it is called.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.subscribers.clear();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of commits since creation.
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}
