//! Executor abstraction.
//!
//! The engine never creates threads or runtimes itself. Each machine spawns a
//! single worker task through an [`Executor`], and observers can ask for their
//! delivery task to run on a different one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Spawns tasks for the engine.
///
/// Tasks are admitted in the order they are spawned. The engine only ever
/// runs one task per machine for its internal work, so an executor does not
/// need to provide any serialization of its own.
pub trait Executor: Send + Sync {
    /// Spawns a detached task.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn(task)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn(task)
    }
}

/// Executor backed by a tokio runtime handle.
///
/// Under a runtime built with a paused clock (`#[tokio::test(start_paused =
/// true)]`) this behaves as a deterministic virtual-time executor.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Wraps an explicit runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Returns the underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }
}
