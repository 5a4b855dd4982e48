//! # ridestate-core
//!
//! Reactive state machine engine for ridestate.
//!
//! This crate provides:
//! - A single-writer state machine over a caller-defined state type
//! - Synchronous and asynchronous transitions evaluated in FIFO order
//! - Replay-latest multicast observation of committed states
//! - Pluggable executor and failure logger collaborators

pub mod broadcast;
pub mod config;
pub mod error;
pub mod executor;
pub mod logger;
pub mod machine;
pub mod stream;

pub use config::MachineConfig;
pub use error::{MachineError, TransitionError};
pub use executor::{BoxFuture, Executor, TokioExecutor};
pub use logger::{
    FailureKind, LoggedFailure, MemoryLogger, NoopLogger, TracingLogger, TransitionFailure,
    TransitionLogger,
};
pub use machine::{
    EnginePhase, MachineStats, StateMachine, StateMachineBuilder, TransitionContext,
};
pub use stream::{DeliveryHandle, StateStream};
