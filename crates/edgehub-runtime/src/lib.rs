//! EdgeHub Runtime Engine
//!
//! This crate contains the routing engine for the EdgeHub connectivity
//! agent, including:
//! - `ReconnectSupervisor`: owns the connection lifecycle and restarts it on
//!   failure
//! - The inbound, outbound and keepalive loops run in each connected cycle
//! - `SyncCorrelator`: matches hub responses to pending synchronous requests
//! - `RateLimiter`: token bucket pacing outbound traffic
//! - `LocalBus`: in-process message bus for local modules
//!
//! `edgehub-core` provides the message model, errors and the capability
//! traits this engine is written against.

pub mod builder;
pub mod bus;
pub mod correlator;
pub mod dispatcher;
pub mod rate_limiter;
pub mod sender;
pub mod state;
pub mod supervisor;
pub mod tasks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::RuntimeBuilder;
pub use bus::LocalBus;
pub use correlator::{SyncCorrelator, SyncWaiter};
pub use dispatcher::Dispatcher;
pub use rate_limiter::RateLimiter;
pub use sender::GuardedSender;
pub use state::{CycleEvent, CycleState};
pub use supervisor::{ReconnectSupervisor, SupervisorHandle};
pub use tasks::{
    keepalive_message, FailureReporter, FailureSignal, InboundTask, KeepaliveTask, LoopKind,
    OutboundTask,
};

// Re-export core types for convenience
pub use edgehub_core::{
    modules, AdapterFactory, ConnectionAdapter, EdgeHubConfig, EdgeHubError, EdgeHubResult,
    Message, MessageBus,
};
