//! Connection cycle state machine
//!
//! One reconnect cycle moves through
//! `Disconnected → Connecting → Connected → TearingDown → Disconnected`,
//! with `Connecting → Disconnected` when establishment fails. The routing
//! loops may only run while `Connected`.

use edgehub_core::StateTransitionError;
use std::fmt;

/// Lifecycle state of the hub connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    Disconnected,
    Connecting,
    Connected,
    TearingDown,
}

/// Inputs driving the cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// Supervisor begins a connection attempt
    StartConnecting,
    /// Adapter established and loops launched
    Established,
    /// Adapter could not be established
    EstablishFailed,
    /// A loop reported a connection failure
    FailureSignaled,
    /// Shutdown requested while connected
    ShutdownRequested,
    /// Adapter closed and loops joined
    TornDown,
}

impl CycleState {
    /// Apply `event`, returning the next state or rejecting an illegal move
    pub fn transition(self, event: CycleEvent) -> Result<CycleState, StateTransitionError> {
        use CycleEvent::*;
        use CycleState::*;

        match (self, event) {
            (Disconnected, StartConnecting) => Ok(Connecting),
            (Connecting, Established) => Ok(Connected),
            (Connecting, EstablishFailed) => Ok(Disconnected),
            (Connected, FailureSignaled) => Ok(TearingDown),
            (Connected, ShutdownRequested) => Ok(TearingDown),
            (TearingDown, TornDown) => Ok(Disconnected),
            (from, event) => Err(StateTransitionError {
                from: from.to_string(),
                event: format!("{:?}", event),
            }),
        }
    }

    /// Whether the routing loops may run in this state
    pub fn loops_may_run(self) -> bool {
        self == CycleState::Connected
    }

    pub fn name(self) -> &'static str {
        match self {
            CycleState::Disconnected => "Disconnected",
            CycleState::Connecting => "Connecting",
            CycleState::Connected => "Connected",
            CycleState::TearingDown => "TearingDown",
        }
    }
}

impl Default for CycleState {
    fn default() -> Self {
        CycleState::Disconnected
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
