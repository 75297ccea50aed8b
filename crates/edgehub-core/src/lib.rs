//! EdgeHub Core
//!
//! Foundational types for the EdgeHub connectivity agent: the message model,
//! the error taxonomy, configuration, and the capability traits through which
//! the routing engine reaches the hub connection and the local bus.
//!
//! The engine itself lives in `edgehub-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod adapter;
pub mod bus;
pub mod config;
pub mod errors;
pub mod message;
pub mod modules;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use adapter::{AdapterFactory, ConnectionAdapter};
pub use bus::MessageBus;
pub use config::{EdgeHubConfig, ReconnectPolicy};
pub use errors::{
    BusError, CorrelationError, DispatchError, EdgeHubError, EdgeHubResult, Result,
    StateTransitionError, TransportError,
};
pub use message::{Message, MessageHeader, MessageRouter};
