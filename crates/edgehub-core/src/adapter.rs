//! Connection Adapter Trait Definitions
//!
//! Defines the capability the routing engine consumes to talk to the hub.
//! Concrete implementations live in their own crates (the WebSocket adapter in
//! `edgehub-cli`, scriptable doubles behind the `testing` feature of
//! `edgehub-runtime`).

use crate::{EdgeHubResult, Message};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Connection Adapter
// ----------------------------------------------------------------------------

/// One persistent, authenticated connection to the hub
///
/// ## Concurrency
///
/// The engine calls `receive` from the inbound loop while `send` may be called
/// from the outbound and keepalive loops. Implementations must tolerate a
/// `receive` running concurrently with a `send`, but are NOT required to
/// tolerate two concurrent `send` calls: the engine serializes sends itself.
///
/// ## Lifecycle
///
/// `close` releases the connection. Any `send` or `receive` pending at that
/// point, or issued afterwards, must fail with a transport error rather than
/// block forever.
#[async_trait::async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Write one message to the hub
    async fn send(&self, message: Message) -> EdgeHubResult<()>;

    /// Read the next message from the hub
    async fn receive(&self) -> EdgeHubResult<Message>;

    /// Release the connection; idempotent
    async fn close(&self);
}

// ----------------------------------------------------------------------------
// Adapter Factory
// ----------------------------------------------------------------------------

/// Establishes fresh connections for the reconnect supervisor
///
/// Each call must re-read TLS material so rotated credentials take effect on
/// the next attempt.
#[async_trait::async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn connect(&self) -> EdgeHubResult<Arc<dyn ConnectionAdapter>>;
}
