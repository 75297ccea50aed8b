//! Local message bus capability
//!
//! Other components on the node talk to the hub through a publish/subscribe
//! bus keyed by module groups. The engine only needs three operations.

use crate::{EdgeHubResult, Message};

#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `message` to every module of `group` without blocking
    fn publish(&self, group: &str, message: Message) -> EdgeHubResult<()>;

    /// Deliver `message` to a single module without blocking
    fn send(&self, module: &str, message: Message) -> EdgeHubResult<()>;

    /// Wait for the next message addressed to `module`
    async fn receive(&self, module: &str) -> EdgeHubResult<Message>;
}
