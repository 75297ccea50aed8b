//! Inbound message classification
//!
//! Decides where a message arriving from the hub goes: to the waiter of a
//! pending synchronous request, or onto the local bus group mapped from the
//! message's group.

use crate::correlator::SyncCorrelator;
use edgehub_core::{EdgeHubError, EdgeHubResult, Message, MessageBus};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, trace};

/// Routes hub messages to local recipients
#[derive(Clone)]
pub struct Dispatcher {
    correlator: SyncCorrelator,
    bus: Arc<dyn MessageBus>,
    routes: Arc<HashMap<String, String>>,
}

impl Dispatcher {
    pub fn new(
        correlator: SyncCorrelator,
        bus: Arc<dyn MessageBus>,
        routes: HashMap<String, String>,
    ) -> Self {
        Self {
            correlator,
            bus,
            routes: Arc::new(routes),
        }
    }

    /// Whether `parent_id` names a request someone is still waiting on
    pub fn is_sync_response(&self, parent_id: &str) -> bool {
        self.correlator.is_sync_response(parent_id)
    }

    /// Local bus group for an inbound message group
    pub fn route_for(&self, group: &str) -> Option<&str> {
        self.routes.get(group).map(String::as_str)
    }

    /// Deliver one inbound message
    ///
    /// A response to a pending request goes to its waiter. Anything else is
    /// published to the bus group mapped from its group; an unmapped group
    /// yields [`DispatchError::NoHandler`](edgehub_core::DispatchError). A
    /// response nobody waits for any more is dropped.
    pub fn dispatch(&self, message: Message) -> EdgeHubResult<()> {
        if let Some(parent_id) = message.parent_id() {
            if self.is_sync_response(parent_id) {
                trace!("Delivering sync response {} to its waiter", message.id());
                if !self.correlator.deliver(message) {
                    debug!("Waiter gave up before its response could be delivered");
                }
                return Ok(());
            }
        }

        let Some(target) = self.route_for(message.group()) else {
            return Err(EdgeHubError::no_handler(message.group()));
        };

        if message.is_response() {
            debug!(
                "Dropping response {} to message {:?}, nobody is waiting",
                message.id(),
                message.parent_id()
            );
            return Ok(());
        }

        trace!(
            "Publishing message {} from group {} to bus group {}",
            message.id(),
            message.group(),
            target
        );
        self.bus.publish(target, message)
    }
}
