//! Message Model
//!
//! The unit of traffic exchanged between the edge node and the hub. A message
//! is built once through consuming builder methods and is immutable afterwards:
//! correlation and routing only ever read it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ----------------------------------------------------------------------------
// Header and Router
// ----------------------------------------------------------------------------

/// Identity and delivery semantics of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique per logical request
    #[serde(rename = "msg_id")]
    id: String,
    /// Set on a response, references the request it answers
    #[serde(
        rename = "parent_msg_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    parent_id: Option<String>,
    /// Unix timestamp in milliseconds
    timestamp: i64,
    /// Whether the sender expects exactly one correlated response
    #[serde(default)]
    sync: bool,
}

/// Routing metadata of a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRouter {
    /// Module that produced the message
    #[serde(default)]
    source: String,
    /// Destination module group
    #[serde(default)]
    group: String,
    /// Operation applied to the resource
    #[serde(default)]
    operation: String,
    /// Resource path the operation targets
    #[serde(default)]
    resource: String,
}

impl MessageRouter {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A control or telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    header: MessageHeader,
    #[serde(rename = "route")]
    router: MessageRouter,
    #[serde(default)]
    content: serde_json::Value,
}

impl Message {
    /// Create a message with a fresh identifier and the current timestamp
    pub fn new() -> Self {
        Self {
            header: MessageHeader {
                id: uuid::Uuid::new_v4().to_string(),
                parent_id: None,
                timestamp: now_millis(),
                sync: false,
            },
            router: MessageRouter::default(),
            content: serde_json::Value::Null,
        }
    }

    /// Create a response to `request`, carrying its identifier as parent and
    /// its routing metadata
    pub fn new_response(request: &Message) -> Self {
        Self::new()
            .with_parent_id(request.id())
            .with_router(request.router.clone())
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.header.id = id.into();
        self
    }

    /// Mark this message as the response to the message identified by `parent_id`
    ///
    /// An empty identifier clears the parent.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        let parent_id = parent_id.into();
        self.header.parent_id = if parent_id.is_empty() {
            None
        } else {
            Some(parent_id)
        };
        self
    }

    /// Flag the message as a synchronous request
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.header.sync = sync;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    /// Set the routing metadata
    pub fn build_router(
        mut self,
        source: impl Into<String>,
        group: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        self.router = MessageRouter {
            source: source.into(),
            group: group.into(),
            operation: operation.into(),
            resource: resource.into(),
        };
        self
    }

    fn with_router(mut self, router: MessageRouter) -> Self {
        self.router = router;
        self
    }

    /// Attach the payload
    pub fn fill_content(mut self, content: impl Into<serde_json::Value>) -> Self {
        self.content = content.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    /// Parent identifier; an empty value on the wire counts as absent
    pub fn parent_id(&self) -> Option<&str> {
        self.header.parent_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_sync(&self) -> bool {
        self.header.sync
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn source(&self) -> &str {
        &self.router.source
    }

    pub fn group(&self) -> &str {
        &self.router.group
    }

    pub fn operation(&self) -> &str {
        &self.router.operation
    }

    pub fn resource(&self) -> &str {
        &self.router.resource
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    /// Whether this message answers an earlier synchronous request
    pub fn is_response(&self) -> bool {
        self.parent_id().is_some()
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageID: {}, ParentID: {}, Source: {}, Group: {}, Operation: {}, Resource: {}",
            self.header.id,
            self.header.parent_id.as_deref().unwrap_or(""),
            self.router.source,
            self.router.group,
            self.router.operation,
            self.router.resource,
        )
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
