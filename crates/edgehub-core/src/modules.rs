//! Module and group names on the local bus

use std::collections::HashMap;

/// Name of the hub's own module; its inbox carries outbound traffic
pub const EDGE_HUB_MODULE: &str = "edgehub";

pub const META_GROUP: &str = "meta";
pub const TWIN_GROUP: &str = "twin";
pub const BUS_GROUP: &str = "bus";
pub const EDGED_GROUP: &str = "edged";

/// Inbound message groups as sent by the hub
pub const RESOURCE_GROUP: &str = "resource";
pub const FUNC_GROUP: &str = "func";
pub const USER_GROUP: &str = "user";

/// Heartbeat routing
pub const KEEPALIVE_RESOURCE: &str = "node";
pub const KEEPALIVE_OPERATION: &str = "keepalive";
pub const KEEPALIVE_CONTENT: &str = "ping";

/// Connection status notifications
pub const CONNECTION_RESOURCE: &str = "node/connection";
pub const CONNECT_OPERATION: &str = "connect";
pub const DISCONNECT_OPERATION: &str = "disconnect";
pub const CLOUD_CONNECTED: &str = "cloud_connected";
pub const CLOUD_DISCONNECTED: &str = "cloud_disconnected";

/// Default inbound group to bus group table
pub fn default_group_routes() -> HashMap<String, String> {
    [
        (RESOURCE_GROUP, META_GROUP),
        (FUNC_GROUP, META_GROUP),
        (TWIN_GROUP, TWIN_GROUP),
        (USER_GROUP, BUS_GROUP),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}
