//! End-to-end tests of the routing engine against an in-memory hub
//!
//! Every connection attempt opens a fresh channel pair; the test plays the
//! hub on the far end, so traffic is observed exactly as the hub would see it.

use async_trait::async_trait;
use edgehub_core::{
    modules, AdapterFactory, ConnectionAdapter, EdgeHubConfig, EdgeHubResult, Message, MessageBus,
    TransportError,
};
use edgehub_runtime::{CycleState, LocalBus, RuntimeBuilder};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, Mutex},
    time::{timeout, Duration},
};
use tokio_util::sync::CancellationToken;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Edge side of one in-memory connection
struct ChannelAdapter {
    to_hub: mpsc::UnboundedSender<Message>,
    from_hub: Mutex<mpsc::UnboundedReceiver<Message>>,
    closed: CancellationToken,
}

#[async_trait]
impl ConnectionAdapter for ChannelAdapter {
    async fn send(&self, message: Message) -> EdgeHubResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        self.to_hub
            .send(message)
            .map_err(|_| TransportError::Closed.into())
    }

    async fn receive(&self) -> EdgeHubResult<Message> {
        let mut from_hub = self.from_hub.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed.into()),
            message = from_hub.recv() => message.ok_or_else(|| TransportError::Closed.into()),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Hub side of one in-memory connection
struct HubSession {
    to_edge: mpsc::UnboundedSender<Message>,
    from_edge: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
}

impl HubSession {
    /// Next message from the edge that is not a keepalive
    async fn next_request(&mut self) -> Message {
        loop {
            let message = timeout(Duration::from_secs(2), self.from_edge.recv())
                .await
                .expect("timed out waiting for edge traffic")
                .expect("connection closed");
            if message.operation() != modules::KEEPALIVE_OPERATION {
                return message;
            }
        }
    }

    /// Drop the connection from the hub side
    fn hang_up(self) {
        drop(self.to_edge);
    }
}

struct ChannelHub {
    sessions: mpsc::UnboundedSender<HubSession>,
}

#[async_trait]
impl AdapterFactory for ChannelHub {
    async fn connect(&self) -> EdgeHubResult<Arc<dyn ConnectionAdapter>> {
        let (to_hub, from_edge) = mpsc::unbounded_channel();
        let (to_edge, from_hub) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let _ = self.sessions.send(HubSession {
            to_edge,
            from_edge,
            closed: closed.clone(),
        });
        Ok(Arc::new(ChannelAdapter {
            to_hub,
            from_hub: Mutex::new(from_hub),
            closed,
        }))
    }
}

fn edge_bus(config: &EdgeHubConfig) -> LocalBus {
    let bus = RuntimeBuilder::local_bus(config);
    bus.add_module_group("metamanager", modules::META_GROUP);
    bus.add_module_group("devicetwin", modules::TWIN_GROUP);
    bus
}

async fn next_session(sessions: &mut mpsc::UnboundedReceiver<HubSession>) -> HubSession {
    timeout(Duration::from_secs(2), sessions.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("factory dropped")
}

/// Next message for `module`, skipping connection notices
async fn next_for(bus: &LocalBus, module: &str) -> Message {
    loop {
        let message = timeout(Duration::from_secs(2), bus.receive(module))
            .await
            .expect("timed out waiting for local delivery")
            .expect("bus receive failed");
        if message.resource() != modules::CONNECTION_RESOURCE {
            return message;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_keepalive_is_first_on_every_connection() {
    let config = EdgeHubConfig::testing();
    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    let mut handle = RuntimeBuilder::new(config.clone())
        .with_adapter_factory(Arc::new(ChannelHub { sessions: sessions_tx }))
        .with_bus(Arc::new(edge_bus(&config)))
        .build_and_start()
        .unwrap();

    let mut session = next_session(&mut sessions).await;
    let first = timeout(Duration::from_secs(1), session.from_edge.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.operation(), "keepalive");
    assert_eq!(first.resource(), "node");
    assert_eq!(first.content().as_str(), Some("ping"));

    handle.shutdown().await.unwrap();
    assert!(session.closed.is_cancelled());
}

#[tokio::test]
async fn test_hub_message_reaches_mapped_module() {
    let config = EdgeHubConfig::testing();
    let bus = edge_bus(&config);
    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    let mut handle = RuntimeBuilder::new(config)
        .with_adapter_factory(Arc::new(ChannelHub { sessions: sessions_tx }))
        .with_bus(Arc::new(bus.clone()))
        .build_and_start()
        .unwrap();

    let session = next_session(&mut sessions).await;
    let update = Message::new().build_router("devicecontroller", "twin", "device/dht11", "update");
    session.to_edge.send(update.clone()).unwrap();

    let delivered = next_for(&bus, "devicetwin").await;
    assert_eq!(delivered.id(), update.id());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sync_request_round_trip() {
    let config = EdgeHubConfig::testing();
    let bus = edge_bus(&config);
    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    let mut handle = RuntimeBuilder::new(config)
        .with_adapter_factory(Arc::new(ChannelHub { sessions: sessions_tx }))
        .with_bus(Arc::new(bus.clone()))
        .build_and_start()
        .unwrap();

    let mut session = next_session(&mut sessions).await;

    let request = Message::new()
        .with_sync(true)
        .build_router("metamanager", "resource", "default/configmap/a", "query");
    bus.send(modules::EDGE_HUB_MODULE, request.clone()).unwrap();

    let seen = session.next_request().await;
    assert_eq!(seen.id(), request.id());
    assert!(handle.correlator().is_sync_response(request.id()));

    let response = Message::new_response(&seen)
        .build_router("controller", "resource", "default/configmap/a", "response")
        .fill_content("data");
    session.to_edge.send(response).unwrap();

    let returned = next_for(&bus, "metamanager").await;
    assert_eq!(returned.parent_id(), Some(request.id()));
    assert_eq!(returned.content().as_str(), Some("data"));
    assert_eq!(handle.correlator().pending(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_hub_hangs_up() {
    let config = EdgeHubConfig::testing();
    let bus = edge_bus(&config);
    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    let mut handle = RuntimeBuilder::new(config)
        .with_adapter_factory(Arc::new(ChannelHub { sessions: sessions_tx }))
        .with_bus(Arc::new(bus.clone()))
        .build_and_start()
        .unwrap();

    let first = next_session(&mut sessions).await;
    let first_closed = first.closed.clone();
    first.hang_up();

    let mut second = next_session(&mut sessions).await;
    assert!(first_closed.is_cancelled());
    assert!(
        handle
            .wait_for_state(CycleState::Connected, Duration::from_secs(1))
            .await
    );
    assert_eq!(handle.cycles(), 2);

    // Traffic flows over the new connection
    let notice = Message::new().build_router("metamanager", "resource", "pod/a", "update");
    bus.send(modules::EDGE_HUB_MODULE, notice.clone()).unwrap();
    assert_eq!(second.next_request().await.id(), notice.id());

    // Modules saw connect, disconnect, connect
    let mut operations = Vec::new();
    while let Some(message) = bus.try_receive("devicetwin").unwrap() {
        operations.push(message.operation().to_string());
    }
    assert_eq!(operations, vec!["connect", "disconnect", "connect"]);

    handle.shutdown().await.unwrap();
}
