//! Reconnect Supervisor
//!
//! Owns the connection lifecycle. Each cycle:
//! - establishes an adapter through the factory (bounded by the handshake
//!   timeout)
//! - launches the inbound, outbound and keepalive loops against it
//! - waits for the first failure signal (or shutdown)
//! - cancels the loops, closes the adapter and joins everything
//!
//! then pauses according to the reconnect policy and starts over. Local
//! modules are told about every connect and disconnect.

use crate::{
    correlator::SyncCorrelator,
    dispatcher::Dispatcher,
    rate_limiter::RateLimiter,
    sender::GuardedSender,
    state::{CycleEvent, CycleState},
    tasks::{FailureReporter, FailureSignal, InboundTask, KeepaliveTask, LoopKind, OutboundTask},
};
use edgehub_core::{
    modules, AdapterFactory, ConnectionAdapter, EdgeHubConfig, EdgeHubError, EdgeHubResult,
    Message, MessageBus, TransportError,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ----------------------------------------------------------------------------
// Reconnect Supervisor
// ----------------------------------------------------------------------------

/// Drives connection cycles until shutdown
pub struct ReconnectSupervisor {
    config: EdgeHubConfig,
    factory: Arc<dyn AdapterFactory>,
    bus: Arc<dyn MessageBus>,
    correlator: SyncCorrelator,
    dispatcher: Dispatcher,
    limiter: Arc<RateLimiter>,
    hub_module: String,
    notify_groups: Vec<String>,

    // State
    state: CycleState,
    state_tx: watch::Sender<CycleState>,
    cycles: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl ReconnectSupervisor {
    /// Create a supervisor; nothing runs until [`start`](Self::start) or
    /// [`run`](Self::run)
    pub fn new(
        config: EdgeHubConfig,
        factory: Arc<dyn AdapterFactory>,
        bus: Arc<dyn MessageBus>,
        correlator: SyncCorrelator,
        hub_module: impl Into<String>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            correlator.clone(),
            bus.clone(),
            config.group_routes.clone(),
        );
        let limiter = Arc::new(RateLimiter::from_config(&config));

        let mut notify_groups: Vec<String> = config.group_routes.values().cloned().collect();
        notify_groups.sort();
        notify_groups.dedup();

        let (state_tx, _) = watch::channel(CycleState::Disconnected);

        Self {
            config,
            factory,
            bus,
            correlator,
            dispatcher,
            limiter,
            hub_module: hub_module.into(),
            notify_groups,
            state: CycleState::Disconnected,
            state_tx,
            cycles: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the supervisor and return a handle to observe and stop it
    pub fn start(self) -> SupervisorHandle {
        let state = self.state_tx.subscribe();
        let cycles = self.cycles.clone();
        let correlator = self.correlator.clone();
        let bus = self.bus.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());

        SupervisorHandle {
            state,
            cycles,
            correlator,
            bus,
            shutdown,
            task: Some(task),
        }
    }

    /// Run connection cycles until shutdown is requested
    pub async fn run(mut self) -> EdgeHubResult<()> {
        info!(
            "Reconnect supervisor starting for {}",
            self.config.endpoint_url()
        );

        let mut consecutive_failures: u32 = 0;

        while !self.shutdown.is_cancelled() {
            self.advance(CycleEvent::StartConnecting)?;

            let adapter = match self.establish().await {
                Ok(adapter) => adapter,
                Err(e) => {
                    self.advance(CycleEvent::EstablishFailed)?;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.config.reconnect_delay(consecutive_failures);
                    error!("Connection failed: {}, reconnecting in {:?}", e, delay);
                    if !self.pause(delay).await {
                        break;
                    }
                    continue;
                }
            };

            match self.run_cycle(adapter).await? {
                Some(signal) => {
                    // A cycle that reached Connected resets the backoff
                    consecutive_failures = 1;
                    let delay = self.config.reconnect_delay(consecutive_failures);
                    warn!(
                        "Connection lost ({} loop: {}), reconnecting in {:?}",
                        signal.source, signal.reason, delay
                    );
                    if !self.pause(delay).await {
                        break;
                    }
                }
                None => break,
            }
        }

        info!("Reconnect supervisor stopped");
        Ok(())
    }

    /// One connected cycle, from launching the loops to tear-down
    ///
    /// Returns the failure that ended the cycle, or `None` on shutdown.
    async fn run_cycle(
        &mut self,
        adapter: Arc<dyn ConnectionAdapter>,
    ) -> EdgeHubResult<Option<FailureSignal>> {
        let cycle_token = self.shutdown.child_token();
        let (failures, mut failure_rx) = FailureReporter::channel();
        let sender = GuardedSender::new(adapter.clone());
        self.advance(CycleEvent::Established)?;

        let mut loops = JoinSet::new();
        let inbound = InboundTask::new(
            adapter.clone(),
            self.dispatcher.clone(),
            failures.clone(),
            cycle_token.clone(),
        );
        loops.spawn(async move { (LoopKind::Inbound, inbound.run().await) });

        let outbound = OutboundTask::new(
            self.bus.clone(),
            self.hub_module.clone(),
            sender.clone(),
            self.limiter.clone(),
            self.correlator.clone(),
            self.config.heartbeat_interval(),
            failures.clone(),
            cycle_token.clone(),
        );
        loops.spawn(async move { (LoopKind::Outbound, outbound.run().await) });

        let keepalive = KeepaliveTask::new(
            sender,
            self.config.heartbeat_interval(),
            failures.clone(),
            cycle_token.clone(),
        );
        loops.spawn(async move { (LoopKind::Keepalive, keepalive.run().await) });

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Connected to hub, cycle {}", cycle);
        self.notify_connection(true);

        let signal = tokio::select! {
            biased;
            signal = failure_rx.recv() => signal,
            _ = self.shutdown.cancelled() => None,
            exited = loops.join_next() => {
                // A loop ended without reporting; treat it as a failure
                let source = match exited {
                    Some(Ok((kind, _))) => kind,
                    Some(Err(ref e)) => {
                        error!("Routing loop panicked: {}", e);
                        LoopKind::Unknown
                    }
                    None => LoopKind::Unknown,
                };
                Some(failure_rx.try_recv().unwrap_or(FailureSignal {
                    source,
                    reason: "routing loop exited".to_string(),
                }))
            }
        };

        match signal {
            Some(_) => self.advance(CycleEvent::FailureSignaled)?,
            None => self.advance(CycleEvent::ShutdownRequested)?,
        }

        cycle_token.cancel();
        adapter.close().await;
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Routing loop panicked: {}", e);
            }
        }
        drop(failures);

        self.advance(CycleEvent::TornDown)?;
        info!("Disconnected from hub, cycle {}", cycle);
        self.notify_connection(false);

        Ok(signal)
    }

    /// Obtain a connected adapter, bounded by the handshake timeout
    async fn establish(&self) -> EdgeHubResult<Arc<dyn ConnectionAdapter>> {
        let timeout = self.config.handshake_timeout();
        debug!("Connecting to {}", self.config.endpoint_url());

        tokio::select! {
            connected = tokio::time::timeout(timeout, self.factory.connect()) => match connected {
                Ok(result) => result,
                Err(_) => Err(TransportError::HandshakeTimeout {
                    duration_ms: timeout.as_millis() as u64,
                }
                .into()),
            },
            _ = self.shutdown.cancelled() => Err(EdgeHubError::Canceled),
        }
    }

    /// Sleep for `delay`; returns `false` if shutdown interrupted it
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    fn advance(&mut self, event: CycleEvent) -> EdgeHubResult<()> {
        let next = self.state.transition(event)?;
        debug!("Connection state {} -> {}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        Ok(())
    }

    /// Tell every routed module group about a connect or disconnect
    fn notify_connection(&self, connected: bool) {
        let (operation, content) = if connected {
            (modules::CONNECT_OPERATION, modules::CLOUD_CONNECTED)
        } else {
            (modules::DISCONNECT_OPERATION, modules::CLOUD_DISCONNECTED)
        };

        for group in &self.notify_groups {
            let message = Message::new()
                .build_router(
                    modules::EDGE_HUB_MODULE,
                    group,
                    modules::CONNECTION_RESOURCE,
                    operation,
                )
                .fill_content(content);
            if let Err(e) = self.bus.publish(group, message) {
                debug!("Could not notify group {} of {}: {}", group, operation, e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Supervisor Handle
// ----------------------------------------------------------------------------

/// Observes and stops a running supervisor
///
/// Dropping the handle requests shutdown.
pub struct SupervisorHandle {
    state: watch::Receiver<CycleState>,
    cycles: Arc<AtomicU64>,
    correlator: SyncCorrelator,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<EdgeHubResult<()>>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state.clone()
    }

    /// Number of cycles that reached the connected state
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn correlator(&self) -> &SyncCorrelator {
        &self.correlator
    }

    /// The bus the engine routes through
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait until the supervisor reaches `target`, giving up after `timeout`
    pub async fn wait_for_state(&self, target: CycleState, timeout: Duration) -> bool {
        let mut state = self.subscribe_state();
        let reached = async {
            loop {
                if *state.borrow_and_update() == target {
                    return true;
                }
                if state.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Stop the supervisor, tearing down any live cycle, and wait for it
    pub async fn shutdown(&mut self) -> EdgeHubResult<()> {
        info!("Shutting down reconnect supervisor");
        self.shutdown.cancel();

        match self.task.take() {
            Some(task) => task.await.map_err(|e| EdgeHubError::Task {
                reason: e.to_string(),
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::LocalBus,
        testing::{MockAdapter, MockAdapterFactory, SendStep},
    };
    use edgehub_core::ReconnectPolicy;
    use tokio::time::Instant;

    fn local_bus() -> LocalBus {
        let bus = LocalBus::new(64);
        bus.add_module(modules::EDGE_HUB_MODULE);
        bus.add_module_group("metamanager", modules::META_GROUP);
        bus.add_module_group("devicetwin", modules::TWIN_GROUP);
        bus
    }

    fn supervisor(factory: Arc<MockAdapterFactory>, bus: &LocalBus) -> ReconnectSupervisor {
        ReconnectSupervisor::new(
            EdgeHubConfig::testing(),
            factory,
            Arc::new(bus.clone()),
            SyncCorrelator::new(),
            modules::EDGE_HUB_MODULE,
        )
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn drain(bus: &LocalBus, module: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = bus.try_receive(module).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_connects_and_notifies_modules() {
        let factory = Arc::new(MockAdapterFactory::new());
        let bus = local_bus();
        let mut handle = supervisor(factory.clone(), &bus).start();

        assert!(
            handle
                .wait_for_state(CycleState::Connected, Duration::from_secs(1))
                .await
        );
        assert_eq!(handle.cycles(), 1);

        let notices = drain(&bus, "devicetwin");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].resource(), modules::CONNECTION_RESOURCE);
        assert_eq!(notices[0].operation(), modules::CONNECT_OPERATION);
        assert_eq!(notices[0].content().as_str(), Some(modules::CLOUD_CONNECTED));

        handle.shutdown().await.unwrap();
        assert_eq!(handle.state(), CycleState::Disconnected);
        assert!(factory.issued()[0].is_closed());

        let notices = drain(&bus, "metamanager");
        assert_eq!(
            notices.last().map(|m| m.operation().to_string()),
            Some(modules::DISCONNECT_OPERATION.to_string())
        );
    }

    #[tokio::test]
    async fn test_read_failure_starts_new_cycle() {
        let factory = Arc::new(MockAdapterFactory::new());
        let first = Arc::new(MockAdapter::new());
        factory.push_adapter(first.clone());
        let bus = local_bus();
        let mut handle = supervisor(factory.clone(), &bus).start();

        wait_until(|| handle.cycles() == 1).await;
        first.push_receive_error("connection reset");

        wait_until(|| handle.cycles() == 2).await;
        assert!(first.is_closed());
        assert_eq!(first.close_count(), 1);
        assert_eq!(factory.issued().len(), 2);
        assert!(!factory.issued()[1].is_closed());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_simultaneous_failures_cause_one_reconnect() {
        let factory = Arc::new(MockAdapterFactory::new());
        let first = Arc::new(MockAdapter::new());
        first.set_fallback_send(SendStep::Fail("broken pipe".to_string()));
        first.push_receive_error("broken pipe");
        factory.push_adapter(first.clone());
        let bus = local_bus();
        bus.send(modules::EDGE_HUB_MODULE, Message::new()).unwrap();

        let mut handle = supervisor(factory.clone(), &bus).start();
        wait_until(|| handle.cycles() == 2).await;

        // Give a would-be second reconnect time to show up
        sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.cycles(), 2);
        assert_eq!(factory.attempts(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_retries() {
        let factory = Arc::new(MockAdapterFactory::new());
        factory.push_failure("connection refused");
        factory.push_failure("connection refused");
        let bus = local_bus();
        let mut handle = supervisor(factory.clone(), &bus).start();

        wait_until(|| handle.cycles() == 1).await;
        assert_eq!(factory.attempts(), 3);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_reconnecting() {
        let factory = Arc::new(MockAdapterFactory::new());
        for _ in 0..1000 {
            factory.push_failure("connection refused");
        }
        let bus = local_bus();
        let mut handle = supervisor(factory.clone(), &bus).start();

        wait_until(|| factory.attempts() >= 2).await;
        handle.shutdown().await.unwrap();
        assert!(!handle.is_running());
        assert_eq!(handle.cycles(), 0);
        assert_eq!(handle.state(), CycleState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_fails_attempt() {
        let factory = Arc::new(MockAdapterFactory::new());
        factory.push_hang();
        let bus = local_bus();

        let started = Instant::now();
        match supervisor(factory.clone(), &bus).establish().await {
            Err(EdgeHubError::Transport(TransportError::HandshakeTimeout { duration_ms })) => {
                assert_eq!(duration_ms, 1000)
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("hung handshake produced an adapter"),
        }
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1100), "waited {:?}", waited);

        // Running supervisor: the timed out attempt falls back to
        // Disconnected and the retry connects
        let factory = Arc::new(MockAdapterFactory::new());
        factory.push_hang();
        let mut handle = supervisor(factory.clone(), &bus).start();
        let mut states = handle.subscribe_state();
        let mut seen = Vec::new();
        while seen.last() != Some(&CycleState::Connected) {
            states.changed().await.unwrap();
            seen.push(*states.borrow_and_update());
        }
        assert_eq!(
            &seen[..2],
            &[CycleState::Connecting, CycleState::Disconnected]
        );
        assert_eq!(handle.cycles(), 1);

        let times = factory.attempt_times();
        assert_eq!(times.len(), 2);
        let gap = times[1] - times[0];
        assert!(gap >= Duration::from_millis(1010), "gap {:?}", gap);
        assert!(gap < Duration::from_millis(1100), "gap {:?}", gap);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_connected_cycle() {
        let factory = Arc::new(MockAdapterFactory::new());
        for _ in 0..3 {
            factory.push_failure("connection refused");
        }
        let flaky = Arc::new(MockAdapter::new());
        flaky.push_receive_error("connection reset");
        factory.push_adapter(flaky.clone());
        factory.push_failure("connection refused");

        let bus = local_bus();
        let config = EdgeHubConfig {
            reconnect: ReconnectPolicy::Exponential {
                initial_ms: 100,
                max_ms: 10_000,
                multiplier: 2.0,
            },
            ..EdgeHubConfig::testing()
        };
        let mut handle = ReconnectSupervisor::new(
            config,
            factory.clone(),
            Arc::new(bus.clone()),
            SyncCorrelator::new(),
            modules::EDGE_HUB_MODULE,
        )
        .start();

        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.cycles() < 2 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();
        assert!(flaky.is_closed());

        let times = factory.attempt_times();
        assert_eq!(times.len(), 6);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        // 100, 200, 400 while refused; losing the connection starts over at 100
        let expected = [100u64, 200, 400, 100, 200];
        for (gap, millis) in gaps.iter().zip(expected) {
            let want = Duration::from_millis(millis);
            assert!(
                *gap >= want && *gap < want + Duration::from_millis(5),
                "gaps {:?}",
                gaps
            );
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicked_loop_ends_cycle_without_blaming_a_loop() {
        let factory = Arc::new(MockAdapterFactory::new());
        let bus = local_bus();
        let mut supervisor = supervisor(factory, &bus);
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_receive_panic();

        supervisor.advance(CycleEvent::StartConnecting).unwrap();
        let signal = supervisor
            .run_cycle(adapter.clone())
            .await
            .unwrap()
            .expect("cycle should end with a failure");

        assert_eq!(signal.source, LoopKind::Unknown);
        assert_eq!(signal.reason, "routing loop exited");
        assert!(adapter.is_closed());
        assert_eq!(supervisor.state, CycleState::Disconnected);
    }
}
