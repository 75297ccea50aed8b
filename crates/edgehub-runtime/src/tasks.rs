//! Per-cycle routing loops
//!
//! Each connected cycle runs three concurrent loops sharing one adapter:
//!
//! - `InboundTask`: hub → local bus, via the dispatcher
//! - `OutboundTask`: local bus → hub, rate limited, tracks sync requests
//! - `KeepaliveTask`: periodic liveness message to the hub
//!
//! A loop that hits a connection-level error reports it on the cycle's
//! failure channel and exits. Every loop also exits when the cycle token is
//! canceled.

use crate::{
    correlator::{SyncCorrelator, SyncWaiter},
    dispatcher::Dispatcher,
    rate_limiter::RateLimiter,
    sender::GuardedSender,
};
use edgehub_core::{modules, ConnectionAdapter, EdgeHubResult, Message, MessageBus};
use std::{fmt, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{interval, sleep, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause before retrying a failed read from the local bus
pub const BUS_RETRY_DELAY: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Inter-Task Communication
// ----------------------------------------------------------------------------

/// Which routing loop raised a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Inbound,
    Outbound,
    Keepalive,
    /// A loop that ended without reporting, for example by panicking
    Unknown,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopKind::Inbound => "inbound",
            LoopKind::Outbound => "outbound",
            LoopKind::Keepalive => "keepalive",
            LoopKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A connection failure observed by one of the loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignal {
    pub source: LoopKind,
    pub reason: String,
}

/// Sending half of a cycle's failure channel
///
/// The channel holds a single signal. The first report wins; later reports in
/// the same cycle are discarded, so the supervisor reacts once per failure.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    sender: mpsc::Sender<FailureSignal>,
}

impl FailureReporter {
    /// Create a fresh failure channel for one cycle
    pub fn channel() -> (FailureReporter, mpsc::Receiver<FailureSignal>) {
        let (sender, receiver) = mpsc::channel(1);
        (FailureReporter { sender }, receiver)
    }

    /// Report a failure without blocking; returns whether it was recorded
    pub fn report(&self, source: LoopKind, reason: impl Into<String>) -> bool {
        let signal = FailureSignal {
            source,
            reason: reason.into(),
        };
        match self.sender.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                debug!(
                    "Failure already pending, discarding report from {} loop: {}",
                    signal.source, signal.reason
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Inbound Routing
// ----------------------------------------------------------------------------

/// Reads from the hub and hands every message to the dispatcher
pub struct InboundTask {
    adapter: Arc<dyn ConnectionAdapter>,
    dispatcher: Dispatcher,
    failures: FailureReporter,
    cancel: CancellationToken,
}

impl InboundTask {
    pub fn new(
        adapter: Arc<dyn ConnectionAdapter>,
        dispatcher: Dispatcher,
        failures: FailureReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            dispatcher,
            failures,
            cancel,
        }
    }

    /// Route hub messages until a read fails or the cycle ends
    pub async fn run(self) -> EdgeHubResult<()> {
        info!("Inbound routing task starting");

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.adapter.receive() => received,
            };

            match received {
                Ok(message) => {
                    trace!(
                        "Received message {} for group {}",
                        message.id(),
                        message.group()
                    );
                    if let Err(e) = self.dispatcher.dispatch(message) {
                        error!("Failed to dispatch message: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to read message from hub: {}", e);
                    self.failures.report(LoopKind::Inbound, e.to_string());
                    break;
                }
            }
        }

        info!("Inbound routing task stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Outbound Routing
// ----------------------------------------------------------------------------

/// Drains the hub's bus inbox and writes each message to the hub
pub struct OutboundTask {
    bus: Arc<dyn MessageBus>,
    inbox: String,
    sender: GuardedSender,
    limiter: Arc<RateLimiter>,
    correlator: SyncCorrelator,
    response_timeout: Duration,
    failures: FailureReporter,
    cancel: CancellationToken,
}

impl OutboundTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        inbox: impl Into<String>,
        sender: GuardedSender,
        limiter: Arc<RateLimiter>,
        correlator: SyncCorrelator,
        response_timeout: Duration,
        failures: FailureReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            inbox: inbox.into(),
            sender,
            limiter,
            correlator,
            response_timeout,
            failures,
            cancel,
        }
    }

    /// Forward local messages until a send fails or the cycle ends
    pub async fn run(self) -> EdgeHubResult<()> {
        info!("Outbound routing task starting");

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.bus.receive(&self.inbox) => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to receive message from local bus: {}", e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(BUS_RETRY_DELAY) => {}
                    }
                    continue;
                }
            };

            if self.limiter.acquire(&self.cancel).await.is_err() {
                debug!("Cycle ended while waiting for send budget, dropping {}", message.id());
                break;
            }

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.send_to_hub(message) => sent,
            };

            if let Err(e) = sent {
                error!("Failed to forward message to hub: {}", e);
                self.failures.report(LoopKind::Outbound, e.to_string());
                break;
            }
        }

        info!("Outbound routing task stopped");
        Ok(())
    }

    async fn send_to_hub(&self, message: Message) -> EdgeHubResult<()> {
        let requester = message.source().to_string();

        // Register before the write so an immediate response finds its waiter
        let waiter = if message.is_sync() {
            match self.correlator.register(message.id()) {
                Ok(waiter) => Some(waiter),
                Err(e) => {
                    warn!("Not tracking response: {}", e);
                    None
                }
            }
        } else {
            None
        };

        trace!("Forwarding message {} to hub", message.id());
        self.sender.send(message).await?;

        if let Some(waiter) = waiter {
            self.spawn_response_keeper(waiter, requester);
        }
        Ok(())
    }

    /// Wait for the response to a sync request and pass it back to the
    /// requesting module
    fn spawn_response_keeper(&self, waiter: SyncWaiter, requester: String) {
        let bus = self.bus.clone();
        let timeout = self.response_timeout;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = waiter.wait(timeout) => match result {
                    Ok(response) => {
                        if let Err(e) = bus.send(&requester, response) {
                            warn!("Failed to return response to {}: {}", requester, e);
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                _ = cancel.cancelled() => {}
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Keepalive
// ----------------------------------------------------------------------------

/// Liveness message sent to the hub every heartbeat period
pub fn keepalive_message() -> Message {
    Message::new()
        .build_router(
            modules::EDGE_HUB_MODULE,
            modules::RESOURCE_GROUP,
            modules::KEEPALIVE_RESOURCE,
            modules::KEEPALIVE_OPERATION,
        )
        .with_sync(true)
        .fill_content(modules::KEEPALIVE_CONTENT)
}

/// Sends a keepalive immediately, then once per period
pub struct KeepaliveTask {
    sender: GuardedSender,
    period: Duration,
    failures: FailureReporter,
    cancel: CancellationToken,
}

impl KeepaliveTask {
    pub fn new(
        sender: GuardedSender,
        period: Duration,
        failures: FailureReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            period,
            failures,
            cancel,
        }
    }

    pub async fn run(self) -> EdgeHubResult<()> {
        info!("Keepalive task starting, period {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.sender.send(keepalive_message()) => sent,
            };

            match sent {
                Ok(()) => trace!("Keepalive sent"),
                Err(e) => {
                    error!("Failed to send keepalive: {}", e);
                    self.failures.report(LoopKind::Keepalive, e.to_string());
                    break;
                }
            }
        }

        info!("Keepalive task stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
