//! Scriptable connection doubles
//!
//! [`MockAdapter`] plays the hub side of a connection from a script: queued
//! inbound messages or receive failures, and per-send outcomes. Everything
//! the engine writes is recorded. [`MockAdapterFactory`] hands out scripted
//! adapters (or connection failures) in order, one per connection attempt.

use async_trait::async_trait;
use edgehub_core::{
    AdapterFactory, ConnectionAdapter, EdgeHubError, EdgeHubResult, Message, TransportError,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

// ----------------------------------------------------------------------------
// Scripts
// ----------------------------------------------------------------------------

/// One scripted result of `receive`
#[derive(Debug, Clone)]
pub enum ReceiveStep {
    Message(Message),
    Fail(String),
    /// Panic inside `receive`
    Panic,
}

/// One scripted result of `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    Succeed,
    Fail(String),
}

/// One scripted result of `connect`
#[derive(Clone)]
pub enum ConnectStep {
    Adapter(Arc<MockAdapter>),
    Fail(String),
    /// Never complete the handshake
    Hang,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Mock Adapter
// ----------------------------------------------------------------------------

/// In-memory connection driven by a script
///
/// With nothing queued, `receive` blocks until more is queued or the adapter
/// is closed. Sends succeed unless scripted otherwise.
pub struct MockAdapter {
    inbound_tx: mpsc::UnboundedSender<ReceiveStep>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<ReceiveStep>>,
    send_script: Mutex<VecDeque<SendStep>>,
    fallback_send: Mutex<SendStep>,
    sent: Mutex<Vec<Message>>,
    send_attempts: AtomicUsize,
    close_count: AtomicUsize,
    closed: CancellationToken,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            send_script: Mutex::new(VecDeque::new()),
            fallback_send: Mutex::new(SendStep::Succeed),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a message for the engine to receive
    pub fn push_inbound(&self, message: Message) {
        let _ = self.inbound_tx.send(ReceiveStep::Message(message));
    }

    /// Queue a receive failure
    pub fn push_receive_error(&self, reason: impl Into<String>) {
        let _ = self.inbound_tx.send(ReceiveStep::Fail(reason.into()));
    }

    /// Make the next `receive` panic
    pub fn push_receive_panic(&self) {
        let _ = self.inbound_tx.send(ReceiveStep::Panic);
    }

    /// Append outcomes for the next sends, consumed in order
    pub fn script_sends<I: IntoIterator<Item = SendStep>>(&self, steps: I) {
        lock(&self.send_script).extend(steps);
    }

    /// Outcome for every send once the script runs out
    pub fn set_fallback_send(&self, step: SendStep) {
        *lock(&self.fallback_send) = step;
    }

    /// Messages whose send succeeded, in order
    pub fn sent_messages(&self) -> Vec<Message> {
        lock(&self.sent).clone()
    }

    /// Sends attempted, successful or not
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn next_send_step(&self) -> SendStep {
        lock(&self.send_script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.fallback_send).clone())
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionAdapter for MockAdapter {
    async fn send(&self, message: Message) -> EdgeHubResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        match self.next_send_step() {
            SendStep::Succeed => {
                lock(&self.sent).push(message);
                Ok(())
            }
            SendStep::Fail(reason) => Err(EdgeHubError::send_failed(reason)),
        }
    }

    async fn receive(&self) -> EdgeHubResult<Message> {
        let mut inbound = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed.into()),
            inbound = self.inbound_rx.lock() => inbound,
        };

        let step = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed.into()),
            step = inbound.recv() => step,
        };

        match step {
            Some(ReceiveStep::Message(message)) => Ok(message),
            Some(ReceiveStep::Fail(reason)) => Err(EdgeHubError::receive_failed(reason)),
            Some(ReceiveStep::Panic) => panic!("scripted receive panic"),
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }
}

// ----------------------------------------------------------------------------
// Mock Adapter Factory
// ----------------------------------------------------------------------------

/// Connection factory replaying a script of outcomes
///
/// Once the script runs out every attempt yields a fresh, quiet
/// [`MockAdapter`].
#[derive(Default)]
pub struct MockAdapterFactory {
    script: Mutex<VecDeque<ConnectStep>>,
    issued: Mutex<Vec<Arc<MockAdapter>>>,
    attempt_times: Mutex<Vec<Instant>>,
}

impl MockAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `adapter` on a future connection attempt
    pub fn push_adapter(&self, adapter: Arc<MockAdapter>) {
        lock(&self.script).push_back(ConnectStep::Adapter(adapter));
    }

    /// Fail a future connection attempt with `reason`
    pub fn push_failure(&self, reason: impl Into<String>) {
        lock(&self.script).push_back(ConnectStep::Fail(reason.into()));
    }

    /// Leave a future connection attempt pending forever
    pub fn push_hang(&self) {
        lock(&self.script).push_back(ConnectStep::Hang);
    }

    /// Adapters handed out so far, in order
    pub fn issued(&self) -> Vec<Arc<MockAdapter>> {
        lock(&self.issued).clone()
    }

    /// Connection attempts so far, including failed ones
    pub fn attempts(&self) -> usize {
        lock(&self.attempt_times).len()
    }

    /// When each connection attempt started, on the tokio clock
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.attempt_times).clone()
    }
}

#[async_trait]
impl AdapterFactory for MockAdapterFactory {
    async fn connect(&self) -> EdgeHubResult<Arc<dyn ConnectionAdapter>> {
        lock(&self.attempt_times).push(Instant::now());
        let step = lock(&self.script).pop_front();

        let adapter = match step {
            Some(ConnectStep::Fail(reason)) => {
                return Err(EdgeHubError::connection_failed("mock", reason));
            }
            Some(ConnectStep::Hang) => std::future::pending().await,
            Some(ConnectStep::Adapter(adapter)) => adapter,
            None => Arc::new(MockAdapter::new()),
        };

        lock(&self.issued).push(adapter.clone());
        Ok(adapter)
    }
}
