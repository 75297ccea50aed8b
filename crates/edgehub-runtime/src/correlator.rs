//! Synchronous request/response correlation
//!
//! Tracks outstanding synchronous requests awaiting exactly one response,
//! keyed by the request's message identifier. The correlator never sends
//! anything itself: callers register before issuing a request, the inbound
//! path delivers responses, and the caller awaits its waiter with a deadline.
//!
//! Each registration is removed exactly once, either by the delivery of a
//! matching response or by the waiter timing out (or being dropped),
//! whichever happens first.

use dashmap::{mapref::entry::Entry, DashMap};
use edgehub_core::{CorrelationError, Message};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::oneshot, time::Duration};
use tracing::{debug, warn};

/// Single-slot delivery channel for one registration
#[derive(Debug)]
struct Slot {
    generation: u64,
    sender: oneshot::Sender<Message>,
}

#[derive(Debug, Default)]
struct Inner {
    waiters: DashMap<String, Slot>,
    next_generation: AtomicU64,
}

/// Concurrent map from message identifier to the waiter expecting its response
///
/// Cloning is cheap and shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct SyncCorrelator {
    inner: Arc<Inner>,
}

impl SyncCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the response to message `id`
    ///
    /// A second registration for an identifier that still has a waiter is
    /// rejected with [`CorrelationError::DuplicateIdentifier`]; the existing
    /// waiter is left untouched.
    pub fn register(&self, id: impl Into<String>) -> Result<SyncWaiter, CorrelationError> {
        let id = id.into();
        match self.inner.waiters.entry(id.clone()) {
            Entry::Occupied(_) => Err(CorrelationError::DuplicateIdentifier { id }),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = oneshot::channel();
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { generation, sender });
                Ok(SyncWaiter {
                    id,
                    generation,
                    receiver: Some(receiver),
                    correlator: self.clone(),
                })
            }
        }
    }

    /// Whether a waiter is currently registered for `id`
    ///
    /// Classification only, the registration is not consumed.
    pub fn is_sync_response(&self, id: &str) -> bool {
        !id.is_empty() && self.inner.waiters.contains_key(id)
    }

    /// Hand `response` to the waiter registered under its parent identifier
    ///
    /// Removes the registration. Returns `false` when the message has no
    /// parent identifier or nobody is waiting for it any more, in which case
    /// the message is dropped.
    pub fn deliver(&self, response: Message) -> bool {
        let Some(parent_id) = response.parent_id().map(str::to_owned) else {
            return false;
        };

        match self.inner.waiters.remove(&parent_id) {
            Some((_, slot)) => {
                if slot.sender.send(response).is_err() {
                    // Receiver gone between lookup and send; nothing left to clean up
                    debug!("Waiter for message {} vanished before delivery", parent_id);
                    return false;
                }
                true
            }
            None => {
                debug!("No waiter for response to message {}, dropping", parent_id);
                false
            }
        }
    }

    /// Await the response for `waiter`, giving up after `timeout`
    pub async fn await_response(
        &self,
        waiter: SyncWaiter,
        timeout: Duration,
    ) -> Result<Message, CorrelationError> {
        waiter.wait(timeout).await
    }

    /// Number of outstanding registrations
    pub fn pending(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Remove the registration for `id` only if it is still the one created
    /// with `generation`
    fn remove_registration(&self, id: &str, generation: u64) -> bool {
        self.inner
            .waiters
            .remove_if(id, |_, slot| slot.generation == generation)
            .is_some()
    }
}

// ----------------------------------------------------------------------------
// Waiter Handle
// ----------------------------------------------------------------------------

/// Handle held by the issuer of a synchronous request
///
/// Dropping the handle without waiting removes its registration.
#[derive(Debug)]
pub struct SyncWaiter {
    id: String,
    generation: u64,
    receiver: Option<oneshot::Receiver<Message>>,
    correlator: SyncCorrelator,
}

impl SyncWaiter {
    /// Identifier of the request this waiter expects a response to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the response arrives or `timeout` elapses
    ///
    /// On timeout the registration is removed and
    /// [`CorrelationError::Timeout`] returned. If a delivery claimed the
    /// registration at the same moment, the delivered message wins.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message, CorrelationError> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(CorrelationError::Canceled {
                id: self.id.clone(),
            });
        };

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CorrelationError::Canceled {
                id: self.id.clone(),
            }),
            Err(_) => {
                if self.correlator.remove_registration(&self.id, self.generation) {
                    warn!("Timeout to receive response for message {}", self.id);
                    Err(CorrelationError::Timeout {
                        id: self.id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // The dispatcher already took the slot and is handing it over
                    receiver.await.map_err(|_| CorrelationError::Canceled {
                        id: self.id.clone(),
                    })
                }
            }
        }
    }
}

impl Drop for SyncWaiter {
    fn drop(&mut self) {
        self.correlator
            .remove_registration(&self.id, self.generation);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
