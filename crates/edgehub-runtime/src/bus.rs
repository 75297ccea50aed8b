//! In-process message bus
//!
//! A [`MessageBus`] implementation for components living in the same process
//! as the hub. Every module owns a bounded inbox; groups are named sets of
//! modules. Publishing never blocks: a full inbox drops the message for that
//! module and logs it.

use dashmap::DashMap;
use edgehub_core::{BusError, EdgeHubResult, Message, MessageBus};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Bounded inbox of one module
#[derive(Debug, Clone)]
struct Inbox {
    sender: mpsc::Sender<Message>,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
}

#[derive(Debug)]
struct BusInner {
    buffer_size: usize,
    modules: DashMap<String, Inbox>,
    groups: DashMap<String, Vec<String>>,
}

/// Local publish/subscribe bus keyed by module groups
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    /// Create an empty bus whose inboxes hold up to `buffer_size` messages
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                buffer_size: buffer_size.max(1),
                modules: DashMap::new(),
                groups: DashMap::new(),
            }),
        }
    }

    /// Register a module with its own inbox; registering twice is a no-op
    pub fn add_module(&self, module: &str) {
        self.inner
            .modules
            .entry(module.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::channel(self.inner.buffer_size);
                debug!("Registered bus module {}", module);
                Inbox {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                }
            });
    }

    /// Register `module` (if needed) and make it a member of `group`
    pub fn add_module_group(&self, module: &str, group: &str) {
        self.add_module(module);
        let mut members = self.inner.groups.entry(group.to_string()).or_default();
        if !members.iter().any(|m| m == module) {
            members.push(module.to_string());
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.inner.groups.contains_key(group)
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.inner.modules.contains_key(module)
    }

    /// Take the next message for `module` if one is queued
    ///
    /// `Ok(None)` means the inbox is empty. While another task is blocked in
    /// `receive` on the same module this fails with [`BusError::InboxBusy`].
    pub fn try_receive(&self, module: &str) -> EdgeHubResult<Option<Message>> {
        let receiver = self.receiver(module)?;
        let mut receiver = receiver.try_lock().map_err(|_| BusError::InboxBusy {
            module: module.to_string(),
        })?;
        Ok(receiver.try_recv().ok())
    }

    fn receiver(&self, module: &str) -> Result<Arc<Mutex<mpsc::Receiver<Message>>>, BusError> {
        self.inner
            .modules
            .get(module)
            .map(|inbox| inbox.receiver.clone())
            .ok_or_else(|| BusError::UnknownModule {
                module: module.to_string(),
            })
    }

    fn sender(&self, module: &str) -> Result<mpsc::Sender<Message>, BusError> {
        self.inner
            .modules
            .get(module)
            .map(|inbox| inbox.sender.clone())
            .ok_or_else(|| BusError::UnknownModule {
                module: module.to_string(),
            })
    }

    fn deliver(&self, module: &str, message: Message) -> Result<(), BusError> {
        self.sender(module)?
            .try_send(message)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusError::InboxFull {
                    module: module.to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => BusError::InboxClosed {
                    module: module.to_string(),
                },
            })
    }
}

#[async_trait::async_trait]
impl MessageBus for LocalBus {
    fn publish(&self, group: &str, message: Message) -> EdgeHubResult<()> {
        let members = self
            .inner
            .groups
            .get(group)
            .map(|members| members.value().clone())
            .ok_or_else(|| BusError::UnknownGroup {
                group: group.to_string(),
            })?;

        for module in members {
            if let Err(e) = self.deliver(&module, message.clone()) {
                warn!("Dropping message {} for module {}: {}", message.id(), module, e);
            }
        }
        Ok(())
    }

    fn send(&self, module: &str, message: Message) -> EdgeHubResult<()> {
        self.deliver(module, message)?;
        Ok(())
    }

    async fn receive(&self, module: &str) -> EdgeHubResult<Message> {
        let receiver = self.receiver(module)?;
        let mut receiver = receiver.lock().await;
        let message = receiver.recv().await.ok_or_else(|| BusError::InboxClosed {
            module: module.to_string(),
        })?;
        Ok(message)
    }
}
