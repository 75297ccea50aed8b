//! Serialized access to the send half of a connection
//!
//! The outbound router and the keepalive monitor both write to the same
//! adapter, which is not required to tolerate concurrent sends. Every send in
//! a cycle goes through one `GuardedSender`, which holds a mutex for the
//! duration of the adapter call.

use edgehub_core::{ConnectionAdapter, EdgeHubError, EdgeHubResult, Message, TransportError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Single-writer wrapper around a connection adapter
#[derive(Clone)]
pub struct GuardedSender {
    adapter: Arc<dyn ConnectionAdapter>,
    write_lock: Arc<Mutex<()>>,
}

impl GuardedSender {
    pub fn new(adapter: Arc<dyn ConnectionAdapter>) -> Self {
        Self {
            adapter,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Send `message`, waiting for any send already in progress to finish
    ///
    /// Failures are reported as [`TransportError::SendFailed`] with the
    /// underlying cause.
    pub async fn send(&self, message: Message) -> EdgeHubResult<()> {
        let _guard = self.write_lock.lock().await;
        trace!("Sending message {}", message.id());
        self.adapter.send(message).await.map_err(|e| match e {
            EdgeHubError::Transport(TransportError::SendFailed { reason }) => {
                EdgeHubError::send_failed(reason)
            }
            EdgeHubError::Transport(cause) => EdgeHubError::send_failed(cause),
            other => EdgeHubError::send_failed(other),
        })
    }

    /// The adapter this sender writes to
    pub fn adapter(&self) -> &Arc<dyn ConnectionAdapter> {
        &self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    /// Fails the test if two sends ever overlap
    #[derive(Default)]
    struct ExclusiveAdapter {
        in_send: AtomicBool,
        sent: AtomicUsize,
        overlapped: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ConnectionAdapter for ExclusiveAdapter {
        async fn send(&self, _message: Message) -> EdgeHubResult<()> {
            if self.in_send.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            sleep(Duration::from_millis(1)).await;
            self.in_send.store(false, Ordering::SeqCst);
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn receive(&self) -> EdgeHubResult<Message> {
            Err(EdgeHubError::Transport(TransportError::Closed))
        }

        async fn close(&self) {}
    }

    struct RefusingAdapter;

    #[async_trait::async_trait]
    impl ConnectionAdapter for RefusingAdapter {
        async fn send(&self, _message: Message) -> EdgeHubResult<()> {
            Err(EdgeHubError::Transport(TransportError::NetworkIo(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection Refused"),
            )))
        }

        async fn receive(&self) -> EdgeHubResult<Message> {
            Err(EdgeHubError::Transport(TransportError::Closed))
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized() {
        let adapter = Arc::new(ExclusiveAdapter::default());
        let sender = GuardedSender::new(adapter.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sender = sender.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    sender.send(Message::new()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(adapter.sent.load(Ordering::SeqCst), 40);
        assert!(!adapter.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_failure_is_wrapped() {
        let sender = GuardedSender::new(Arc::new(RefusingAdapter));
        let err = sender.send(Message::new()).await.unwrap_err();
        assert!(err.is_transient_connection_error());
        assert!(err
            .to_string()
            .ends_with("failed to send message, error: network I/O error: Connection Refused"));
    }
}
