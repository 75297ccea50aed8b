//! WebSocket connection to the hub
//!
//! One `WebSocketAdapter` wraps one established connection, carrying each
//! message as a JSON text frame. `WebSocketFactory` opens a new mutually
//! authenticated TLS connection per attempt, reading the CA, certificate and
//! key from disk every time so rotated material is picked up on reconnect.

use async_trait::async_trait;
use edgehub_core::{
    AdapterFactory, ConnectionAdapter, EdgeHubConfig, EdgeHubError, EdgeHubResult, Message,
    TransportError,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use native_tls::{Certificate, Identity, TlsConnector};
use std::{path::Path, sync::Arc};
use tokio::{
    net::TcpStream,
    sync::Mutex,
    time::{timeout, Duration},
};
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as Frame},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on waiting for the write half while closing
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// WebSocket Adapter
// ----------------------------------------------------------------------------

/// Established WebSocket connection to the hub
pub struct WebSocketAdapter {
    sink: Mutex<SplitSink<WsStream, Frame>>,
    stream: Mutex<SplitStream<WsStream>>,
    read_deadline: Option<Duration>,
    write_deadline: Option<Duration>,
    closed: CancellationToken,
}

impl WebSocketAdapter {
    pub fn new(
        socket: WsStream,
        read_deadline: Option<Duration>,
        write_deadline: Option<Duration>,
    ) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            read_deadline,
            write_deadline,
            closed: CancellationToken::new(),
        }
    }

    async fn write_frame(&self, frame: Frame) -> EdgeHubResult<()> {
        let mut sink = self.sink.lock().await;
        let write = sink.send(frame);
        let written = match self.write_deadline {
            Some(deadline) => timeout(deadline, write)
                .await
                .map_err(|_| EdgeHubError::send_failed("write deadline exceeded"))?,
            None => write.await,
        };
        written.map_err(EdgeHubError::send_failed)
    }

    async fn read_frame(&self) -> EdgeHubResult<Option<Frame>> {
        let mut stream = self.stream.lock().await;
        let read = stream.next();
        let frame = match self.read_deadline {
            Some(deadline) => timeout(deadline, read)
                .await
                .map_err(|_| EdgeHubError::receive_failed("read deadline exceeded"))?,
            None => read.await,
        };
        frame.transpose().map_err(EdgeHubError::receive_failed)
    }
}

#[async_trait]
impl ConnectionAdapter for WebSocketAdapter {
    async fn send(&self, message: Message) -> EdgeHubResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed.into());
        }
        let text = serde_json::to_string(&message)?;

        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed.into()),
            written = self.write_frame(Frame::Text(text)) => written,
        }
    }

    async fn receive(&self) -> EdgeHubResult<Message> {
        loop {
            let frame = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed.into()),
                frame = self.read_frame() => frame?,
            };

            let decoded = match frame {
                Some(Frame::Text(text)) => serde_json::from_str::<Message>(&text),
                Some(Frame::Binary(bytes)) => serde_json::from_slice::<Message>(&bytes),
                Some(Frame::Close(close)) => {
                    debug!("Hub closed the connection: {:?}", close);
                    return Err(TransportError::Closed.into());
                }
                Some(_) => continue,
                None => return Err(TransportError::Closed.into()),
            };

            match decoded {
                Ok(message) => return Ok(message),
                Err(e) => warn!("Skipping undecodable frame from hub: {}", e),
            }
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        match timeout(CLOSE_TIMEOUT, self.sink.lock()).await {
            Ok(mut sink) => {
                if let Err(e) = sink.close().await {
                    debug!("Error while closing hub connection: {}", e);
                }
            }
            Err(_) => debug!("Write half busy, dropping hub connection without close frame"),
        }
    }
}

// ----------------------------------------------------------------------------
// WebSocket Factory
// ----------------------------------------------------------------------------

/// Opens authenticated WebSocket connections to the configured hub
pub struct WebSocketFactory {
    config: EdgeHubConfig,
}

impl WebSocketFactory {
    pub fn new(config: EdgeHubConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> EdgeHubResult<Url> {
        Url::parse(&self.config.endpoint_url())
            .map_err(|e| EdgeHubError::connection_failed(&self.config.server, e))
    }
}

#[async_trait]
impl AdapterFactory for WebSocketFactory {
    async fn connect(&self) -> EdgeHubResult<Arc<dyn ConnectionAdapter>> {
        let url = self.endpoint()?;
        let connector = tls_connector(&self.config).await?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| EdgeHubError::connection_failed(&self.config.server, e))?;
        let headers = request.headers_mut();
        for (name, value) in [
            ("node_id", &self.config.node_id),
            ("project_id", &self.config.project_id),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| EdgeHubError::config_error(format!("invalid {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        debug!("Opening WebSocket connection to {}", url);
        let (socket, response) = connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::NativeTls(connector)),
        )
        .await
        .map_err(|e| EdgeHubError::connection_failed(&self.config.server, e))?;

        info!("WebSocket connected to {} ({})", url, response.status());
        Ok(Arc::new(WebSocketAdapter::new(
            socket,
            self.config.read_deadline(),
            self.config.write_deadline(),
        )))
    }
}

// ----------------------------------------------------------------------------
// TLS Material
// ----------------------------------------------------------------------------

/// Build a TLS connector trusting the configured CA and presenting the
/// configured client identity
pub async fn tls_connector(config: &EdgeHubConfig) -> EdgeHubResult<TlsConnector> {
    let ca = read_material(&config.tls_ca_file).await?;
    let cert = read_material(&config.tls_cert_file).await?;
    let key = read_material(&config.tls_private_key_file).await?;

    let root = Certificate::from_pem(&ca).map_err(|e| tls_error(&config.tls_ca_file, e))?;
    let identity =
        Identity::from_pkcs8(&cert, &key).map_err(|e| tls_error(&config.tls_cert_file, e))?;

    TlsConnector::builder()
        .add_root_certificate(root)
        .identity(identity)
        .build()
        .map_err(|e| tls_error(&config.tls_cert_file, e))
}

async fn read_material(path: &Path) -> EdgeHubResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| tls_error(path, e))
}

fn tls_error(path: &Path, reason: impl ToString) -> EdgeHubError {
    TransportError::TlsMaterial {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
