//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration and the
//! correlation `client_id` for one ComfyUI instance. Call
//! [`ComfyUIClient::connect`] to establish a live [`ComfyUIConnection`],
//! or [`ComfyUIClient::run_prompt`] for the whole
//! connect → submit → stream → close sequence.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::api::ComfyUIApi;
use crate::error::ComfyUIError;
use crate::tracker::{CompletedPrompt, ExecutionTracker, TrackerStatus};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Every client generates its own `client_id` (UUID v4) once; every
/// connection it opens and every prompt it submits carries that id.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    client_id: String,
    ws_url: String,
    api: ComfyUIApi,
}

/// A live WebSocket connection to a ComfyUI instance.
///
/// Owns the socket exclusively. [`close`](Self::close) releases it and
/// may be called any number of times.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    ws_stream: Option<WsStream>,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            ws_url,
            api: ComfyUIApi::new(api_url),
        }
    }

    /// Create a client for a bare `host:port` address.
    ///
    /// Fails with [`ComfyUIError::Configuration`] when the address is unset,
    /// before anything touches the network.
    pub fn from_address(address: Option<&str>) -> Result<Self, ComfyUIError> {
        let address = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                ComfyUIError::Configuration("ComfyUI server address is not configured".into())
            })?;
        Ok(Self::new(
            format!("ws://{address}"),
            format!("http://{address}"),
        ))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        self.api.api_url()
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Connect to the ComfyUI WebSocket endpoint scoped by `client_id`.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIError::transport_from(
                format!("Failed to connect to ComfyUI at {}", self.ws_url),
                e,
            )
        })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream: Some(ws_stream),
        })
    }

    /// Submit a workflow under this client's id and return its `prompt_id`.
    pub async fn submit(&self, workflow: &serde_json::Value) -> Result<String, ComfyUIError> {
        self.api.submit_workflow(workflow, &self.client_id).await
    }

    /// Ask the backend to unload models. Failures are only logged.
    pub async fn free_memory(&self) {
        self.api.free_memory().await
    }

    /// Run one workflow to completion and return its id and images.
    ///
    /// The socket is opened before submission so no frame for the new
    /// prompt can be missed, and it is closed on every exit path.
    pub async fn run_prompt(
        &self,
        workflow: &serde_json::Value,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUIError> {
        let mut connection = self.connect().await?;
        let result: Result<CompletedPrompt, ComfyUIError> = async {
            let prompt_id = self.submit(workflow).await?;
            connection.wait_for_images(&prompt_id, timeout).await
        }
        .await;
        connection.close().await;
        result
    }
}

impl fmt::Debug for ComfyUIConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComfyUIConnection")
            .field("client_id", &self.client_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ComfyUIConnection {
    /// Whether the socket is still held by this connection.
    pub fn is_open(&self) -> bool {
        self.ws_stream.is_some()
    }

    /// Read frames until `prompt_id` finishes, fails, or `timeout` elapses.
    pub async fn wait_for_images(
        &mut self,
        prompt_id: &str,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUIError> {
        let mut tracker = ExecutionTracker::new(prompt_id);

        match tokio::time::timeout(timeout, self.read_until_complete(&mut tracker)).await {
            Ok(Ok(())) => Ok(tracker.into_completed()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    prompt_id,
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for images",
                );
                Err(ComfyUIError::Timeout(timeout))
            }
        }
    }

    /// Release the socket. Safe to call in any state, any number of times.
    pub async fn close(&mut self) {
        if let Some(mut ws_stream) = self.ws_stream.take() {
            if let Err(e) = ws_stream.close(None).await {
                tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close failed");
            }
            tracing::debug!(client_id = %self.client_id, "WebSocket connection closed");
        }
    }

    async fn read_until_complete(
        &mut self,
        tracker: &mut ExecutionTracker,
    ) -> Result<(), ComfyUIError> {
        let ws_stream = self
            .ws_stream
            .as_mut()
            .ok_or_else(|| ComfyUIError::transport("WebSocket is not connected"))?;

        while let Some(msg_result) = ws_stream.next().await {
            let status = match msg_result {
                Ok(Message::Text(text)) => tracker.handle_frame(text.as_bytes())?,
                Ok(Message::Binary(data)) => tracker.handle_frame(&data)?,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    tracing::info!(client_id = %self.client_id, ?frame, "ComfyUI WebSocket closed");
                    return Err(ComfyUIError::transport(
                        "Connection closed by ComfyUI before execution finished",
                    ));
                }
                Err(e) => {
                    tracing::error!(client_id = %self.client_id, error = %e, "WebSocket receive error");
                    return Err(e.into());
                }
            };

            if status == TrackerStatus::Complete {
                return Ok(());
            }
        }

        Err(ComfyUIError::transport(
            "WebSocket stream ended before execution finished",
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unset_address_is_configuration_error() {
        assert_matches!(
            ComfyUIClient::from_address(None),
            Err(ComfyUIError::Configuration(_))
        );
        assert_matches!(
            ComfyUIClient::from_address(Some("  ")),
            Err(ComfyUIError::Configuration(_))
        );
    }

    #[test]
    fn address_builds_both_urls() {
        let client = ComfyUIClient::from_address(Some("gpu-box:8188")).unwrap();
        assert_eq!(client.ws_url(), "ws://gpu-box:8188");
        assert_eq!(client.api_url(), "http://gpu-box:8188");
    }

    #[test]
    fn client_id_is_stable_per_instance() {
        let client = ComfyUIClient::from_address(Some("h:1")).unwrap();
        let again = client.client_id().to_string();
        assert_eq!(client.client_id(), again);

        let other = ComfyUIClient::from_address(Some("h:1")).unwrap();
        assert_ne!(client.client_id(), other.client_id());
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_transport_error() {
        // Port 9 (discard) is practically never listening on loopback.
        let client = ComfyUIClient::from_address(Some("127.0.0.1:9")).unwrap();
        let result = client.connect().await;
        let err = result.unwrap_err();
        assert_matches!(err, ComfyUIError::Transport { .. });
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn submit_to_closed_port_keeps_the_cause() {
        let client = ComfyUIClient::from_address(Some("127.0.0.1:9")).unwrap();
        let err = client.submit(&serde_json::json!({})).await.unwrap_err();
        assert_matches!(err, ComfyUIError::Transport { .. });
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn connection_debug_omits_the_socket() {
        let connection = ComfyUIConnection {
            client_id: "abc".into(),
            ws_stream: None,
        };
        assert_eq!(
            format!("{connection:?}"),
            r#"ComfyUIConnection { client_id: "abc", open: false }"#
        );
    }
}
