//! Network half of the stream transport.
//!
//! One long-lived POST whose body is a chunked frame stream. Frames are
//! reassembled by [`FrameDecoder`], parsed independently, and forwarded as
//! typed events. Consumption stops at the first terminal frame even if the
//! socket stays open. Malformed frames are logged and skipped.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::CircuitForgeError;
use crate::protocol::{parse_event, AnalysisEvent, AnalysisRequest, FrameDecoder};

/// Default bound on silence between chunks.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Source of analysis events. The session controller only depends on this
/// trait, so tests drive it with scripted sources instead of a live server.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stream events for one request into `events` until a terminal frame,
    /// the consumer hangs up, or a transport failure. Cancellation is
    /// applied externally by aborting the future; it is always benign.
    async fn stream_events(
        &self,
        request: AnalysisRequest,
        events: mpsc::Sender<AnalysisEvent>,
    ) -> Result<(), CircuitForgeError>;
}

/// HTTP implementation of [`EventSource`].
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    idle_timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[async_trait]
impl EventSource for HttpTransport {
    async fn stream_events(
        &self,
        request: AnalysisRequest,
        events: mpsc::Sender<AnalysisEvent>,
    ) -> Result<(), CircuitForgeError> {
        debug!(
            endpoint = %self.endpoint,
            provider = %request.provider,
            "opening analysis stream"
        );

        // The idle bound covers the handshake too: a server that accepts
        // the connection but never sends headers must not hang us.
        let response = timeout(
            self.idle_timeout,
            self.client.post(&self.endpoint).json(&request).send(),
        )
        .await
        .map_err(|_| CircuitForgeError::Timeout(self.idle_timeout))?
        .map_err(CircuitForgeError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CircuitForgeError::Network(format!(
                "analysis endpoint returned {status}: {body}"
            )));
        }

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();

        loop {
            let chunk = match timeout(self.idle_timeout, body.next()).await {
                Err(_) => return Err(CircuitForgeError::Timeout(self.idle_timeout)),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(CircuitForgeError::from_reqwest(e)),
                Ok(Some(Ok(bytes))) => bytes,
            };

            for payload in decoder.push(&chunk) {
                let event = match parse_event(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        // One bad frame never halts the stream.
                        warn!(error = %e, payload_len = payload.len(), "skipping malformed frame");
                        continue;
                    }
                };

                let terminal = event.is_terminal();
                if events.send(event).await.is_err() {
                    debug!("event consumer hung up; closing stream");
                    return Ok(());
                }
                if terminal {
                    // Stop consuming even if the server keeps the socket open.
                    info!("terminal frame observed; closing stream");
                    return Ok(());
                }
            }
        }

        Err(CircuitForgeError::Network(
            "stream ended without a terminal frame".to_string(),
        ))
    }
}
