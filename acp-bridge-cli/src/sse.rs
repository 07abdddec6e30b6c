//! Event bus subscription over server-sent events

use crate::http::{base_url, endpoint};
use acp_bridge::{BridgeConfig, BridgeError, BusEvent, EventSource, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::time::Duration;
use url::Url;

/// Reads `GET {server_url}/event`
///
/// Undecodable events are logged and skipped; only transport failures end
/// the stream with an error.
pub struct SseEventSource {
    client: reqwest::Client,
    url: Url,
}

impl SseEventSource {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        // No overall timeout: the stream stays open for the life of the connection
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        let url = endpoint(&base_url(&config.server_url)?, &["event"])?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self) -> Result<BoxStream<'static, Result<BusEvent>>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| BridgeError::Api(format!("event stream unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Api(format!(
                "event stream returned HTTP {}",
                status
            )));
        }
        tracing::debug!("Connected to event stream at {}", self.url);

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => match BusEvent::parse(&event.data) {
                        Ok(parsed) => Some(Ok(parsed)),
                        Err(e) => {
                            tracing::warn!("Skipping undecodable event: {}", e);
                            None
                        }
                    },
                    Err(e) => Some(Err(BridgeError::Api(format!("event stream failed: {}", e)))),
                }
            })
            .boxed();
        Ok(stream)
    }
}
