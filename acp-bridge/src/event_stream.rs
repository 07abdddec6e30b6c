//! Reconnecting subscription to the internal event bus

use crate::error::Result;
use crate::events::BusEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A source of bus events over a single connection
///
/// Each successful `connect` yields a stream that ends when the connection
/// drops. Undecodable events are the source's concern: it logs and skips
/// them, so a stream error always means the connection is unusable.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<BoxStream<'static, Result<BusEvent>>>;
}

/// Consumer of bus events; each event is fully handled before the next is read
#[async_trait(?Send)]
pub trait EventHandler {
    async fn handle_event(&self, event: BusEvent);
}

/// Pump events from `source` into `handler` until `cancel` fires
///
/// A synthetic [`BusEvent::Connected`] precedes the events of every
/// connection. Consecutive connection attempts are spaced at least
/// `retry_interval` apart so a server that keeps closing the stream is not
/// hammered.
pub async fn run_subscription(
    source: Arc<dyn EventSource>,
    handler: Rc<dyn EventHandler>,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Event subscription started");

    while !cancel.is_cancelled() {
        let attempt_started = Instant::now();

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = source.connect() => connected,
        };

        match connected {
            Ok(mut stream) => {
                tracing::debug!("Event stream connected");
                handler.handle_event(BusEvent::Connected).await;

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => None,
                        next = stream.next() => Some(next),
                    };
                    match next {
                        None => break,
                        Some(Some(Ok(event))) => handler.handle_event(event).await,
                        Some(Some(Err(e))) => {
                            tracing::warn!("Event stream failed: {}", e);
                            break;
                        }
                        Some(None) => {
                            tracing::info!("Event stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to connect to event stream: {}", e),
        }

        if cancel.is_cancelled() {
            break;
        }

        let elapsed = attempt_started.elapsed();
        if elapsed < retry_interval {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(retry_interval - elapsed) => {}
            }
        }
        tracing::debug!("Reconnecting to event stream");
    }

    tracing::info!("Event subscription stopped");
}
