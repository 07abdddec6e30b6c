//! ACP server over byte streams
//!
//! Wires a [`BridgeAgent`] to an [`AgentSideConnection`] and drains the
//! agent's notification queue into the same connection. Must run inside a
//! [`tokio::task::LocalSet`].

use crate::agent::BridgeAgent;
use crate::agent_notifications::forward_notifications;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::event_stream::EventSource;
use crate::session_api::SessionApi;
use agent_client_protocol::{AgentSideConnection, Client};
use futures::{AsyncRead, AsyncWrite};
use std::rc::Rc;
use std::sync::Arc;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

/// Serve one client over the given streams until the input closes
pub async fn serve<R, W>(
    config: BridgeConfig,
    api: Arc<dyn SessionApi>,
    events: Arc<dyn EventSource>,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    let (agent, notifications) = BridgeAgent::new(config, api, events);
    let agent = Rc::new(agent);

    let (connection, handle_io) = AgentSideConnection::new(
        agent.clone(),
        writer,
        reader,
        |fut| {
            tokio::task::spawn_local(fut);
        },
    );
    let connection: Rc<dyn Client> = Rc::new(connection);
    agent.attach_client(connection.clone());

    tokio::task::spawn_local(forward_notifications(notifications, connection));

    tracing::info!("ACP bridge serving");
    let result = handle_io.await;
    agent.shutdown();

    result.map_err(|e| BridgeError::Transport(format!("connection failed: {}", e)))
}

/// Serve one client over stdin/stdout on a fresh [`tokio::task::LocalSet`]
pub async fn run_stdio(
    config: BridgeConfig,
    api: Arc<dyn SessionApi>,
    events: Arc<dyn EventSource>,
) -> Result<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(serve(
            config,
            api,
            events,
            tokio::io::stdin().compat(),
            tokio::io::stdout().compat_write(),
        ))
        .await
}
