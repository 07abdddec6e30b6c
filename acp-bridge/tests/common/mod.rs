//! Shared harness for protocol-level tests
//!
//! Runs the bridge behind a real [`ClientSideConnection`] over `piper` pipes,
//! with the crate's fake session server and a channel-fed event bus.

#![allow(dead_code)]

pub use acp_bridge::test_support::eventually;
use acp_bridge::test_support::FakeSessionApi;
use acp_bridge::{serve, BridgeConfig, BusEvent, EventSource, Result};
use agent_client_protocol::{
    Client, ClientSideConnection, ExtNotification, ExtRequest, ExtResponse,
    RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
    SelectedPermissionOutcome, SessionNotification, WriteTextFileRequest, WriteTextFileResponse,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Event bus fed by the test; the first connection receives every event sent
pub struct ChannelEventSource {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BusEvent>>>,
}

impl ChannelEventSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<BusEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
            sender,
        )
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn connect(&self) -> Result<BoxStream<'static, Result<BusEvent>>> {
        match self.receiver.lock().unwrap().take() {
            Some(mut receiver) => Ok(futures::stream::poll_fn(move |cx| receiver.poll_recv(cx))
                .map(Ok)
                .boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// Everything the bridge sent to the client
#[derive(Default)]
pub struct ClientLog {
    pub notifications: RefCell<Vec<SessionNotification>>,
    pub ext_notifications: RefCell<Vec<ExtNotification>>,
    pub permission_requests: RefCell<Vec<RequestPermissionRequest>>,
}

/// Client that records what the bridge sends and answers permissions
#[derive(Clone)]
pub struct RecordingClient {
    pub permission_answer: Option<String>,
    pub log: Rc<ClientLog>,
}

#[async_trait(?Send)]
impl Client for RecordingClient {
    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> agent_client_protocol::Result<RequestPermissionResponse> {
        self.log.permission_requests.borrow_mut().push(request);
        let outcome = match &self.permission_answer {
            Some(option_id) => RequestPermissionOutcome::Selected(SelectedPermissionOutcome::new(
                option_id.clone(),
            )),
            None => RequestPermissionOutcome::Cancelled,
        };
        Ok(RequestPermissionResponse::new(outcome))
    }

    async fn write_text_file(
        &self,
        _request: WriteTextFileRequest,
    ) -> agent_client_protocol::Result<WriteTextFileResponse> {
        Ok(WriteTextFileResponse::default())
    }

    async fn session_notification(
        &self,
        notification: SessionNotification,
    ) -> agent_client_protocol::Result<()> {
        self.log.notifications.borrow_mut().push(notification);
        Ok(())
    }

    async fn ext_method(&self, _request: ExtRequest) -> agent_client_protocol::Result<ExtResponse> {
        Err(agent_client_protocol::Error::method_not_found())
    }

    async fn ext_notification(
        &self,
        notification: ExtNotification,
    ) -> agent_client_protocol::Result<()> {
        self.log.ext_notifications.borrow_mut().push(notification);
        Ok(())
    }
}

pub struct Harness {
    pub connection: ClientSideConnection,
    pub log: Rc<ClientLog>,
    pub api: Arc<FakeSessionApi>,
    pub events: mpsc::UnboundedSender<BusEvent>,
}

/// Start the bridge and a connected client; call from inside a `LocalSet`
pub fn start(permission_answer: Option<&str>) -> Harness {
    let (client_to_agent_rx, client_to_agent_tx) = piper::pipe(8192);
    let (agent_to_client_rx, agent_to_client_tx) = piper::pipe(8192);

    let api = Arc::new(FakeSessionApi::new());
    let (source, events) = ChannelEventSource::new();
    let config = BridgeConfig {
        event_retry_interval_ms: 10,
        ..BridgeConfig::default()
    };

    tokio::task::spawn_local({
        let api = api.clone();
        async move {
            if let Err(e) = serve(
                config,
                api,
                Arc::new(source),
                client_to_agent_rx,
                agent_to_client_tx,
            )
            .await
            {
                tracing::debug!("bridge stopped: {}", e);
            }
        }
    });

    let log = Rc::new(ClientLog::default());
    let client = RecordingClient {
        permission_answer: permission_answer.map(str::to_string),
        log: log.clone(),
    };
    let spawn = |fut: futures::future::LocalBoxFuture<'static, ()>| {
        tokio::task::spawn_local(fut);
    };
    let (connection, client_io) =
        ClientSideConnection::new(client, client_to_agent_tx, agent_to_client_rx, spawn);
    tokio::task::spawn_local(client_io);

    Harness {
        connection,
        log,
        api,
        events,
    }
}
