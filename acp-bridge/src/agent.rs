//! ACP agent backed by the external session server

use crate::agent_notifications::{ClientSlot, NotificationSender, OutgoingNotification};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::event_stream::{run_subscription, EventHandler, EventSource};
use crate::event_translator::EventTranslator;
use crate::logging::Pretty;
use crate::model_resolution::{resolve, selectable_modes, ModeDefaults, ModelCatalog, Resolution};
use crate::session::{SessionState, SessionStore};
use crate::session_api::{AgentInfo, ModelRef, SessionApi};
use agent_client_protocol::{
    AgentCapabilities, Client, McpCapabilities, PromptCapabilities, SessionId, SessionMode,
    SessionModeId, SessionModeState, SessionNotification, SessionUpdate,
};
use serde_json::{json, Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Extension methods served through `ext_method`
pub const SESSION_LIST_METHOD: &str = "session/list";
pub const SESSION_FORK_METHOD: &str = "session/fork";
pub const SESSION_RESUME_METHOD: &str = "session/resume";
pub const SESSION_SET_MODEL_METHOD: &str = "session/set_model";

/// Everything the selection logic needs for one session at one point in time
pub(crate) struct ResolvedSession {
    pub state: SessionState,
    pub catalog: ModelCatalog,
    pub agents: Vec<AgentInfo>,
    pub resolution: Resolution,
}

impl ResolvedSession {
    /// `_meta` describing the model selection, attached to session responses
    pub fn model_meta(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert(
            "availableModels".to_string(),
            json!(self.catalog.available_models(true)),
        );
        meta.insert(
            "currentModelId".to_string(),
            json!(self.resolution.model_id(true)),
        );
        meta.insert(
            "availableVariants".to_string(),
            json!(self.resolution.available_variants),
        );
        meta
    }

    /// Mode state for responses; `None` when the server exposes no modes
    pub fn mode_state(&self) -> Option<SessionModeState> {
        let current = self.state.mode_id.as_ref()?;
        let modes = selectable_modes(&self.agents)
            .into_iter()
            .map(|agent| {
                SessionMode::new(agent.name.clone(), agent.name.clone())
                    .description(agent.description.clone())
            })
            .collect();
        Some(SessionModeState::new(
            SessionModeId::new(current.as_str()),
            modes,
        ))
    }
}

/// ACP agent that bridges a client connection to the session server
///
/// One agent serves one client connection. It owns the connection's session
/// store and the background event subscription, and must live on a
/// [`tokio::task::LocalSet`].
pub struct BridgeAgent {
    pub(crate) config: BridgeConfig,
    pub(crate) api: Arc<dyn SessionApi>,
    pub(crate) events: Arc<dyn EventSource>,
    pub(crate) sessions: SessionStore,
    pub(crate) notifications: NotificationSender,
    pub(crate) client: ClientSlot,
    pub(crate) translator: Rc<EventTranslator>,
    pub(crate) capabilities: AgentCapabilities,
    pub(crate) subscription_started: Cell<bool>,
    pub(crate) shutdown: CancellationToken,
    /// Sessions whose in-flight turn was cancelled by the client
    pub(crate) cancelled: RefCell<HashSet<String>>,
}

impl BridgeAgent {
    /// Create an agent and the receiver its notifications are queued on
    ///
    /// The receiver must be drained by [`crate::agent_notifications::forward_notifications`]
    /// once the client connection exists.
    pub fn new(
        config: BridgeConfig,
        api: Arc<dyn SessionApi>,
        events: Arc<dyn EventSource>,
    ) -> (Self, mpsc::UnboundedReceiver<OutgoingNotification>) {
        let (notifications, receiver) = NotificationSender::new();
        let sessions = SessionStore::new();
        let client = ClientSlot::new();
        let translator = Rc::new(EventTranslator::new(
            api.clone(),
            sessions.clone(),
            notifications.clone(),
            client.clone(),
        ));

        let prompt_capabilities = PromptCapabilities::new()
            .image(true)
            .audio(true)
            .embedded_context(true);
        let mcp_capabilities = McpCapabilities::new().http(true).sse(true);

        let mut extensions = Map::new();
        for method in [
            SESSION_LIST_METHOD,
            SESSION_FORK_METHOD,
            SESSION_RESUME_METHOD,
            SESSION_SET_MODEL_METHOD,
        ] {
            extensions.insert(method.to_string(), json!({}));
        }
        let mut meta = Map::new();
        meta.insert("extensions".to_string(), Value::Object(extensions));

        let capabilities = AgentCapabilities::new()
            .load_session(true)
            .prompt_capabilities(prompt_capabilities)
            .mcp_capabilities(mcp_capabilities)
            .meta(meta);

        let agent = Self {
            config,
            api,
            events,
            sessions,
            notifications,
            client,
            translator,
            capabilities,
            subscription_started: Cell::new(false),
            shutdown: CancellationToken::new(),
            cancelled: RefCell::new(HashSet::new()),
        };
        (agent, receiver)
    }

    /// Attach the connection used for permission prompts and file writes
    pub fn attach_client(&self, client: Rc<dyn Client>) -> bool {
        self.client.attach(client)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Stop the event subscription
    pub fn shutdown(&self) {
        tracing::info!("Shutting down bridge agent");
        self.shutdown.cancel();
    }

    /// Start consuming bus events; later calls do nothing
    pub(crate) fn start_event_subscription(&self) {
        if self.subscription_started.replace(true) {
            return;
        }
        let handler: Rc<dyn EventHandler> = self.translator.clone();
        tokio::task::spawn_local(run_subscription(
            self.events.clone(),
            handler,
            self.config.event_retry_interval(),
            self.shutdown.child_token(),
        ));
    }

    /// Log incoming request for debugging purposes
    pub(crate) fn log_request<T: std::fmt::Debug + serde::Serialize>(
        &self,
        method: &str,
        request: &T,
    ) {
        tracing::debug!("Handling {} request: {}", method, Pretty(request));
    }

    /// Log outgoing response for debugging purposes
    pub(crate) fn log_response<T: std::fmt::Debug + serde::Serialize>(
        &self,
        method: &str,
        response: &T,
    ) {
        tracing::debug!("Returning {} response: {}", method, Pretty(response));
    }

    pub(crate) fn send_update(&self, session_id: &str, update: SessionUpdate) {
        let notification = SessionNotification::new(SessionId::new(session_id.to_string()), update);
        if let Err(e) = self.notifications.send_update(notification) {
            tracing::error!("Failed to queue update for session {}: {}", session_id, e);
        }
    }

    pub(crate) async fn catalog(&self, directory: &str) -> Result<ModelCatalog> {
        Ok(ModelCatalog::new(self.api.providers(directory).await?))
    }

    pub(crate) fn fallback_model(&self, catalog: &ModelCatalog) -> Result<ModelRef> {
        catalog.default_model(self.config.default_model.as_deref())
    }

    /// Resolve the effective selection of a session, healing stale choices
    pub(crate) async fn resolve_session(&self, session_id: &str) -> Result<ResolvedSession> {
        let state = self.sessions.get(session_id).await?;
        let catalog = self.catalog(&state.cwd).await?;
        let fallback = self.fallback_model(&catalog)?;
        let agents = self.api.agents(&state.cwd).await?;
        self.resolve_with(state, catalog, agents, &fallback).await
    }

    pub(crate) async fn resolve_with(
        &self,
        state: SessionState,
        catalog: ModelCatalog,
        agents: Vec<AgentInfo>,
        fallback: &ModelRef,
    ) -> Result<ResolvedSession> {
        let mode_defaults = state
            .mode_id
            .as_ref()
            .and_then(|mode_id| agents.iter().find(|agent| &agent.name == mode_id))
            .map(ModeDefaults::from);
        let resolution = resolve(
            &state.selection(),
            mode_defaults.as_ref(),
            fallback,
            &catalog,
        );

        if resolution.healed_model {
            self.sessions
                .set_model(&state.id, Some(resolution.model.clone()))
                .await?;
        }
        if resolution.cleared_variant {
            self.sessions.set_variant(&state.id, None).await?;
        }
        let state = if resolution.healed_model || resolution.cleared_variant {
            self.sessions.get(&state.id).await?
        } else {
            state
        };

        Ok(ResolvedSession {
            state,
            catalog,
            agents,
            resolution,
        })
    }

    /// Mark the in-flight turn of a session as cancelled
    pub(crate) fn mark_cancelled(&self, session_id: &str) {
        self.cancelled.borrow_mut().insert(session_id.to_string());
    }

    /// Consume the cancellation mark, returning whether it was set
    pub(crate) fn take_cancelled(&self, session_id: &str) -> bool {
        self.cancelled.borrow_mut().remove(session_id)
    }
}

impl Drop for BridgeAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSessionApi, SilentSource};

    fn agent() -> (BridgeAgent, Arc<FakeSessionApi>) {
        let api = Arc::new(FakeSessionApi::new());
        let (agent, _receiver) =
            BridgeAgent::new(BridgeConfig::default(), api.clone(), Arc::new(SilentSource));
        (agent, api)
    }

    #[test]
    fn test_capabilities_advertise_extensions() {
        let (agent, _) = agent();
        assert!(agent.capabilities.load_session);
        let meta = agent.capabilities.meta.as_ref().unwrap();
        let extensions = meta["extensions"].as_object().unwrap();
        assert!(extensions.contains_key(SESSION_LIST_METHOD));
        assert!(extensions.contains_key(SESSION_SET_MODEL_METHOD));
    }

    #[tokio::test]
    async fn test_resolve_heals_unavailable_session_model() {
        let (agent, _) = agent();
        agent
            .sessions
            .create("ses_1", "/repo", Vec::new(), Some(ModelRef::new("gone", "x")))
            .await;

        let resolved = agent.resolve_session("ses_1").await.unwrap();
        assert_eq!(resolved.resolution.model, ModelRef::new("p", "m1"));
        assert_eq!(
            agent.sessions.get_model("ses_1").await.unwrap(),
            Some(ModelRef::new("p", "m1"))
        );
        assert_eq!(resolved.model_meta()["currentModelId"], "p/m1");
    }

    #[tokio::test]
    async fn test_resolve_unknown_session_fails() {
        let (agent, _) = agent();
        assert!(agent.resolve_session("missing").await.is_err());
    }

    #[test]
    fn test_cancel_mark_is_consumed_once() {
        let (agent, _) = agent();
        agent.mark_cancelled("ses_1");
        assert!(agent.take_cancelled("ses_1"));
        assert!(!agent.take_cancelled("ses_1"));
    }
}
