//! Agent trait implementation for BridgeAgent
//!
//! Protocol methods handled here:
//! - initialize/authenticate
//! - new_session/load_session/set_session_mode
//! - prompt/cancel
//! - ext_method (session list, fork, resume, set model)/ext_notification

use crate::agent::{
    BridgeAgent, ResolvedSession, SESSION_FORK_METHOD, SESSION_LIST_METHOD,
    SESSION_RESUME_METHOD, SESSION_SET_MODEL_METHOD,
};
use crate::agent_notifications::to_raw_json;
use crate::error::BridgeError;
use crate::model_resolution::selectable_modes;
use crate::session_loading::{
    parse_params, ExistingSessionParams, ListSessionsParams, SessionOrigin, SetModelParams,
};
use agent_client_protocol::{
    Agent, AuthMethod, AuthMethodAgent, AuthenticateRequest, AuthenticateResponse,
    CancelNotification, CurrentModeUpdate, ExtNotification, ExtRequest, ExtResponse,
    Implementation, InitializeRequest, InitializeResponse, LoadSessionRequest,
    LoadSessionResponse, NewSessionRequest, NewSessionResponse, PromptRequest, PromptResponse,
    ProtocolVersion, SessionId, SessionModeId, SessionUpdate, SetSessionModeRequest,
    SetSessionModeResponse,
};
use serde_json::json;

/// Auth method advertised so clients can react to auth-required errors
pub const LOGIN_AUTH_METHOD: &str = "acp-bridge-login";

/// Body of fork/resume responses
fn session_body(resolved: &ResolvedSession) -> serde_json::Value {
    json!({
        "sessionId": resolved.state.id,
        "modes": resolved.mode_state(),
        "_meta": resolved.model_meta(),
    })
}

#[async_trait::async_trait(?Send)]
impl Agent for BridgeAgent {
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializeResponse, agent_client_protocol::Error> {
        self.log_request("initialize", &request);
        tracing::info!(
            "Initializing bridge with client capabilities: {:?}",
            request.client_capabilities
        );

        self.start_event_subscription();

        let auth_method = AuthMethod::Agent(
            AuthMethodAgent::new(LOGIN_AUTH_METHOD, "Log in to a model provider")
                .description("Run the session server's login flow, then retry".to_string()),
        );
        let agent_info = Implementation::new("acp-bridge", env!("CARGO_PKG_VERSION"))
            .title(format!("ACP Bridge v{}", env!("CARGO_PKG_VERSION")));

        let response = InitializeResponse::new(ProtocolVersion::V1)
            .agent_capabilities(self.capabilities.clone())
            .auth_methods(vec![auth_method])
            .agent_info(agent_info);

        self.log_response("initialize", &response);
        Ok(response)
    }

    async fn authenticate(
        &self,
        request: AuthenticateRequest,
    ) -> Result<AuthenticateResponse, agent_client_protocol::Error> {
        self.log_request("authenticate", &request);
        // Credentials live with the session server
        tracing::info!("Authentication requested with {:?}", request.method_id);
        Ok(AuthenticateResponse::default())
    }

    async fn new_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<NewSessionResponse, agent_client_protocol::Error> {
        self.log_request("new_session", &request);
        let cwd = request.cwd.to_string_lossy().to_string();

        let resolved = self
            .open_session(SessionOrigin::New, None, &cwd, request.mcp_servers)
            .await?;

        let response = NewSessionResponse::new(SessionId::new(resolved.state.id.clone()))
            .modes(resolved.mode_state())
            .meta(resolved.model_meta());
        self.log_response("new_session", &response);
        Ok(response)
    }

    async fn load_session(
        &self,
        request: LoadSessionRequest,
    ) -> Result<LoadSessionResponse, agent_client_protocol::Error> {
        self.log_request("load_session", &request);
        let cwd = request.cwd.to_string_lossy().to_string();
        let session_id = request.session_id.0.to_string();

        let resolved = self
            .open_session(
                SessionOrigin::Load,
                Some(&session_id),
                &cwd,
                request.mcp_servers,
            )
            .await?;

        let response = LoadSessionResponse::new()
            .modes(resolved.mode_state())
            .meta(resolved.model_meta());
        self.log_response("load_session", &response);
        Ok(response)
    }

    async fn set_session_mode(
        &self,
        request: SetSessionModeRequest,
    ) -> Result<SetSessionModeResponse, agent_client_protocol::Error> {
        self.log_request("set_session_mode", &request);
        let session_id = request.session_id.0.to_string();
        let mode_id = request.mode_id.0.to_string();

        let state = self.sessions.get(&session_id).await?;
        let agents = self.api.agents(&state.cwd).await?;
        let available = selectable_modes(&agents);
        if !available.iter().any(|agent| agent.name == mode_id) {
            tracing::error!(
                "Invalid mode '{}' requested. Available modes: {:?}",
                mode_id,
                available.iter().map(|agent| &agent.name).collect::<Vec<_>>()
            );
            return Err(BridgeError::InvalidParams(format!("unknown mode: {}", mode_id)).into());
        }

        self.sessions.set_mode(&session_id, &mode_id).await?;
        let resolved = self.resolve_session(&session_id).await?;

        self.send_update(
            &session_id,
            SessionUpdate::CurrentModeUpdate(CurrentModeUpdate::new(SessionModeId::new(
                mode_id.as_str(),
            ))),
        );

        let response = SetSessionModeResponse::new().meta(resolved.model_meta());
        self.log_response("set_session_mode", &response);
        Ok(response)
    }

    async fn prompt(
        &self,
        request: PromptRequest,
    ) -> Result<PromptResponse, agent_client_protocol::Error> {
        self.log_request("prompt", &request);
        let response = self.handle_prompt(request).await?;
        self.log_response("prompt", &response);
        Ok(response)
    }

    async fn cancel(
        &self,
        notification: CancelNotification,
    ) -> Result<(), agent_client_protocol::Error> {
        self.log_request("cancel", &notification);
        let session_id = notification.session_id.0.to_string();
        tracing::info!("Processing cancellation for session: {}", session_id);

        let Some(state) = self.sessions.try_get(&session_id).await else {
            tracing::warn!("Cancel for unknown session {}", session_id);
            return Ok(());
        };

        self.mark_cancelled(&session_id);
        if let Err(e) = self.api.abort(&session_id, &state.cwd).await {
            tracing::warn!("Failed to abort session {}: {}", session_id, e);
        }
        Ok(())
    }

    async fn ext_method(
        &self,
        request: ExtRequest,
    ) -> Result<ExtResponse, agent_client_protocol::Error> {
        self.log_request("ext_method", &request);
        tracing::info!("Extension method called: {}", request.method);
        let params = request.params.get();

        let body = match request.method.as_ref() {
            SESSION_LIST_METHOD => {
                let params: ListSessionsParams = parse_params(SESSION_LIST_METHOD, params)?;
                serde_json::to_value(self.list_sessions(params).await?)
                    .map_err(BridgeError::from)?
            }
            SESSION_FORK_METHOD | SESSION_RESUME_METHOD => {
                let method = request.method.as_ref();
                let params: ExistingSessionParams = parse_params(method, params)?;
                let origin = if method == SESSION_FORK_METHOD {
                    SessionOrigin::Fork
                } else {
                    SessionOrigin::Resume
                };
                let resolved = self
                    .open_session(
                        origin,
                        Some(&params.session_id),
                        &params.cwd,
                        params.mcp_servers,
                    )
                    .await?;
                session_body(&resolved)
            }
            SESSION_SET_MODEL_METHOD => {
                let params: SetModelParams = parse_params(SESSION_SET_MODEL_METHOD, params)?;
                let resolved = self.set_session_model(params).await?;
                json!({ "_meta": resolved.model_meta() })
            }
            other => {
                tracing::warn!("Unknown extension method: {}", other);
                return Err(agent_client_protocol::Error::method_not_found());
            }
        };

        let response = ExtResponse::new(to_raw_json(&body)?);
        self.log_response("ext_method", &response);
        Ok(response)
    }

    async fn ext_notification(
        &self,
        notification: ExtNotification,
    ) -> Result<(), agent_client_protocol::Error> {
        self.log_request("ext_notification", &notification);
        tracing::info!("Extension notification received: {}", notification.method);
        Ok(())
    }
}
