//! Session setup for new, loaded, forked and resumed sessions
//!
//! All four entry points share one setup path: resolve the catalog, bind the
//! server session, register local state, pick the mode and model, announce
//! MCP servers, replay history, then push commands and usage.

use crate::agent::{BridgeAgent, ResolvedSession};
use crate::error::{BridgeError, Result};
use crate::model_resolution::{default_mode, selectable_modes, selection_from_history};
use crate::session::ModeSelection;
use crate::session_api::{McpServerConfig, MessageInfo, MessageWithParts, SessionInfo};
use agent_client_protocol::McpServer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a protocol session came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    New,
    Load,
    Fork,
    Resume,
}

impl std::fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionOrigin::New => "new",
            SessionOrigin::Load => "load",
            SessionOrigin::Fork => "fork",
            SessionOrigin::Resume => "resume",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsParams {
    #[serde(default)]
    pub cwd: Option<String>,
    /// Only sessions updated strictly before this timestamp (ms)
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListEntry {
    pub session_id: String,
    pub cwd: String,
    pub title: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionListEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters shared by `session/fork` and `session/resume`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingSessionParams {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModelParams {
    pub session_id: String,
    pub model_id: String,
}

/// Parse extension method parameters, reporting failures as invalid params
pub fn parse_params<T: serde::de::DeserializeOwned>(method: &str, params: &str) -> Result<T> {
    serde_json::from_str(params)
        .map_err(|e| BridgeError::InvalidParams(format!("invalid {} params: {}", method, e)))
}

/// Translate a client-declared MCP server into the session server's form
pub fn mcp_server_config(server: &McpServer) -> Option<(String, McpServerConfig)> {
    match server {
        McpServer::Stdio(stdio) => {
            let mut command = vec![stdio.command.to_string_lossy().to_string()];
            command.extend(stdio.args.iter().cloned());
            let environment: HashMap<String, String> = stdio
                .env
                .iter()
                .map(|var| (var.name.clone(), var.value.clone()))
                .collect();
            Some((
                stdio.name.clone(),
                McpServerConfig::Local {
                    command,
                    environment,
                },
            ))
        }
        McpServer::Http(http) => Some((
            http.name.clone(),
            McpServerConfig::Remote {
                url: http.url.clone(),
                headers: http
                    .headers
                    .iter()
                    .map(|header| (header.name.clone(), header.value.clone()))
                    .collect(),
            },
        )),
        McpServer::Sse(sse) => Some((
            sse.name.clone(),
            McpServerConfig::Remote {
                url: sse.url.clone(),
                headers: sse
                    .headers
                    .iter()
                    .map(|header| (header.name.clone(), header.value.clone()))
                    .collect(),
            },
        )),
        _ => None,
    }
}

/// Agent recorded on the most recent user message
fn remembered_mode(history: &[MessageWithParts]) -> Option<&str> {
    history.iter().rev().find_map(|message| match &message.info {
        MessageInfo::User(user) => Some(user.agent.as_deref()),
        MessageInfo::Assistant(_) => None,
    })?
}

/// One page of sessions, newest first
///
/// The cursor is the `updated` timestamp of the last entry of the previous
/// page; a page is followed by a cursor only when more sessions remain.
pub fn paginate_sessions(
    mut sessions: Vec<SessionInfo>,
    cwd: Option<&str>,
    cursor: Option<&str>,
    page_size: usize,
) -> Result<ListSessionsResponse> {
    let before = cursor
        .map(|cursor| {
            cursor.parse::<i64>().map_err(|_| {
                BridgeError::InvalidParams(format!("invalid session list cursor: {}", cursor))
            })
        })
        .transpose()?;

    sessions.retain(|session| {
        cwd.is_none_or(|cwd| session.directory == cwd)
            && before.is_none_or(|before| session.time.updated < before)
    });
    sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated));

    let page_size = page_size.max(1);
    let has_more = sessions.len() > page_size;
    sessions.truncate(page_size);
    let next_cursor = has_more
        .then(|| sessions.last().map(|session| session.time.updated.to_string()))
        .flatten();

    Ok(ListSessionsResponse {
        sessions: sessions
            .into_iter()
            .map(|session| SessionListEntry {
                session_id: session.id,
                cwd: session.directory,
                title: session.title,
                updated_at: session.time.updated,
            })
            .collect(),
        next_cursor,
    })
}

impl BridgeAgent {
    /// Bind a protocol session to a server session and bring it up to date
    ///
    /// `session_id` names the existing server session for every origin except
    /// [`SessionOrigin::New`].
    pub(crate) async fn open_session(
        &self,
        origin: SessionOrigin,
        session_id: Option<&str>,
        cwd: &str,
        mcp_servers: Vec<McpServer>,
    ) -> Result<ResolvedSession> {
        let catalog = self.catalog(cwd).await?;
        let fallback = self.fallback_model(&catalog)?;

        let existing = || {
            session_id.ok_or_else(|| {
                BridgeError::InvalidParams(format!("{} requires a session id", origin))
            })
        };
        let server_session = match origin {
            SessionOrigin::New => self.api.create_session(cwd, None).await?,
            SessionOrigin::Load | SessionOrigin::Resume => {
                let id = existing()?;
                self.api
                    .get_session(id, cwd)
                    .await
                    .map_err(|e| match e {
                        BridgeError::Api(_) => BridgeError::SessionNotFound(id.to_string()),
                        other => other,
                    })?
            }
            SessionOrigin::Fork => self.api.fork_session(existing()?, cwd, None).await?,
        };
        let id = server_session.id.clone();
        tracing::info!("Opening session {} ({}) in {}", id, origin, cwd);

        let history = match origin {
            SessionOrigin::New => Vec::new(),
            _ => self.api.messages(&id, cwd).await?,
        };

        match origin {
            SessionOrigin::New => self.sessions.create(&id, cwd, mcp_servers.clone(), None).await,
            SessionOrigin::Load => self.sessions.load(&id, cwd, mcp_servers.clone(), None).await,
            SessionOrigin::Fork => self.sessions.fork(&id, cwd, mcp_servers.clone(), None).await,
            SessionOrigin::Resume => {
                self.sessions
                    .resume(&id, cwd, mcp_servers.clone(), None)
                    .await
            }
        };

        let agents = self.api.agents(cwd).await?;
        let initial_mode = default_mode(
            &selectable_modes(&agents),
            remembered_mode(&history),
            self.config.default_agent.as_deref(),
        );
        if let Some(mode) = &initial_mode {
            self.sessions.set_mode(&id, mode).await?;
        }

        if let Some(ModeSelection { model, variant }) = selection_from_history(&history, &catalog) {
            tracing::debug!("Session {} continues with {:?} from history", id, model);
            self.sessions.set_model(&id, model).await?;
            self.sessions.set_variant(&id, variant).await?;
        }

        let state = self.sessions.get(&id).await?;
        let resolved = self.resolve_with(state, catalog, agents, &fallback).await?;

        self.register_mcp_servers(&id, cwd, &mcp_servers).await;

        if origin != SessionOrigin::New {
            tracing::debug!("Replaying {} messages for session {}", history.len(), id);
            for message in &history {
                self.translator.replay_message(&id, message);
            }
        }

        if let Err(e) = self.send_available_commands_update(&id, cwd).await {
            tracing::warn!("Failed to send available commands for session {}: {}", id, e);
        }
        self.translator.send_usage_update(&id, cwd).await;

        Ok(resolved)
    }

    async fn register_mcp_servers(&self, session_id: &str, cwd: &str, servers: &[McpServer]) {
        for server in servers {
            let Some((name, config)) = mcp_server_config(server) else {
                tracing::warn!("Skipping unsupported MCP server for session {}", session_id);
                continue;
            };
            if let Err(e) = self.api.add_mcp_server(cwd, &name, config).await {
                tracing::warn!("Failed to register MCP server {}: {}", name, e);
            }
        }
    }

    pub(crate) async fn list_sessions(
        &self,
        params: ListSessionsParams,
    ) -> Result<ListSessionsResponse> {
        let sessions = self.api.list_sessions(params.cwd.as_deref()).await?;
        paginate_sessions(
            sessions,
            params.cwd.as_deref(),
            params.cursor.as_deref(),
            self.config.session_list_page_size,
        )
    }

    /// Store an explicit `provider/model[/variant]` choice for a session
    pub(crate) async fn set_session_model(
        &self,
        params: SetModelParams,
    ) -> Result<ResolvedSession> {
        let state = self.sessions.get(&params.session_id).await?;
        let catalog = self.catalog(&state.cwd).await?;
        let (model, variant) = catalog.parse_model_id(&params.model_id)?;

        self.sessions
            .set_model(&params.session_id, Some(model.clone()))
            .await?;
        self.sessions
            .set_variant(&params.session_id, variant.clone())
            .await?;
        if let Some(mode_id) = &state.mode_id {
            self.sessions
                .set_mode_selection(
                    &params.session_id,
                    mode_id,
                    ModeSelection {
                        model: Some(model),
                        variant,
                    },
                )
                .await?;
        }
        self.resolve_session(&params.session_id).await
    }
}
