//! Per-connection session state
//!
//! The session server owns durable history; this store only tracks what a
//! protocol connection needs on top of it: the working directory, declared
//! MCP servers, and the model/variant/mode selection with per-mode memory.

use crate::error::{BridgeError, Result};
use crate::session_api::ModelRef;
use agent_client_protocol::McpServer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Model and variant remembered for a mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModeSelection {
    pub model: Option<ModelRef>,
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub id: String,
    pub cwd: String,
    #[serde(skip)]
    pub mcp_servers: Vec<McpServer>,
    pub created_at: DateTime<Utc>,
    pub model: Option<ModelRef>,
    pub variant: Option<String>,
    pub mode_id: Option<String>,
    pub modes: HashMap<String, ModeSelection>,
}

impl SessionState {
    fn new(id: String, cwd: String, mcp_servers: Vec<McpServer>, model: Option<ModelRef>) -> Self {
        Self {
            id,
            cwd,
            mcp_servers,
            created_at: Utc::now(),
            model,
            variant: None,
            mode_id: None,
            modes: HashMap::new(),
        }
    }

    pub fn selection(&self) -> ModeSelection {
        ModeSelection {
            model: self.model.clone(),
            variant: self.variant.clone(),
        }
    }

    /// Snapshot the active selection under the outgoing mode, then restore the
    /// incoming mode's memory (or nothing, if it was never visited)
    fn switch_mode(&mut self, mode_id: &str) {
        if let Some(active) = self.mode_id.take() {
            let snapshot = self.selection();
            self.modes.insert(active, snapshot);
        }

        let restored = self.modes.get(mode_id).cloned().unwrap_or_default();
        self.mode_id = Some(mode_id.to_string());
        self.model = restored.model;
        self.variant = restored.variant;
    }
}

/// In-memory store of protocol sessions owned by one connection
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a brand-new session under the id assigned by the session server
    pub async fn create(
        &self,
        id: impl Into<String>,
        cwd: impl Into<String>,
        mcp_servers: Vec<McpServer>,
        model: Option<ModelRef>,
    ) -> SessionState {
        self.register(id.into(), cwd.into(), mcp_servers, model, "create")
            .await
    }

    pub async fn load(
        &self,
        id: impl Into<String>,
        cwd: impl Into<String>,
        mcp_servers: Vec<McpServer>,
        model: Option<ModelRef>,
    ) -> SessionState {
        self.register(id.into(), cwd.into(), mcp_servers, model, "load")
            .await
    }

    pub async fn fork(
        &self,
        id: impl Into<String>,
        cwd: impl Into<String>,
        mcp_servers: Vec<McpServer>,
        model: Option<ModelRef>,
    ) -> SessionState {
        self.register(id.into(), cwd.into(), mcp_servers, model, "fork")
            .await
    }

    pub async fn resume(
        &self,
        id: impl Into<String>,
        cwd: impl Into<String>,
        mcp_servers: Vec<McpServer>,
        model: Option<ModelRef>,
    ) -> SessionState {
        self.register(id.into(), cwd.into(), mcp_servers, model, "resume")
            .await
    }

    async fn register(
        &self,
        id: String,
        cwd: String,
        mcp_servers: Vec<McpServer>,
        model: Option<ModelRef>,
        origin: &str,
    ) -> SessionState {
        let state = SessionState::new(id.clone(), cwd, mcp_servers, model);
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, state.clone());
        debug!(
            "Registered session {} via {} ({} total)",
            state.id,
            origin,
            sessions.len()
        );
        state
    }

    pub async fn get(&self, id: &str) -> Result<SessionState> {
        self.try_get(id)
            .await
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    pub async fn try_get(&self, id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn remove(&self, id: &str) -> Option<SessionState> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn get_model(&self, id: &str) -> Result<Option<ModelRef>> {
        Ok(self.get(id).await?.model)
    }

    pub async fn set_model(&self, id: &str, model: Option<ModelRef>) -> Result<()> {
        self.update(id, |state| state.model = model).await
    }

    pub async fn get_variant(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get(id).await?.variant)
    }

    pub async fn set_variant(&self, id: &str, variant: Option<String>) -> Result<()> {
        self.update(id, |state| state.variant = variant).await
    }

    pub async fn set_mode(&self, id: &str, mode_id: &str) -> Result<SessionState> {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        state.switch_mode(mode_id);
        debug!(
            "Session {} switched to mode {} (model: {:?}, variant: {:?})",
            id, mode_id, state.model, state.variant
        );
        Ok(state.clone())
    }

    pub async fn get_mode_selection(
        &self,
        id: &str,
        mode_id: &str,
    ) -> Result<Option<ModeSelection>> {
        Ok(self.get(id).await?.modes.get(mode_id).cloned())
    }

    pub async fn set_mode_selection(
        &self,
        id: &str,
        mode_id: &str,
        selection: ModeSelection,
    ) -> Result<()> {
        self.update(id, |state| {
            state.modes.insert(mode_id.to_string(), selection);
        })
        .await
    }

    async fn update(&self, id: &str, apply: impl FnOnce(&mut SessionState)) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(state) => {
                apply(state);
                Ok(())
            }
            None => Err(BridgeError::SessionNotFound(id.to_string())),
        }
    }
}
