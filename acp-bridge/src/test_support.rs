//! In-memory fakes shared by unit and integration tests
//!
//! Compiled for this crate's tests and behind the `test-support` feature.

use crate::error::{BridgeError, Result};
use crate::event_stream::EventSource;
use crate::events::BusEvent;
use crate::session_api::*;
use agent_client_protocol::{
    Client, ExtNotification, ExtRequest, ExtResponse, RequestPermissionOutcome,
    RequestPermissionRequest, RequestPermissionResponse, SelectedPermissionOutcome,
    SessionNotification, WriteTextFileRequest, WriteTextFileResponse,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn model_info(id: &str, variants: &[&str], context: u64) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: id.to_uppercase(),
        limit: ModelLimit { context, output: 0 },
        variants: variants
            .iter()
            .map(|variant| (variant.to_string(), json!({})))
            .collect(),
    }
}

/// Provider `p` with `m1` (variant `fast`) and `m2`, preferring `m1`
pub fn provider_list() -> ProviderList {
    let mut models = IndexMap::new();
    models.insert("m1".to_string(), model_info("m1", &["default", "fast"], 200_000));
    models.insert("m2".to_string(), model_info("m2", &[], 100_000));
    ProviderList {
        providers: vec![Provider {
            id: "p".to_string(),
            name: "P".to_string(),
            models,
        }],
        default: HashMap::from([("p".to_string(), "m1".to_string())]),
    }
}

pub fn agent(name: &str, model: Option<ModelRef>) -> AgentInfo {
    AgentInfo {
        name: name.to_string(),
        description: Some(format!("{} agent", name)),
        mode: AgentMode::Primary,
        hidden: false,
        model,
        variant: None,
    }
}

pub fn assistant_message(
    session_id: &str,
    id: &str,
    input: u64,
    cache_read: u64,
    cost: f64,
) -> MessageWithParts {
    MessageWithParts {
        info: MessageInfo::Assistant(AssistantMessage {
            id: id.to_string(),
            session_id: session_id.to_string(),
            provider_id: "p".to_string(),
            model_id: "m1".to_string(),
            tokens: TokenUsage {
                input,
                output: 10,
                reasoning: 0,
                cache: CacheUsage {
                    read: cache_read,
                    write: 0,
                },
            },
            cost,
        }),
        parts: vec![Part::Text(TextPart {
            id: format!("prt_{}", id),
            session_id: session_id.to_string(),
            message_id: id.to_string(),
            text: "done".to_string(),
            synthetic: false,
            ignored: false,
        })],
    }
}

#[derive(Default)]
pub struct FakeState {
    pub sessions: Vec<SessionInfo>,
    pub messages: HashMap<String, Vec<MessageWithParts>>,
    pub providers: ProviderList,
    pub agents: Vec<AgentInfo>,
    pub commands: Vec<CommandInfo>,
    pub prompts: Vec<(String, PromptInput)>,
    pub command_calls: Vec<(String, CommandInput)>,
    pub summaries: Vec<(String, ModelRef)>,
    pub aborts: Vec<String>,
    pub replies: Vec<(String, PermissionReply)>,
    pub mcp_servers: Vec<(String, McpServerConfig)>,
    pub next_id: usize,
}

/// Session server double backed by plain vectors
#[derive(Default)]
pub struct FakeSessionApi {
    pub state: Mutex<FakeState>,
}

impl FakeSessionApi {
    pub fn new() -> Self {
        let api = Self::default();
        {
            let mut state = api.state.lock().unwrap();
            state.providers = provider_list();
            state.agents = vec![
                agent("build", None),
                agent("plan", Some(ModelRef::new("p", "m2"))),
            ];
            state.commands = vec![CommandInfo {
                name: "review".to_string(),
                description: Some("Review changes".to_string()),
            }];
        }
        api
    }

    pub fn with<R>(&self, apply: impl FnOnce(&mut FakeState) -> R) -> R {
        apply(&mut self.state.lock().unwrap())
    }

    fn session(&self, id: &str) -> Result<SessionInfo> {
        self.with(|state| {
            state
                .sessions
                .iter()
                .find(|session| session.id == id)
                .cloned()
                .ok_or_else(|| BridgeError::Api(format!("no session {}", id)))
        })
    }

    fn reply(&self, session_id: &str) -> MessageWithParts {
        let message = assistant_message(session_id, "msg_reply", 1_000, 500, 0.5);
        self.with(|state| {
            state
                .messages
                .entry(session_id.to_string())
                .or_default()
                .push(message.clone())
        });
        message
    }
}

#[async_trait]
impl SessionApi for FakeSessionApi {
    async fn create_session(&self, directory: &str, title: Option<&str>) -> Result<SessionInfo> {
        Ok(self.with(|state| {
            state.next_id += 1;
            let session = SessionInfo {
                id: format!("ses_{}", state.next_id),
                title: title.unwrap_or("New session").to_string(),
                directory: directory.to_string(),
                parent_id: None,
                time: SessionTime {
                    created: 1_000 * state.next_id as i64,
                    updated: 1_000 * state.next_id as i64,
                },
            };
            state.sessions.push(session.clone());
            session
        }))
    }

    async fn get_session(&self, session_id: &str, _directory: &str) -> Result<SessionInfo> {
        self.session(session_id)
    }

    async fn list_sessions(&self, directory: Option<&str>) -> Result<Vec<SessionInfo>> {
        Ok(self.with(|state| {
            state
                .sessions
                .iter()
                .filter(|session| directory.is_none_or(|dir| session.directory == dir))
                .cloned()
                .collect()
        }))
    }

    async fn fork_session(
        &self,
        session_id: &str,
        directory: &str,
        _message_id: Option<&str>,
    ) -> Result<SessionInfo> {
        let parent = self.session(session_id)?;
        let mut forked = self.create_session(directory, Some(&parent.title)).await?;
        forked.parent_id = Some(parent.id.clone());
        self.with(|state| {
            let history = state.messages.get(&parent.id).cloned().unwrap_or_default();
            state.messages.insert(forked.id.clone(), history);
        });
        Ok(forked)
    }

    async fn messages(&self, session_id: &str, _directory: &str) -> Result<Vec<MessageWithParts>> {
        Ok(self.with(|state| state.messages.get(session_id).cloned().unwrap_or_default()))
    }

    async fn prompt(
        &self,
        session_id: &str,
        _directory: &str,
        input: PromptInput,
    ) -> Result<MessageWithParts> {
        self.with(|state| state.prompts.push((session_id.to_string(), input)));
        Ok(self.reply(session_id))
    }

    async fn command(
        &self,
        session_id: &str,
        _directory: &str,
        input: CommandInput,
    ) -> Result<MessageWithParts> {
        self.with(|state| state.command_calls.push((session_id.to_string(), input)));
        Ok(self.reply(session_id))
    }

    async fn summarize(&self, session_id: &str, _directory: &str, model: &ModelRef) -> Result<()> {
        self.with(|state| state.summaries.push((session_id.to_string(), model.clone())));
        Ok(())
    }

    async fn abort(&self, session_id: &str, _directory: &str) -> Result<()> {
        self.with(|state| state.aborts.push(session_id.to_string()));
        Ok(())
    }

    async fn providers(&self, _directory: &str) -> Result<ProviderList> {
        Ok(self.with(|state| state.providers.clone()))
    }

    async fn agents(&self, _directory: &str) -> Result<Vec<AgentInfo>> {
        Ok(self.with(|state| state.agents.clone()))
    }

    async fn commands(&self, _directory: &str) -> Result<Vec<CommandInfo>> {
        Ok(self.with(|state| state.commands.clone()))
    }

    async fn reply_permission(
        &self,
        request_id: &str,
        _directory: &str,
        reply: PermissionReply,
    ) -> Result<()> {
        self.with(|state| state.replies.push((request_id.to_string(), reply)));
        Ok(())
    }

    async fn add_mcp_server(
        &self,
        _directory: &str,
        name: &str,
        config: McpServerConfig,
    ) -> Result<()> {
        self.with(|state| state.mcp_servers.push((name.to_string(), config)));
        Ok(())
    }
}

/// Client double that answers permission prompts with a fixed option
pub struct RecordingClient {
    /// Option id to select; `None` cancels the prompt
    pub answer: Option<String>,
    pub permission_requests: RefCell<Vec<RequestPermissionRequest>>,
    pub writes: RefCell<Vec<WriteTextFileRequest>>,
}

impl RecordingClient {
    pub fn answering(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(str::to_string),
            permission_requests: RefCell::new(Vec::new()),
            writes: RefCell::new(Vec::new()),
        }
    }
}

#[async_trait(?Send)]
impl Client for RecordingClient {
    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> agent_client_protocol::Result<RequestPermissionResponse> {
        self.permission_requests.borrow_mut().push(request);
        let outcome = match &self.answer {
            Some(option_id) => RequestPermissionOutcome::Selected(SelectedPermissionOutcome::new(
                option_id.clone(),
            )),
            None => RequestPermissionOutcome::Cancelled,
        };
        Ok(RequestPermissionResponse::new(outcome))
    }

    async fn write_text_file(
        &self,
        request: WriteTextFileRequest,
    ) -> agent_client_protocol::Result<WriteTextFileResponse> {
        self.writes.borrow_mut().push(request);
        Ok(WriteTextFileResponse::default())
    }

    async fn session_notification(
        &self,
        _notification: SessionNotification,
    ) -> agent_client_protocol::Result<()> {
        Ok(())
    }

    async fn ext_method(&self, _request: ExtRequest) -> agent_client_protocol::Result<ExtResponse> {
        Err(agent_client_protocol::Error::method_not_found())
    }

    async fn ext_notification(
        &self,
        _notification: ExtNotification,
    ) -> agent_client_protocol::Result<()> {
        Ok(())
    }
}

/// Event source whose stream never yields
pub struct SilentSource;

#[async_trait]
impl EventSource for SilentSource {
    async fn connect(&self) -> Result<BoxStream<'static, Result<BusEvent>>> {
        Ok(futures::stream::pending().boxed())
    }
}

/// Silent event source that counts connection attempts
#[derive(Default)]
pub struct CountingSource {
    pub connects: AtomicUsize,
}

#[async_trait]
impl EventSource for CountingSource {
    async fn connect(&self) -> Result<BoxStream<'static, Result<BusEvent>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(futures::stream::pending().boxed())
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
