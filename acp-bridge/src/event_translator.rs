//! Translation of bus events into ACP session notifications
//!
//! The translator is the single consumer of the event subscription. Tool,
//! text and reasoning parts become notifications immediately; permission
//! prompts are handed to the [`PermissionQueue`] so a slow client answer never
//! stalls the stream.

use crate::agent_notifications::{to_raw_json, ClientSlot, NotificationSender};
use crate::error::{BridgeError, Result};
use crate::event_stream::EventHandler;
use crate::events::{BusEvent, PartUpdated, PermissionAsked};
use crate::model_resolution::ModelCatalog;
use crate::permission_queue::PermissionQueue;
use crate::plan::{parse_todos, todos_to_acp_plan};
use crate::session::SessionStore;
use crate::session_api::{
    FilePart, MessageInfo, MessageWithParts, Part, PermissionReply, SessionApi, TextPart,
    ToolPart, ToolState,
};
use crate::tool_classification::{classify, diff_content, title, KnownTool};
use agent_client_protocol::{
    Annotations, Content, ContentBlock, ContentChunk, ExtNotification, PermissionOption,
    PermissionOptionKind, RequestPermissionOutcome, RequestPermissionRequest, ResourceLink, Role,
    SelectedPermissionOutcome, SessionId, SessionNotification, SessionUpdate, TextContent,
    ToolCall, ToolCallContent, ToolCallId, ToolCallStatus, ToolCallUpdate, ToolCallUpdateFields,
    WriteTextFileRequest,
};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Extension notification carrying context window usage and cost
pub const USAGE_UPDATE_METHOD: &str = "_acp-bridge/usage_update";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageUpdate {
    pub session_id: String,
    /// Tokens currently occupying the context window
    pub used: u64,
    /// Context window size of the model
    pub size: u64,
    pub cost: UsageCost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageCost {
    pub amount: f64,
    pub currency: String,
}

/// Turns bus events into client notifications for the sessions it knows
pub struct EventTranslator {
    api: Arc<dyn SessionApi>,
    sessions: SessionStore,
    notifications: NotificationSender,
    client: ClientSlot,
    permissions: PermissionQueue,
    /// Tool calls already announced on the current connection
    announced: RefCell<HashSet<String>>,
}

impl EventTranslator {
    pub fn new(
        api: Arc<dyn SessionApi>,
        sessions: SessionStore,
        notifications: NotificationSender,
        client: ClientSlot,
    ) -> Self {
        Self {
            api,
            sessions,
            notifications,
            client,
            permissions: PermissionQueue::new(),
            announced: RefCell::new(HashSet::new()),
        }
    }

    fn send(&self, session_id: &str, update: SessionUpdate) {
        let notification = SessionNotification::new(SessionId::new(session_id.to_string()), update);
        if let Err(e) = self.notifications.send_update(notification) {
            tracing::error!("Failed to queue notification for session {}: {}", session_id, e);
        }
    }

    /// Record `call_id` as announced; false if it already was
    fn announce(&self, call_id: &str) -> bool {
        self.announced.borrow_mut().insert(call_id.to_string())
    }

    async fn handle_permission_asked(&self, asked: PermissionAsked) {
        let Some(session) = self.sessions.try_get(&asked.session_id).await else {
            tracing::trace!(
                "Dropping permission {} for unknown session {}",
                asked.id,
                asked.session_id
            );
            return;
        };

        let api = self.api.clone();
        let client = self.client.clone();
        let session_id = asked.session_id.clone();
        // Completion is tracked by the queue itself; the stream moves on
        let _done = self.permissions.enqueue(&session_id, async move {
            resolve_permission(api, client, asked, session.cwd).await
        });
    }

    async fn handle_part_updated(&self, updated: PartUpdated) {
        let session_id = match &updated.part {
            Part::Text(part) => &part.session_id,
            Part::Reasoning(part) => &part.session_id,
            Part::Tool(part) => &part.session_id,
            Part::File(part) => &part.session_id,
            Part::Other => {
                tracing::trace!("Ignoring untranslated part");
                return;
            }
        };
        if !self.sessions.contains(session_id).await {
            tracing::trace!("Ignoring part for unknown session {}", session_id);
            return;
        }

        match updated.part {
            Part::Tool(part) => self.handle_tool_part(&part),
            Part::Text(part) => {
                if let Some(delta) = updated.delta.filter(|delta| !delta.is_empty()) {
                    let update = SessionUpdate::AgentMessageChunk(ContentChunk::new(text_block(
                        &part, delta,
                    )));
                    self.send(&part.session_id, update);
                }
            }
            Part::Reasoning(part) => {
                if let Some(delta) = updated.delta.filter(|delta| !delta.is_empty()) {
                    let chunk = ContentChunk::new(ContentBlock::from(delta));
                    let update = SessionUpdate::AgentThoughtChunk(chunk);
                    self.send(&part.session_id, update);
                }
            }
            Part::File(_) | Part::Other => {}
        }
    }

    fn handle_tool_part(&self, part: &ToolPart) {
        if self.announce(&part.call_id) {
            self.send(
                &part.session_id,
                SessionUpdate::ToolCall(tool_call_start(part)),
            );
        }
        for update in tool_state_updates(part) {
            self.send(&part.session_id, update);
        }
        if matches!(
            part.state,
            ToolState::Completed { .. } | ToolState::Error { .. }
        ) {
            self.announced.borrow_mut().remove(&part.call_id);
        }
    }

    /// Render a stored message as the notifications a live turn would have sent
    pub fn replay_message(&self, session_id: &str, message: &MessageWithParts) {
        let from_user = matches!(message.info, MessageInfo::User(_));
        for part in &message.parts {
            match part {
                Part::Text(text) if !text.text.is_empty() => {
                    let chunk = ContentChunk::new(text_block(text, text.text.clone()));
                    let update = if from_user {
                        SessionUpdate::UserMessageChunk(chunk)
                    } else {
                        SessionUpdate::AgentMessageChunk(chunk)
                    };
                    self.send(session_id, update);
                }
                Part::Reasoning(reasoning) if !reasoning.text.is_empty() => {
                    self.send(
                        session_id,
                        SessionUpdate::AgentThoughtChunk(ContentChunk::new(ContentBlock::from(
                            reasoning.text.clone(),
                        ))),
                    );
                }
                Part::Tool(tool) => {
                    self.send(session_id, SessionUpdate::ToolCall(tool_call_start(tool)));
                    for update in tool_state_updates(tool) {
                        self.send(session_id, update);
                    }
                }
                Part::File(file) => {
                    let chunk = ContentChunk::new(file_block(file));
                    let update = if from_user {
                        SessionUpdate::UserMessageChunk(chunk)
                    } else {
                        SessionUpdate::AgentMessageChunk(chunk)
                    };
                    self.send(session_id, update);
                }
                _ => {}
            }
        }
    }

    /// Push context usage and cumulative cost for a session
    ///
    /// Failures are logged; usage reporting never fails the caller.
    pub async fn send_usage_update(&self, session_id: &str, directory: &str) {
        if let Err(e) = self.try_send_usage_update(session_id, directory).await {
            tracing::warn!("Failed to send usage update for session {}: {}", session_id, e);
        }
    }

    async fn try_send_usage_update(&self, session_id: &str, directory: &str) -> Result<()> {
        let messages = self.api.messages(session_id, directory).await?;
        let assistants: Vec<_> = messages
            .iter()
            .filter_map(|message| match &message.info {
                MessageInfo::Assistant(assistant) => Some(assistant),
                MessageInfo::User(_) => None,
            })
            .collect();
        let Some(latest) = assistants.last() else {
            return Ok(());
        };

        let catalog = ModelCatalog::new(self.api.providers(directory).await?);
        let Some(size) = catalog.context_limit(&latest.model()) else {
            tracing::debug!("No context limit known for {}", latest.model());
            return Ok(());
        };

        let update = UsageUpdate {
            session_id: session_id.to_string(),
            used: latest.tokens.input + latest.tokens.cache.read,
            size,
            cost: UsageCost {
                amount: assistants.iter().map(|assistant| assistant.cost).sum(),
                currency: "USD".to_string(),
            },
        };
        self.notifications.send_ext(ExtNotification::new(
            USAGE_UPDATE_METHOD,
            to_raw_json(&update)?,
        ))
    }
}

#[async_trait(?Send)]
impl EventHandler for EventTranslator {
    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                tracing::debug!("Event stream (re)connected, resetting announced tool calls");
                self.announced.borrow_mut().clear();
            }
            BusEvent::PermissionAsked(asked) => self.handle_permission_asked(asked).await,
            BusEvent::PartUpdated(updated) => self.handle_part_updated(updated).await,
            BusEvent::Other(event_type) => tracing::trace!("Ignoring event {}", event_type),
        }
    }
}

fn text_block(part: &TextPart, text: String) -> ContentBlock {
    let audience = if part.synthetic {
        Some(vec![Role::Assistant])
    } else if part.ignored {
        Some(vec![Role::User])
    } else {
        None
    };
    let content = TextContent::new(text);
    ContentBlock::Text(match audience {
        Some(audience) => content.annotations(Annotations::new().audience(audience)),
        None => content,
    })
}

fn file_block(file: &FilePart) -> ContentBlock {
    let name = file.filename.clone().unwrap_or_else(|| file.url.clone());
    ContentBlock::ResourceLink(
        ResourceLink::new(name, file.url.clone()).mime_type(file.mime.clone()),
    )
}

/// Initial announcement of a tool call
fn tool_call_start(part: &ToolPart) -> ToolCall {
    let input = part.state.input();
    let classification = classify(&part.tool, input);
    let running_title = match &part.state {
        ToolState::Running { title, .. } => title.as_deref(),
        ToolState::Completed { title, .. } => Some(title.as_str()),
        _ => None,
    };
    ToolCall::new(
        ToolCallId::new(part.call_id.clone()),
        title(&part.tool, input, running_title),
    )
    .kind(classification.kind)
    .status(ToolCallStatus::Pending)
    .locations(classification.acp_locations())
    .raw_input(input.clone())
}

/// Updates describing the tool's current state; empty while pending
fn tool_state_updates(part: &ToolPart) -> Vec<SessionUpdate> {
    let call_id = ToolCallId::new(part.call_id.clone());
    let classification = classify(&part.tool, part.state.input());

    match &part.state {
        ToolState::Pending { .. } => Vec::new(),
        ToolState::Running {
            input,
            title: running_title,
            ..
        } => vec![SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
            call_id,
            ToolCallUpdateFields::new()
                .status(ToolCallStatus::InProgress)
                .kind(classification.kind)
                .title(title(&part.tool, input, running_title.as_deref()))
                .locations(classification.acp_locations())
                .raw_input(input.clone()),
        ))],
        ToolState::Completed {
            input,
            output,
            title: completed_title,
            metadata,
        } => {
            let mut content: Vec<ToolCallContent> = Vec::new();
            if !output.is_empty() {
                content.push(ToolCallContent::Content(Content::new(ContentBlock::from(
                    output.clone(),
                ))));
            }
            content.extend(
                diff_content(&part.tool, input, metadata)
                    .iter()
                    .map(|diff| ToolCallContent::Diff(diff.to_acp())),
            );

            let mut updates = vec![SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
                call_id,
                ToolCallUpdateFields::new()
                    .status(ToolCallStatus::Completed)
                    .kind(classification.kind)
                    .title(title(&part.tool, input, Some(completed_title)))
                    .content(content)
                    .raw_output(json!({ "output": output, "metadata": metadata })),
            ))];

            if KnownTool::from_name(&part.tool) == Some(KnownTool::TodoWrite) {
                match parse_todos(output) {
                    Ok(todos) => updates.push(SessionUpdate::Plan(todos_to_acp_plan(&todos))),
                    Err(e) => {
                        tracing::warn!("Todo output for {} not rendered: {}", part.call_id, e)
                    }
                }
            }
            updates
        }
        ToolState::Error { error, .. } => vec![SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
            call_id,
            ToolCallUpdateFields::new()
                .status(ToolCallStatus::Failed)
                .kind(classification.kind)
                .content(vec![ToolCallContent::Content(Content::new(
                    ContentBlock::from(error.clone()),
                ))])
                .raw_output(json!({ "error": error })),
        ))],
    }
}

fn permission_options() -> Vec<PermissionOption> {
    vec![
        PermissionOption::new("once", "Allow once", PermissionOptionKind::AllowOnce),
        PermissionOption::new("always", "Always allow", PermissionOptionKind::AllowAlways),
        PermissionOption::new("reject", "Reject", PermissionOptionKind::RejectOnce),
    ]
}

/// Ask the client, apply an accepted edit, and answer the session server
async fn resolve_permission(
    api: Arc<dyn SessionApi>,
    client: ClientSlot,
    asked: PermissionAsked,
    directory: String,
) -> anyhow::Result<()> {
    let reply = match ask_client(&client, &asked).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Permission {} defaulting to reject: {}", asked.id, e);
            PermissionReply::Reject
        }
    };
    tracing::debug!("Permission {} ({}) answered {:?}", asked.id, asked.permission, reply);

    if reply.is_accepted() && asked.permission == "edit" {
        if let Err(e) = apply_accepted_edit(&client, &asked).await {
            tracing::warn!("Could not apply approved edit for {}: {}", asked.id, e);
        }
    }

    api.reply_permission(&asked.id, &directory, reply)
        .await
        .with_context(|| format!("replying to permission {}", asked.id))
}

async fn ask_client(client: &ClientSlot, asked: &PermissionAsked) -> Result<PermissionReply> {
    let client = client.get()?;
    let call_id = asked
        .tool
        .as_ref()
        .map(|tool| tool.call_id.clone())
        .unwrap_or_else(|| asked.id.clone());

    let mut fields = ToolCallUpdateFields::new()
        .title(permission_title(asked))
        .raw_input(asked.metadata.clone());
    if let Some(path) = asked.metadata.get("filepath").and_then(Value::as_str) {
        fields = fields.locations(vec![agent_client_protocol::ToolCallLocation::new(
            PathBuf::from(path),
        )]);
    }

    let request = RequestPermissionRequest::new(
        SessionId::new(asked.session_id.clone()),
        ToolCallUpdate::new(ToolCallId::new(call_id), fields),
        permission_options(),
    );
    let response = client
        .request_permission(request)
        .await
        .map_err(|e| BridgeError::Transport(format!("permission request failed: {}", e)))?;

    Ok(match response.outcome {
        RequestPermissionOutcome::Selected(SelectedPermissionOutcome { option_id, .. }) => {
            match option_id.0.as_ref() {
                "once" => PermissionReply::Once,
                "always" => PermissionReply::Always,
                _ => PermissionReply::Reject,
            }
        }
        RequestPermissionOutcome::Cancelled | _ => PermissionReply::Reject,
    })
}

fn permission_title(asked: &PermissionAsked) -> String {
    match asked.patterns.as_slice() {
        [] => asked.permission.clone(),
        patterns => format!("{} {}", asked.permission, patterns.join(", ")),
    }
}

/// Write the approved edit through the client so its buffers stay in sync
async fn apply_accepted_edit(client: &ClientSlot, asked: &PermissionAsked) -> Result<()> {
    let (Some(path), Some(diff)) = (
        asked.metadata.get("filepath").and_then(Value::as_str),
        asked.metadata.get("diff").and_then(Value::as_str),
    ) else {
        return Ok(());
    };

    let original = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let patch = diffy::Patch::from_str(diff)
        .map_err(|e| BridgeError::Translation(format!("unparseable diff for {}: {}", path, e)))?;
    let patched = diffy::apply(&original, &patch)
        .map_err(|e| BridgeError::Translation(format!("diff does not apply to {}: {}", path, e)))?;

    let client = client.get()?;
    client
        .write_text_file(WriteTextFileRequest::new(
            SessionId::new(asked.session_id.clone()),
            PathBuf::from(path),
            patched,
        ))
        .await
        .map_err(|e| BridgeError::Transport(format!("write_text_file failed: {}", e)))?;
    tracing::info!("Applied approved edit to {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_notifications::OutgoingNotification;
    use crate::events::PermissionToolRef;
    use crate::test_support::{assistant_message, eventually, FakeSessionApi, RecordingClient};
    use agent_client_protocol::{PlanEntryStatus, ToolKind};
    use std::rc::Rc;
    use tokio::sync::mpsc;
    use tokio::task::LocalSet;

    struct Harness {
        api: Arc<FakeSessionApi>,
        client: Rc<RecordingClient>,
        translator: EventTranslator,
        receiver: mpsc::UnboundedReceiver<OutgoingNotification>,
    }

    async fn harness(answer: Option<&str>) -> Harness {
        let api = Arc::new(FakeSessionApi::new());
        let sessions = SessionStore::new();
        sessions.create("ses_1", "/repo", Vec::new(), None).await;
        let (notifications, receiver) = NotificationSender::new();
        let client = Rc::new(RecordingClient::answering(answer));
        let slot = ClientSlot::new();
        slot.attach(client.clone());
        let translator = EventTranslator::new(api.clone(), sessions, notifications, slot);
        Harness {
            api,
            client,
            translator,
            receiver,
        }
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<OutgoingNotification>) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(notification) = receiver.try_recv() {
            if let OutgoingNotification::Session(notification) = notification {
                updates.push(notification.update);
            }
        }
        updates
    }

    fn tool_part(session_id: &str, tool: &str, state: ToolState) -> BusEvent {
        BusEvent::PartUpdated(PartUpdated {
            part: Part::Tool(ToolPart {
                id: "prt_tool".to_string(),
                session_id: session_id.to_string(),
                message_id: "msg_1".to_string(),
                call_id: "call_1".to_string(),
                tool: tool.to_string(),
                state,
            }),
            delta: None,
        })
    }

    fn asked(session_id: &str, permission: &str, metadata: Value) -> BusEvent {
        BusEvent::PermissionAsked(PermissionAsked {
            id: "per_1".to_string(),
            session_id: session_id.to_string(),
            permission: permission.to_string(),
            patterns: vec!["src/lib.rs".to_string()],
            metadata,
            tool: Some(PermissionToolRef {
                message_id: "msg_1".to_string(),
                call_id: "call_1".to_string(),
            }),
        })
    }

    #[tokio::test]
    async fn test_pending_then_running_announces_once() {
        let mut h = harness(None).await;
        let input = json!({"command": "cargo test", "description": "Run tests"});

        h.translator
            .handle_event(tool_part("ses_1", "bash", ToolState::Pending { input: input.clone() }))
            .await;
        h.translator
            .handle_event(tool_part(
                "ses_1",
                "bash",
                ToolState::Running {
                    input,
                    title: None,
                    metadata: json!({}),
                },
            ))
            .await;

        let updates = drain(&mut h.receiver);
        assert_eq!(updates.len(), 2);
        let SessionUpdate::ToolCall(call) = &updates[0] else {
            panic!("expected tool call, got {:?}", updates[0]);
        };
        assert_eq!(call.kind, ToolKind::Execute);
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert_eq!(call.title, "bash Run tests");
        let SessionUpdate::ToolCallUpdate(update) = &updates[1] else {
            panic!("expected tool call update");
        };
        assert_eq!(update.fields.status, Some(ToolCallStatus::InProgress));
    }

    #[tokio::test]
    async fn test_reconnect_resets_announcements() {
        let mut h = harness(None).await;
        let pending = || tool_part("ses_1", "read", ToolState::Pending { input: json!({}) });

        h.translator.handle_event(pending()).await;
        h.translator.handle_event(pending()).await;
        assert_eq!(drain(&mut h.receiver).len(), 1);

        h.translator.handle_event(BusEvent::Connected).await;
        h.translator.handle_event(pending()).await;
        assert_eq!(drain(&mut h.receiver).len(), 1);
    }

    #[tokio::test]
    async fn test_completed_apply_patch_has_one_diff_per_file() {
        let mut h = harness(None).await;
        let metadata = json!({
            "files": [
                {
                    "filePath": "/repo/a.rs",
                    "before": "fn a() {}\n",
                    "after": "fn a() -> u8 { 1 }\n"
                },
                {"filePath": "/repo/b.rs", "before": "", "after": "pub mod b;\n"}
            ]
        });
        h.translator
            .handle_event(tool_part(
                "ses_1",
                "apply_patch",
                ToolState::Completed {
                    input: json!({"patchText": "*** Begin Patch"}),
                    output: String::new(),
                    title: "Applied patch".to_string(),
                    metadata,
                },
            ))
            .await;

        let updates = drain(&mut h.receiver);
        let SessionUpdate::ToolCallUpdate(update) = updates.last().unwrap() else {
            panic!("expected tool call update");
        };
        assert_eq!(update.fields.status, Some(ToolCallStatus::Completed));
        let diffs: Vec<_> = update
            .fields
            .content
            .as_ref()
            .unwrap()
            .iter()
            .filter_map(|content| match content {
                ToolCallContent::Diff(diff) => Some(diff),
                _ => None,
            })
            .collect();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, PathBuf::from("/repo/a.rs"));
        assert_eq!(diffs[0].old_text.as_deref(), Some("fn a() {}\n"));
        assert_eq!(diffs[0].new_text, "fn a() -> u8 { 1 }\n");
        assert_eq!(diffs[1].path, PathBuf::from("/repo/b.rs"));
        assert_eq!(diffs[1].new_text, "pub mod b;\n");
    }

    #[tokio::test]
    async fn test_todowrite_completion_emits_plan() {
        let mut h = harness(None).await;
        h.translator
            .handle_event(tool_part(
                "ses_1",
                "todowrite",
                ToolState::Completed {
                    input: json!({}),
                    output: r#"[{"content":"Write docs","status":"cancelled","priority":"low"}]"#
                        .to_string(),
                    title: "1 todo".to_string(),
                    metadata: json!({}),
                },
            ))
            .await;

        let updates = drain(&mut h.receiver);
        let SessionUpdate::Plan(plan) = updates.last().unwrap() else {
            panic!("expected plan, got {:?}", updates.last());
        };
        assert_eq!(plan.entries[0].status, PlanEntryStatus::Completed);
    }

    #[tokio::test]
    async fn test_error_state_reports_failure() {
        let mut h = harness(None).await;
        h.translator
            .handle_event(tool_part(
                "ses_1",
                "bash",
                ToolState::Error {
                    input: json!({"command": "false"}),
                    error: "exit status 1".to_string(),
                    metadata: json!({}),
                },
            ))
            .await;

        let updates = drain(&mut h.receiver);
        let SessionUpdate::ToolCallUpdate(update) = updates.last().unwrap() else {
            panic!("expected tool call update");
        };
        assert_eq!(update.fields.status, Some(ToolCallStatus::Failed));
        assert_eq!(
            update.fields.raw_output,
            Some(json!({"error": "exit status 1"}))
        );
    }

    #[tokio::test]
    async fn test_text_and_reasoning_deltas() {
        let mut h = harness(None).await;
        h.translator
            .handle_event(BusEvent::PartUpdated(PartUpdated {
                part: Part::Text(TextPart {
                    id: "prt_1".to_string(),
                    session_id: "ses_1".to_string(),
                    message_id: "msg_1".to_string(),
                    text: "Hello".to_string(),
                    synthetic: true,
                    ignored: false,
                }),
                delta: Some("lo".to_string()),
            }))
            .await;
        h.translator
            .handle_event(BusEvent::PartUpdated(PartUpdated {
                part: Part::Reasoning(crate::session_api::ReasoningPart {
                    id: "prt_2".to_string(),
                    session_id: "ses_1".to_string(),
                    message_id: "msg_1".to_string(),
                    text: "thinking".to_string(),
                }),
                delta: Some("thinking".to_string()),
            }))
            .await;
        // No delta, nothing to stream
        h.translator
            .handle_event(BusEvent::PartUpdated(PartUpdated {
                part: Part::Reasoning(crate::session_api::ReasoningPart {
                    id: "prt_2".to_string(),
                    session_id: "ses_1".to_string(),
                    message_id: "msg_1".to_string(),
                    text: "thinking".to_string(),
                }),
                delta: None,
            }))
            .await;

        let updates = drain(&mut h.receiver);
        assert_eq!(updates.len(), 2);
        let SessionUpdate::AgentMessageChunk(chunk) = &updates[0] else {
            panic!("expected message chunk");
        };
        let ContentBlock::Text(text) = &chunk.content else {
            panic!("expected text");
        };
        assert_eq!(text.text, "lo");
        assert_eq!(
            text.annotations.as_ref().and_then(|a| a.audience.clone()),
            Some(vec![Role::Assistant])
        );
        assert!(matches!(updates[1], SessionUpdate::AgentThoughtChunk(_)));
    }

    #[tokio::test]
    async fn test_unmapped_session_produces_nothing() {
        LocalSet::new()
            .run_until(async {
                let mut h = harness(Some("once")).await;
                h.translator
                    .handle_event(asked("ses_other", "bash", json!({})))
                    .await;
                h.translator
                    .handle_event(tool_part(
                        "ses_other",
                        "bash",
                        ToolState::Pending { input: json!({}) },
                    ))
                    .await;
                tokio::task::yield_now().await;

                assert!(drain(&mut h.receiver).is_empty());
                assert!(h.client.permission_requests.borrow().is_empty());
                assert!(h.api.with(|state| state.replies.is_empty()));
            })
            .await;
    }

    async fn wait_for_reply(api: &FakeSessionApi) {
        assert!(
            eventually(|| api.with(|state| !state.replies.is_empty())).await,
            "permission was never answered"
        );
    }

    #[tokio::test]
    async fn test_accepted_edit_is_applied_through_client() {
        LocalSet::new()
            .run_until(async {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("lib.rs");
                std::fs::write(&path, "fn main() {}\n").unwrap();
                let diff =
                    diffy::create_patch("fn main() {}\n", "fn main() { run(); }\n").to_string();

                let h = harness(Some("once")).await;
                h.translator
                    .handle_event(asked(
                        "ses_1",
                        "edit",
                        json!({"filepath": path.to_string_lossy(), "diff": diff}),
                    ))
                    .await;
                wait_for_reply(&h.api).await;

                let requests = h.client.permission_requests.borrow();
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].options.len(), 3);
                assert_eq!(requests[0].tool_call.tool_call_id.0.as_ref(), "call_1");

                let writes = h.client.writes.borrow();
                assert_eq!(writes.len(), 1);
                assert_eq!(writes[0].content, "fn main() { run(); }\n");
                assert_eq!(
                    h.api.with(|state| state.replies.clone()),
                    vec![("per_1".to_string(), PermissionReply::Once)]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_cancelled_prompt_replies_reject() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None).await;
                h.translator
                    .handle_event(asked(
                        "ses_1",
                        "edit",
                        json!({"filepath": "/nonexistent/x.rs", "diff": "@@"}),
                    ))
                    .await;
                wait_for_reply(&h.api).await;

                assert!(h.client.writes.borrow().is_empty());
                assert_eq!(
                    h.api.with(|state| state.replies.clone()),
                    vec![("per_1".to_string(), PermissionReply::Reject)]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_usage_update_sums_cost() {
        let mut h = harness(None).await;
        h.api.with(|state| {
            state.messages.insert(
                "ses_1".to_string(),
                vec![
                    assistant_message("ses_1", "msg_1", 100, 0, 0.25),
                    assistant_message("ses_1", "msg_2", 3_000, 1_000, 0.5),
                ],
            )
        });

        h.translator.send_usage_update("ses_1", "/repo").await;

        let Ok(OutgoingNotification::Extension(notification)) = h.receiver.try_recv() else {
            panic!("expected usage notification");
        };
        assert_eq!(notification.method.as_ref(), USAGE_UPDATE_METHOD);
        let payload: Value = serde_json::from_str(notification.params.get()).unwrap();
        assert_eq!(
            payload,
            json!({
                "sessionId": "ses_1",
                "used": 4_000,
                "size": 200_000,
                "cost": {"amount": 0.75, "currency": "USD"}
            })
        );
    }

    #[tokio::test]
    async fn test_usage_update_skipped_without_context_limit() {
        let mut h = harness(None).await;
        h.api.with(|state| {
            state.messages.insert(
                "ses_1".to_string(),
                vec![assistant_message("ses_1", "msg_1", 100, 0, 0.25)],
            );
            state.providers = Default::default();
        });

        h.translator.send_usage_update("ses_1", "/repo").await;

        assert!(h.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ignored_text_is_for_the_user_only() {
        let mut h = harness(None).await;
        let message = MessageWithParts {
            info: MessageInfo::User(crate::session_api::UserMessage {
                id: "msg_0".to_string(),
                session_id: "ses_1".to_string(),
                model: None,
                variant: None,
                agent: None,
            }),
            parts: vec![Part::Text(TextPart {
                id: "prt_0".to_string(),
                session_id: "ses_1".to_string(),
                message_id: "msg_0".to_string(),
                text: "shown, not sent to the model".to_string(),
                synthetic: false,
                ignored: true,
            })],
        };

        h.translator.replay_message("ses_1", &message);

        let updates = drain(&mut h.receiver);
        assert_eq!(updates.len(), 1);
        let SessionUpdate::UserMessageChunk(chunk) = &updates[0] else {
            panic!("expected user message chunk");
        };
        let ContentBlock::Text(text) = &chunk.content else {
            panic!("expected text");
        };
        assert_eq!(
            text.annotations.as_ref().and_then(|a| a.audience.clone()),
            Some(vec![Role::User])
        );
    }

    #[tokio::test]
    async fn test_replay_renders_user_and_tool_parts() {
        let mut h = harness(None).await;
        let user = MessageWithParts {
            info: MessageInfo::User(crate::session_api::UserMessage {
                id: "msg_0".to_string(),
                session_id: "ses_1".to_string(),
                model: None,
                variant: None,
                agent: None,
            }),
            parts: vec![Part::Text(TextPart {
                id: "prt_0".to_string(),
                session_id: "ses_1".to_string(),
                message_id: "msg_0".to_string(),
                text: "fix the build".to_string(),
                synthetic: false,
                ignored: false,
            })],
        };
        let mut assistant = assistant_message("ses_1", "msg_1", 1, 0, 0.0);
        assistant.parts.push(Part::Tool(ToolPart {
            id: "prt_t".to_string(),
            session_id: "ses_1".to_string(),
            message_id: "msg_1".to_string(),
            call_id: "call_9".to_string(),
            tool: "read".to_string(),
            state: ToolState::Completed {
                input: json!({"filePath": "/repo/Cargo.toml"}),
                output: "[package]".to_string(),
                title: "Cargo.toml".to_string(),
                metadata: json!({}),
            },
        }));

        h.translator.replay_message("ses_1", &user);
        h.translator.replay_message("ses_1", &assistant);

        let updates = drain(&mut h.receiver);
        assert!(matches!(updates[0], SessionUpdate::UserMessageChunk(_)));
        assert!(matches!(updates[1], SessionUpdate::AgentMessageChunk(_)));
        assert!(matches!(updates[2], SessionUpdate::ToolCall(_)));
        assert!(matches!(updates[3], SessionUpdate::ToolCallUpdate(_)));
        assert_eq!(updates.len(), 4);
    }
}
