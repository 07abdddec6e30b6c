//! Prompt handling for the bridge agent
//!
//! Converts ACP content blocks into session server parts, routes slash
//! commands, and runs one turn against the session server.

use crate::agent::BridgeAgent;
use crate::agent_commands::COMPACT_COMMAND;
use crate::error::Result;
use crate::session_api::{CommandInput, MessageInfo, MessageWithParts, PartInput, PromptInput};
use agent_client_protocol::{
    ContentBlock, EmbeddedResourceResource, PromptRequest, PromptResponse, Role, StopReason,
    TextContent,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};

const DEFAULT_BINARY_MIME: &str = "application/octet-stream";

/// Convert client content blocks into parts the session server accepts
///
/// Blocks with no server-side counterpart, and binary blocks whose payload is
/// not valid base64, are logged and dropped.
pub fn content_to_parts(blocks: &[ContentBlock]) -> Vec<PartInput> {
    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        let part = match block {
            ContentBlock::Text(text) => Some(text_part(text)),
            ContentBlock::Image(image) => {
                let url = match &image.uri {
                    Some(uri) => Some(uri.clone()),
                    None => data_url(&image.mime_type, &image.data),
                };
                url.map(|url| PartInput::File {
                    url,
                    mime: image.mime_type.clone(),
                    filename: None,
                })
            }
            ContentBlock::Audio(audio) => {
                data_url(&audio.mime_type, &audio.data).map(|url| PartInput::File {
                    url,
                    mime: audio.mime_type.clone(),
                    filename: None,
                })
            }
            ContentBlock::ResourceLink(link) => Some(PartInput::File {
                mime: link
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BINARY_MIME.to_string()),
                url: link.uri.clone(),
                filename: Some(link.name.clone()),
            }),
            ContentBlock::Resource(embedded) => match &embedded.resource {
                EmbeddedResourceResource::TextResourceContents(resource) => {
                    let mime = resource.mime_type.as_deref();
                    let is_text = mime.is_none_or(|mime| mime.starts_with("text/"));
                    if resource.uri.starts_with("file:") && !is_text {
                        Some(PartInput::File {
                            mime: mime.unwrap_or(DEFAULT_BINARY_MIME).to_string(),
                            url: resource.uri.clone(),
                            filename: filename_from_uri(&resource.uri),
                        })
                    } else {
                        Some(PartInput::text(resource.text.clone()))
                    }
                }
                EmbeddedResourceResource::BlobResourceContents(resource) => {
                    let mime = resource
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BINARY_MIME.to_string());
                    data_url(&mime, &resource.blob).map(|url| PartInput::File {
                        url,
                        mime,
                        filename: filename_from_uri(&resource.uri),
                    })
                }
                _ => {
                    tracing::warn!("Unsupported embedded resource, skipping");
                    None
                }
            },
            _ => {
                tracing::warn!("Unsupported content block type, skipping");
                None
            }
        };
        parts.extend(part);
    }
    parts
}

/// Text for the model only, for the user only, or for both
fn text_part(text: &TextContent) -> PartInput {
    let audience = text
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.audience.as_deref());
    let (synthetic, ignored) = match audience {
        Some([Role::Assistant]) => (Some(true), None),
        Some([Role::User]) => (None, Some(true)),
        _ => (None, None),
    };
    PartInput::Text {
        text: text.text.clone(),
        synthetic,
        ignored,
    }
}

fn data_url(mime: &str, data: &str) -> Option<String> {
    match general_purpose::STANDARD.decode(data) {
        Ok(_) => Some(format!("data:{};base64,{}", mime, data)),
        Err(e) => {
            tracing::warn!("Dropping {} block with invalid base64 data: {}", mime, e);
            None
        }
    }
}

fn filename_from_uri(uri: &str) -> Option<String> {
    let path = match url::Url::parse(uri) {
        Ok(url) => url.path().to_string(),
        Err(_) => uri.to_string(),
    };
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Split `/name args` into the command name and its argument string
pub fn parse_slash_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (name, arguments) = match rest.split_once(char::is_whitespace) {
        Some((name, arguments)) => (name, arguments.trim()),
        None => (rest.trim_end(), ""),
    };
    (!name.is_empty()).then_some((name, arguments))
}

/// `_meta.usage` for the assistant message that ended the turn
pub fn usage_meta(message: &MessageWithParts) -> Option<Map<String, Value>> {
    let MessageInfo::Assistant(assistant) = &message.info else {
        return None;
    };
    let tokens = &assistant.tokens;
    let mut meta = Map::new();
    meta.insert(
        "usage".to_string(),
        json!({
            "inputTokens": tokens.input,
            "outputTokens": tokens.output,
            "thoughtTokens": tokens.reasoning,
            "cachedReadTokens": tokens.cache.read,
            "cachedWriteTokens": tokens.cache.write,
            "totalTokens": tokens.total(),
        }),
    );
    Some(meta)
}

impl BridgeAgent {
    pub(crate) async fn handle_prompt(&self, request: PromptRequest) -> Result<PromptResponse> {
        let session_id = request.session_id.0.to_string();
        let resolved = self.resolve_session(&session_id).await?;
        let directory = resolved.state.cwd.clone();
        // A cancel that arrived between turns does not apply to this one
        self.take_cancelled(&session_id);

        let parts = content_to_parts(&request.prompt);
        let text: String = parts
            .iter()
            .filter_map(|part| match part {
                PartInput::Text { text, .. } => Some(text.as_str()),
                PartInput::File { .. } => None,
            })
            .collect();

        let model = resolved.resolution.model.clone();
        let variant = resolved.resolution.variant.clone();
        let agent = resolved.state.mode_id.clone();

        let outcome = match parse_slash_command(&text) {
            Some((name, arguments)) => {
                self.run_slash_command(&session_id, &directory, name, arguments, &resolved)
                    .await
            }
            None => Ok(None),
        };
        let outcome = match outcome {
            Ok(Some(handled)) => Ok(handled),
            Ok(None) => self
                .api
                .prompt(
                    &session_id,
                    &directory,
                    PromptInput {
                        message_id: None,
                        model: Some(model),
                        agent,
                        variant,
                        parts,
                    },
                )
                .await
                .map(Some),
            Err(e) => Err(e),
        };

        let cancelled = self.take_cancelled(&session_id);
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) if cancelled => {
                tracing::debug!("Turn for session {} ended by cancellation: {}", session_id, e);
                None
            }
            Err(e) => return Err(e),
        };

        self.translator
            .send_usage_update(&session_id, &directory)
            .await;

        let stop_reason = if cancelled {
            StopReason::Cancelled
        } else {
            StopReason::EndTurn
        };
        let mut response = PromptResponse::new(stop_reason);
        if let Some(meta) = reply.as_ref().and_then(usage_meta) {
            response = response.meta(meta);
        }
        Ok(response)
    }

    /// Run a slash command
    ///
    /// `Ok(Some(Some(message)))` when a server command ran, `Ok(Some(None))`
    /// after compaction, and `Ok(None)` when the text is not a known command
    /// and should be sent as a normal prompt.
    async fn run_slash_command(
        &self,
        session_id: &str,
        directory: &str,
        name: &str,
        arguments: &str,
        resolved: &crate::agent::ResolvedSession,
    ) -> Result<Option<Option<MessageWithParts>>> {
        let commands = self.api.commands(directory).await?;
        if commands.iter().any(|command| command.name == name) {
            tracing::info!("Running command /{} for session {}", name, session_id);
            let message = self
                .api
                .command(
                    session_id,
                    directory,
                    CommandInput {
                        command: name.to_string(),
                        arguments: arguments.to_string(),
                        model: Some(resolved.resolution.model.to_string()),
                        agent: resolved.state.mode_id.clone(),
                        variant: resolved.resolution.variant.clone(),
                    },
                )
                .await?;
            return Ok(Some(Some(message)));
        }

        if name == COMPACT_COMMAND {
            tracing::info!("Compacting session {}", session_id);
            self.api
                .summarize(session_id, directory, &resolved.resolution.model)
                .await?;
            return Ok(Some(None));
        }

        Ok(None)
    }
}
