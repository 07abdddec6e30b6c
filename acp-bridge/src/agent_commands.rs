//! Available commands handling for Agent Client Protocol
//!
//! Slash commands come from the session server. The bridge adds `compact`,
//! which it serves itself by asking the server to summarize the session.

use crate::agent::BridgeAgent;
use crate::error::Result;
use crate::session_api::CommandInfo;
use agent_client_protocol::{
    AvailableCommand, AvailableCommandInput, AvailableCommandsUpdate, SessionUpdate,
    UnstructuredCommandInput,
};

/// Command handled by the bridge rather than the session server
pub const COMPACT_COMMAND: &str = "compact";

/// Client-facing command list: server commands plus `compact` unless shadowed
pub fn available_commands(commands: &[CommandInfo]) -> Vec<AvailableCommand> {
    let mut available: Vec<AvailableCommand> = commands
        .iter()
        .map(|command| {
            AvailableCommand::new(
                command.name.clone(),
                command.description.clone().unwrap_or_default(),
            )
            .input(AvailableCommandInput::Unstructured(
                UnstructuredCommandInput::new("arguments"),
            ))
        })
        .collect();

    if !commands.iter().any(|command| command.name == COMPACT_COMMAND) {
        available.push(AvailableCommand::new(
            COMPACT_COMMAND,
            "Summarize the conversation to free up context",
        ));
    }
    available
}

impl BridgeAgent {
    /// Send available commands update notification
    pub(crate) async fn send_available_commands_update(
        &self,
        session_id: &str,
        directory: &str,
    ) -> Result<()> {
        let commands = self.api.commands(directory).await?;
        let available = available_commands(&commands);
        tracing::debug!(
            "Sending {} available commands for session {}",
            available.len(),
            session_id
        );
        self.send_update(
            session_id,
            SessionUpdate::AvailableCommandsUpdate(AvailableCommandsUpdate::new(available)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str) -> CommandInfo {
        CommandInfo {
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_compact_appended_once() {
        let commands = available_commands(&[command("review"), command("init")]);
        let names: Vec<_> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["review", "init", "compact"]);

        let shadowed = available_commands(&[command("compact")]);
        assert_eq!(shadowed.len(), 1);
        assert!(shadowed[0].input.is_some());
    }

    #[test]
    fn test_missing_description_is_empty() {
        let commands = available_commands(&[command("review")]);
        assert_eq!(commands[0].description, "");
    }
}
