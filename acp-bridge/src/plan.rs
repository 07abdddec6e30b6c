//! Todo list to ACP plan conversion
//!
//! The todo tool records its list as JSON in the tool output. Each entry
//! becomes one ACP plan entry so clients can render task progress.

use crate::error::{BridgeError, Result};
use agent_client_protocol::{
    Plan as AcpPlan, PlanEntry as AcpPlanEntry, PlanEntryPriority as AcpPriority,
    PlanEntryStatus as AcpStatus,
};
use serde::{Deserialize, Serialize};

/// Todo status lifecycle as recorded by the todo tool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// Convert to ACP status format.
    ///
    /// ACP plan entries have no cancelled state; cancelled todos are reported
    /// as completed so they leave the client's active list.
    pub fn to_acp_status(self) -> AcpStatus {
        match self {
            TodoStatus::Pending => AcpStatus::Pending,
            TodoStatus::InProgress => AcpStatus::InProgress,
            TodoStatus::Completed | TodoStatus::Cancelled => AcpStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TodoPriority {
    pub fn to_acp_priority(self) -> AcpPriority {
        match self {
            TodoPriority::High => AcpPriority::High,
            TodoPriority::Medium => AcpPriority::Medium,
            TodoPriority::Low => AcpPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Todo {
    pub fn to_acp_entry(&self) -> AcpPlanEntry {
        AcpPlanEntry::new(
            self.content.clone(),
            self.priority.to_acp_priority(),
            self.status.to_acp_status(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TodoOutput {
    List(Vec<Todo>),
    Wrapped { todos: Vec<Todo> },
}

/// Parse the todo tool's output, either a bare array or `{"todos": [...]}`
pub fn parse_todos(output: &str) -> Result<Vec<Todo>> {
    let parsed: TodoOutput = serde_json::from_str(output.trim())
        .map_err(|e| BridgeError::Translation(format!("unparseable todo list: {}", e)))?;
    Ok(match parsed {
        TodoOutput::List(todos) | TodoOutput::Wrapped { todos } => todos,
    })
}

pub fn todos_to_acp_plan(todos: &[Todo]) -> AcpPlan {
    AcpPlan::new(todos.iter().map(Todo::to_acp_entry).collect())
}
