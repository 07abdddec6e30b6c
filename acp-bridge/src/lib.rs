//! ACP Bridge Library
//!
//! Serves the Agent Client Protocol on top of an external session server:
//! protocol requests become session API calls, and the server's event bus
//! becomes session update notifications for the client.

pub mod agent;
pub mod agent_commands;
pub mod agent_notifications;
pub mod agent_prompt_handling;
pub mod agent_trait_impl;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod event_translator;
pub mod events;
pub mod json_rpc_codes;
pub mod logging;
pub mod model_resolution;
pub mod permission_queue;
pub mod plan;
pub mod server;
pub mod session;
pub mod session_api;
pub mod session_loading;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tool_classification;

pub use agent::BridgeAgent;
pub use config::{BridgeConfig, ConfigOverrides};
pub use error::{BridgeError, Result};
pub use event_stream::EventSource;
pub use events::BusEvent;
pub use server::{run_stdio, serve};
pub use session::{SessionState, SessionStore};
pub use session_api::SessionApi;
