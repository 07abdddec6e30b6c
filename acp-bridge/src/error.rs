//! Error types for the ACP bridge

use crate::json_rpc_codes::{AUTH_REQUIRED, INTERNAL_ERROR, INVALID_PARAMS};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 error structure following ACP specification
#[derive(Debug, Clone)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Trait for converting errors to JSON-RPC format
pub trait ToJsonRpcError: std::fmt::Display {
    /// Convert error to JSON-RPC error code
    fn to_json_rpc_code(&self) -> i32;

    /// Convert error to structured error data (optional)
    fn to_error_data(&self) -> Option<Value> {
        None
    }

    /// Convert error to complete JSON-RPC error structure
    fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.to_json_rpc_code(),
            message: self.to_string(),
            data: self.to_error_data(),
        }
    }
}

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No protocol session is registered under this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The model provider needs credentials before a session can be built
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// The external session API failed or returned an unexpected response
    #[error("Session API error: {0}")]
    Api(String),

    /// A round-trip to the protocol client failed
    #[error("Client transport error: {0}")]
    Transport(String),

    /// A payload from the event stream or the client could not be interpreted
    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToJsonRpcError for BridgeError {
    fn to_json_rpc_code(&self) -> i32 {
        match self {
            BridgeError::SessionNotFound(_) => INVALID_PARAMS,
            BridgeError::InvalidParams(_) => INVALID_PARAMS,
            BridgeError::AuthRequired(_) => AUTH_REQUIRED,
            _ => INTERNAL_ERROR,
        }
    }

    fn to_error_data(&self) -> Option<Value> {
        match self {
            BridgeError::SessionNotFound(id) => Some(serde_json::json!({
                "sessionId": id,
                "error": "session_not_found"
            })),
            BridgeError::AuthRequired(reason) => Some(serde_json::json!({
                "reason": reason,
                "error": "auth_required"
            })),
            _ => None,
        }
    }
}

impl BridgeError {
    /// Convert to the error type returned across the ACP trait boundary
    pub fn to_protocol_error(&self) -> agent_client_protocol::Error {
        let json_rpc_error = self.to_json_rpc_error();
        let mut error =
            agent_client_protocol::Error::new(json_rpc_error.code, json_rpc_error.message);
        if let Some(data) = json_rpc_error.data {
            error = error.data(data);
        }
        error
    }
}

impl From<BridgeError> for agent_client_protocol::Error {
    fn from(error: BridgeError) -> Self {
        error.to_protocol_error()
    }
}

/// Convenience type alias for Results using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
