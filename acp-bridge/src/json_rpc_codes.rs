//! JSON-RPC 2.0 error codes the bridge returns
//!
//! ACP reserves [`AUTH_REQUIRED`] in the implementation-defined server range
//! (-32099 to -32000).

/// Invalid params - unknown session, unknown mode, malformed extension params
pub const INVALID_PARAMS: i32 = -32602;

/// Internal error - session API, transport and translation failures
pub const INTERNAL_ERROR: i32 = -32603;

/// Authentication required - the model provider needs credentials
pub const AUTH_REQUIRED: i32 = -32000;
