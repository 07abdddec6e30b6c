//! Log formatting helpers

use serde::Serialize;
use std::fmt::Debug;

/// Wrapper for pretty-printing request and response payloads as YAML
///
/// ```ignore
/// tracing::debug!("Handling {} request: {}", "session/new", Pretty(&request));
/// ```
///
/// Falls back to the alternate `Debug` form when YAML serialization fails.
pub struct Pretty<T>(pub T);

impl<T: Serialize + Debug> std::fmt::Display for Pretty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_yaml_ng::to_string(&self.0) {
            Ok(yaml) => write!(f, "\n{}", yaml),
            Err(_) => write!(f, "\n{:#?}", self.0),
        }
    }
}
