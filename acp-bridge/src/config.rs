//! Configuration for the ACP bridge
//!
//! Values are layered with figment in increasing precedence: built-in
//! defaults, an optional config file (TOML, YAML or JSON by extension),
//! `ACP_BRIDGE_*` environment variables, then command line overrides.

use crate::error::{BridgeError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "ACP_BRIDGE_";

fn default_server_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

/// Default minimum delay between event stream reconnect attempts (250ms)
fn default_event_retry_interval_ms() -> u64 {
    250
}

fn default_session_list_page_size() -> usize {
    50
}

/// Default timeout for a single session API request (5 minutes, prompts are long)
fn default_request_timeout_secs() -> u64 {
    300
}

fn default_directory_header() -> String {
    "x-opencode-directory".to_string()
}

/// Main configuration structure for the bridge
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BridgeConfig {
    /// Base URL of the session server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Fallback model as `provider/model` when no mode or session selects one
    #[serde(default)]
    pub default_model: Option<String>,
    /// Preferred agent persona for new sessions
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default = "default_event_retry_interval_ms")]
    pub event_retry_interval_ms: u64,
    /// Number of sessions returned per `session/list` page
    #[serde(default = "default_session_list_page_size")]
    pub session_list_page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Header that carries the session's working directory to the server
    #[serde(default = "default_directory_header")]
    pub directory_header: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            default_model: None,
            default_agent: None,
            event_retry_interval_ms: default_event_retry_interval_ms(),
            session_list_page_size: default_session_list_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            directory_header: default_directory_header(),
        }
    }
}

/// Command line overrides; unset fields leave lower layers untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
}

impl BridgeConfig {
    /// Load configuration from all sources and validate the result
    pub fn load(config_file: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));

        if let Some(path) = config_file {
            tracing::debug!("Loading configuration file {}", path.display());
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                _ => {
                    return Err(BridgeError::Config(format!(
                        "Unsupported configuration file format: {}",
                        path.display()
                    )))
                }
            };
        }

        let config: BridgeConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| BridgeError::Config(format!("Failed to extract configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(BridgeError::Config("server_url cannot be empty".to_string()));
        }
        url::Url::parse(&self.server_url).map_err(|e| {
            BridgeError::Config(format!("server_url '{}' is invalid: {}", self.server_url, e))
        })?;

        if self.event_retry_interval_ms == 0 {
            return Err(BridgeError::Config(
                "event_retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.session_list_page_size == 0 {
            return Err(BridgeError::Config(
                "session_list_page_size must be greater than zero".to_string(),
            ));
        }
        if self.directory_header.trim().is_empty() {
            return Err(BridgeError::Config(
                "directory_header cannot be empty".to_string(),
            ));
        }

        if let Some(model) = &self.default_model {
            let mut segments = model.splitn(2, '/');
            let provider = segments.next().unwrap_or_default();
            let rest = segments.next().unwrap_or_default();
            if provider.is_empty() || rest.is_empty() {
                return Err(BridgeError::Config(format!(
                    "default_model '{}' must have the form provider/model",
                    model
                )));
            }
        }

        Ok(())
    }

    pub fn event_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.event_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_retry_interval_ms, 250);
        assert_eq!(config.session_list_page_size, 50);
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"default_model": "anthropic/claude"}"#).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("anthropic/claude"));
        assert_eq!(config.server_url, "http://127.0.0.1:4096");
        assert_eq!(config.directory_header, "x-opencode-directory");
    }

    #[test]
    fn test_zero_retry_interval_rejected() {
        let config = BridgeConfig {
            event_retry_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_malformed_default_model_rejected() {
        let config = BridgeConfig {
            default_model: Some("just-a-model".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_toml_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "server_url = \"http://localhost:9000\"\ndefault_agent = \"plan\""
        )
        .unwrap();

        let overrides = ConfigOverrides {
            default_agent: Some("build".to_string()),
            ..Default::default()
        };
        let config = BridgeConfig::load(Some(file.path()), overrides).unwrap();
        assert_eq!(config.server_url, "http://localhost:9000");
        assert_eq!(config.default_agent.as_deref(), Some("build"));
        assert_eq!(config.event_retry_interval_ms, 250);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result = BridgeConfig::load(Some(file.path()), ConfigOverrides::default());
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
