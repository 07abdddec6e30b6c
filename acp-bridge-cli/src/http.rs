//! Session API over the session server's HTTP interface

use acp_bridge::session_api::*;
use acp_bridge::{BridgeConfig, BridgeError, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Parse the configured server URL so relative paths join under it
pub fn base_url(server_url: &str) -> Result<Url> {
    let mut base = server_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .map_err(|e| BridgeError::Config(format!("invalid server_url {}: {}", server_url, e)))
}

/// Append path segments under `base`, percent-encoding each one
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BridgeError::Config(format!("server_url {} cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub struct HttpSessionApi {
    client: reqwest::Client,
    base: Url,
    directory_header: String,
}

impl HttpSessionApi {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base: base_url(&config.server_url)?,
            directory_header: config.directory_header.clone(),
        })
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        directory: Option<&str>,
    ) -> Result<RequestBuilder> {
        let mut request = self
            .client
            .request(method, endpoint(&self.base, segments)?);
        if let Some(directory) = directory {
            request = request.header(self.directory_header.as_str(), directory);
        }
        Ok(request)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Api(format!("session server unreachable: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, url = %url, body = %body, "Session API request failed");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BridgeError::AuthRequired(
                format!("session server rejected credentials: {}", body),
            )),
            _ => Err(BridgeError::Api(format!("HTTP {} from {}: {}", status, url, body))),
        }
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|e| BridgeError::Api(format!("unexpected response body: {}", e)))
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(&self, directory: &str, title: Option<&str>) -> Result<SessionInfo> {
        let body = match title {
            Some(title) => json!({ "title": title }),
            None => json!({}),
        };
        self.json(self.request(Method::POST, &["session"], Some(directory))?.json(&body))
            .await
    }

    async fn get_session(&self, session_id: &str, directory: &str) -> Result<SessionInfo> {
        self.json(self.request(Method::GET, &["session", session_id], Some(directory))?)
            .await
    }

    async fn list_sessions(&self, directory: Option<&str>) -> Result<Vec<SessionInfo>> {
        self.json(self.request(Method::GET, &["session"], directory)?)
            .await
    }

    async fn fork_session(
        &self,
        session_id: &str,
        directory: &str,
        message_id: Option<&str>,
    ) -> Result<SessionInfo> {
        let body = match message_id {
            Some(message_id) => json!({ "messageID": message_id }),
            None => json!({}),
        };
        self.json(
            self.request(Method::POST, &["session", session_id, "fork"], Some(directory))?
                .json(&body),
        )
        .await
    }

    async fn messages(&self, session_id: &str, directory: &str) -> Result<Vec<MessageWithParts>> {
        self.json(self.request(
            Method::GET,
            &["session", session_id, "message"],
            Some(directory),
        )?)
        .await
    }

    async fn prompt(
        &self,
        session_id: &str,
        directory: &str,
        input: PromptInput,
    ) -> Result<MessageWithParts> {
        self.json(
            self.request(
                Method::POST,
                &["session", session_id, "message"],
                Some(directory),
            )?
            .json(&input),
        )
        .await
    }

    async fn command(
        &self,
        session_id: &str,
        directory: &str,
        input: CommandInput,
    ) -> Result<MessageWithParts> {
        self.json(
            self.request(
                Method::POST,
                &["session", session_id, "command"],
                Some(directory),
            )?
            .json(&input),
        )
        .await
    }

    async fn summarize(&self, session_id: &str, directory: &str, model: &ModelRef) -> Result<()> {
        self.execute(
            self.request(
                Method::POST,
                &["session", session_id, "summarize"],
                Some(directory),
            )?
            .json(model),
        )
        .await?;
        Ok(())
    }

    async fn abort(&self, session_id: &str, directory: &str) -> Result<()> {
        self.execute(self.request(
            Method::POST,
            &["session", session_id, "abort"],
            Some(directory),
        )?)
        .await?;
        Ok(())
    }

    async fn providers(&self, directory: &str) -> Result<ProviderList> {
        self.json(self.request(Method::GET, &["config", "providers"], Some(directory))?)
            .await
    }

    async fn agents(&self, directory: &str) -> Result<Vec<AgentInfo>> {
        self.json(self.request(Method::GET, &["agent"], Some(directory))?)
            .await
    }

    async fn commands(&self, directory: &str) -> Result<Vec<CommandInfo>> {
        self.json(self.request(Method::GET, &["command"], Some(directory))?)
            .await
    }

    async fn reply_permission(
        &self,
        request_id: &str,
        directory: &str,
        reply: PermissionReply,
    ) -> Result<()> {
        self.execute(
            self.request(
                Method::POST,
                &["permission", request_id, "reply"],
                Some(directory),
            )?
            .json(&json!({ "reply": reply })),
        )
        .await?;
        Ok(())
    }

    async fn add_mcp_server(
        &self,
        directory: &str,
        name: &str,
        config: McpServerConfig,
    ) -> Result<()> {
        self.execute(
            self.request(Method::POST, &["mcp"], Some(directory))?
                .json(&json!({ "name": name, "config": config })),
        )
        .await?;
        Ok(())
    }
}
