//! Tag Manager v2 REST connector
//!
//! Authenticates with a bearer access token read from an environment
//! variable. Obtaining and refreshing that token is left to other tooling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{RemoteEntity, TagManagerConnector, Workspace, WorkspaceInfo};
use crate::error::{ConnectorError, RunError};
use crate::template::{Trigger, Variable};

/// Connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Container path, e.g. accounts/123/containers/456
    #[serde(rename = "container-path")]
    pub container_path: String,

    /// Environment variable holding an OAuth access token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tagmanager.googleapis.com/tagmanager/v2".to_string(),
            container_path: String::new(),
            token_env: "GTM_ACCESS_TOKEN".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl ConnectorConfig {
    /// Read the access token from the configured environment variable
    pub fn token(&self) -> Result<String, RunError> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(RunError::ConnectorUnavailable(format!(
                "Access token not found. Set the {} environment variable.",
                self.token_env
            ))),
        }
    }
}

/// Map a non-success HTTP status onto the connector taxonomy
pub fn error_for_status(status: u16, body: &str) -> ConnectorError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    let lowered = body.to_lowercase();

    match status {
        404 => ConnectorError::NotFound(message),
        409 => ConnectorError::Conflict(message),
        429 => ConnectorError::QuotaExceeded(message),
        403 if lowered.contains("ratelimitexceeded") || lowered.contains("quota") => {
            ConnectorError::QuotaExceeded(message)
        }
        401 => ConnectorError::Unavailable(message),
        _ => ConnectorError::Api { status, message },
    }
}

struct Api {
    http: Client,
    base_url: String,
    token: String,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ConnectorError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%status, "Tag manager API quota exceeded");
        }
        Err(error_for_status(status.as_u16(), &body))
    }

    async fn get(&self, path: &str, page_token: Option<&str>) -> Result<Value, ConnectorError> {
        debug!(%path, ?page_token, "Api::get: called");
        let mut request = self.http.get(self.url(path));
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        self.send(request).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ConnectorError> {
        debug!(%path, "Api::post: called");
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    /// Follow `nextPageToken` until the listing is exhausted
    async fn list_all(&self, path: &str, field: &str) -> Result<Vec<Value>, ConnectorError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.get(path, page_token.as_deref()).await?;
            if let Some(list) = page.get(field).and_then(Value::as_array) {
                items.extend(list.iter().cloned());
            }
            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => page_token = Some(next.to_string()),
                _ => break,
            }
        }
        debug!(%path, count = items.len(), "Api::list_all: done");
        Ok(items)
    }
}

fn workspace_info(value: &Value) -> Option<WorkspaceInfo> {
    Some(WorkspaceInfo {
        name: value.get("name")?.as_str()?.to_string(),
        path: value.get("path")?.as_str()?.to_string(),
    })
}

/// Connector for one container of the Tag Manager API
pub struct GtmConnector {
    api: Arc<Api>,
    container_path: String,
}

impl GtmConnector {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, RunError> {
        debug!(base_url = %config.base_url, container = %config.container_path, "GtmConnector::from_config: called");
        if config.container_path.trim().is_empty() {
            return Err(RunError::ConnectorUnavailable(
                "No container path configured (connector.container-path)".to_string(),
            ));
        }
        Self::with_token(config, config.token()?)
    }

    /// Build against `config` with an access token obtained elsewhere
    pub fn with_token(config: &ConnectorConfig, token: String) -> Result<Self, RunError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RunError::ConnectorUnavailable(e.to_string()))?;

        Ok(Self {
            api: Arc::new(Api {
                http,
                base_url: config.base_url.clone(),
                token,
            }),
            container_path: config.container_path.trim_matches('/').to_string(),
        })
    }

    fn workspace_handle(&self, info: WorkspaceInfo) -> Box<dyn Workspace> {
        Box::new(GtmWorkspace {
            api: self.api.clone(),
            info,
        })
    }
}

#[async_trait]
impl TagManagerConnector for GtmConnector {
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>, ConnectorError> {
        let path = format!("{}/workspaces", self.container_path);
        let raw = self.api.list_all(&path, "workspace").await?;
        Ok(raw
            .iter()
            .filter_map(|value| {
                let info = workspace_info(value);
                if info.is_none() {
                    warn!(?value, "Ignoring workspace without name or path");
                }
                info
            })
            .collect())
    }

    async fn create_workspace(&self, name: &str) -> Result<Box<dyn Workspace>, ConnectorError> {
        let path = format!("{}/workspaces", self.container_path);
        let created = self.api.post(&path, &json!({ "name": name })).await?;
        let info = workspace_info(&created)
            .ok_or_else(|| ConnectorError::Api {
                status: 200,
                message: "Workspace response missing name or path".to_string(),
            })?;
        Ok(self.workspace_handle(info))
    }

    async fn select_workspace(&self, path: &str) -> Result<Box<dyn Workspace>, ConnectorError> {
        let value = self.api.get(path, None).await?;
        let info = workspace_info(&value).ok_or_else(|| ConnectorError::NotFound(path.to_string()))?;
        Ok(self.workspace_handle(info))
    }
}

/// Workspace handle; listings always hit the API, so `refresh` has nothing to bypass
struct GtmWorkspace {
    api: Arc<Api>,
    info: WorkspaceInfo,
}

impl GtmWorkspace {
    async fn listing(&self, segment: &str, field: &str) -> Result<Vec<RemoteEntity>, ConnectorError> {
        let path = format!("{}/{}", self.info.path, segment);
        Ok(self
            .api
            .list_all(&path, field)
            .await?
            .into_iter()
            .map(RemoteEntity::from_body)
            .collect())
    }

    async fn post_entity(&self, segment: &str, body: Value) -> Result<RemoteEntity, ConnectorError> {
        let path = format!("{}/{}", self.info.path, segment);
        let created = self.api.post(&path, &body).await?;
        Ok(RemoteEntity::from_body(created))
    }
}

#[async_trait]
impl Workspace for GtmWorkspace {
    fn info(&self) -> &WorkspaceInfo {
        &self.info
    }

    async fn list_variables(&self, _refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError> {
        self.listing("variables", "variable").await
    }

    async fn list_triggers(&self, _refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError> {
        self.listing("triggers", "trigger").await
    }

    async fn create_variable(&self, variable: &Variable) -> Result<RemoteEntity, ConnectorError> {
        self.post_entity("variables", serde_json::to_value(variable)?).await
    }

    async fn create_trigger(&self, trigger: &Trigger) -> Result<RemoteEntity, ConnectorError> {
        self.post_entity("triggers", serde_json::to_value(trigger)?).await
    }
}
