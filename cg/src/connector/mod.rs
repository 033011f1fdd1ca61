//! Tag manager connector
//!
//! Narrow async interface over the vendor API: workspace discovery and the
//! variable/trigger collections of one workspace. `http` talks to the Tag
//! Manager v2 REST API, `memory` keeps everything in process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConnectorError, RunError};
use crate::template::{Entity, EntityType, Trigger, Variable};

pub mod http;
pub mod memory;

pub use http::{ConnectorConfig, GtmConnector};
pub use memory::{FailureKind, InMemoryConnector};

/// Name and API path of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub path: String,
}

/// An entity as the remote returned it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub name: String,
    pub path: Option<String>,
    pub body: Value,
}

impl RemoteEntity {
    /// Wrap a raw API object, pulling out name and path when present
    pub fn from_body(body: Value) -> Self {
        let name = body.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let path = body.get("path").and_then(Value::as_str).map(str::to_string);
        Self { name, path, body }
    }
}

/// Container-level operations
#[async_trait]
pub trait TagManagerConnector: Send + Sync {
    /// Fails with `NotFound` when the container is unreachable
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>, ConnectorError>;

    async fn create_workspace(&self, name: &str) -> Result<Box<dyn Workspace>, ConnectorError>;

    async fn select_workspace(&self, path: &str) -> Result<Box<dyn Workspace>, ConnectorError>;
}

/// One workspace's variable and trigger collections
#[async_trait]
pub trait Workspace: Send + Sync {
    fn info(&self) -> &WorkspaceInfo;

    /// `refresh` bypasses any listing the connector cached earlier
    async fn list_variables(&self, refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError>;

    async fn list_triggers(&self, refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError>;

    async fn create_variable(&self, variable: &Variable) -> Result<RemoteEntity, ConnectorError>;

    async fn create_trigger(&self, trigger: &Trigger) -> Result<RemoteEntity, ConnectorError>;

    /// Listing of the collection `entity_type` lives in
    async fn list(&self, entity_type: EntityType, refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError> {
        match entity_type {
            EntityType::Variable => self.list_variables(refresh).await,
            EntityType::Trigger => self.list_triggers(refresh).await,
        }
    }

    /// Create call for whichever collection `entity` belongs to
    async fn create(&self, entity: &Entity) -> Result<RemoteEntity, ConnectorError> {
        match entity {
            Entity::Variable(v) => self.create_variable(v).await,
            Entity::Trigger(t) => self.create_trigger(t).await,
        }
    }
}

/// Select the workspace called `name` if it exists
pub async fn find_workspace(
    connector: &dyn TagManagerConnector,
    name: &str,
) -> Result<Option<Box<dyn Workspace>>, RunError> {
    debug!(%name, "find_workspace: called");
    let workspaces = connector.list_workspaces().await.map_err(|e| classify(name, e))?;

    match workspaces.iter().find(|ws| ws.name == name) {
        Some(existing) => {
            info!(workspace = %name, path = %existing.path, "Workspace already exists, using it");
            let ws = connector
                .select_workspace(&existing.path)
                .await
                .map_err(|e| classify(name, e))?;
            Ok(Some(ws))
        }
        None => {
            debug!(%name, available = workspaces.len(), "find_workspace: no match");
            Ok(None)
        }
    }
}

/// Select the workspace called `name`, creating it when absent
pub async fn resolve_workspace(
    connector: &dyn TagManagerConnector,
    name: &str,
) -> Result<Box<dyn Workspace>, RunError> {
    if let Some(ws) = find_workspace(connector, name).await? {
        return Ok(ws);
    }
    info!(workspace = %name, "Creating new workspace");
    connector.create_workspace(name).await.map_err(|e| classify(name, e))
}

fn classify(name: &str, err: ConnectorError) -> RunError {
    match err {
        ConnectorError::Unavailable(msg) => RunError::ConnectorUnavailable(msg),
        ConnectorError::Network(e) => RunError::ConnectorUnavailable(e.to_string()),
        other => RunError::WorkspaceResolution {
            name: name.to_string(),
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_entity_from_body() {
        let entity = RemoteEntity::from_body(json!({
            "name": "MPX - DLV - consentCategories",
            "path": "accounts/1/containers/2/workspaces/3/variables/4",
            "type": "v",
        }));
        assert_eq!(entity.name, "MPX - DLV - consentCategories");
        assert_eq!(
            entity.path.as_deref(),
            Some("accounts/1/containers/2/workspaces/3/variables/4")
        );

        let bare = RemoteEntity::from_body(json!({"type": "v"}));
        assert_eq!(bare.name, "");
        assert!(bare.path.is_none());
    }

    #[tokio::test]
    async fn test_resolve_selects_existing() {
        let connector = InMemoryConnector::new();
        connector.add_workspace("Default Workspace");
        let existing = connector.add_workspace("Consent");

        let ws = resolve_workspace(&connector, "Consent").await.unwrap();
        assert_eq!(ws.info().path, existing.path);
        assert_eq!(connector.workspaces().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_creates_missing() {
        let connector = InMemoryConnector::new();
        connector.add_workspace("Default Workspace");

        let ws = resolve_workspace(&connector, "Consent").await.unwrap();
        assert_eq!(ws.info().name, "Consent");
        assert_eq!(connector.workspaces().len(), 2);
    }

    #[tokio::test]
    async fn test_find_does_not_create() {
        let connector = InMemoryConnector::new();
        assert!(find_workspace(&connector, "Consent").await.unwrap().is_none());
        assert!(connector.workspaces().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unreachable_container() {
        let connector = InMemoryConnector::new();
        connector.set_unreachable(true);

        let err = resolve_workspace(&connector, "Consent").await.err().unwrap();
        assert!(matches!(err, RunError::WorkspaceResolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_create_rejected() {
        let connector = InMemoryConnector::new();
        connector.fail_create("Consent", FailureKind::Quota);

        let err = resolve_workspace(&connector, "Consent").await.err().unwrap();
        match err {
            RunError::WorkspaceResolution { name, source } => {
                assert_eq!(name, "Consent");
                assert!(source.is_quota());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
