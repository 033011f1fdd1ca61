//! In-process connector with failure injection

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use super::{RemoteEntity, TagManagerConnector, Workspace, WorkspaceInfo};
use crate::error::ConnectorError;
use crate::template::{Entity, EntityType, Trigger, Variable};

const CONTAINER_PATH: &str = "accounts/1/containers/1";

/// Error to raise when creating an entity with a given name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Conflict,
    Quota,
    Unavailable,
}

impl FailureKind {
    fn to_error(self, name: &str) -> ConnectorError {
        match self {
            Self::Conflict => ConnectorError::Conflict(name.to_string()),
            Self::Quota => ConnectorError::QuotaExceeded(format!("quota exhausted while creating {}", name)),
            Self::Unavailable => ConnectorError::Unavailable(format!("backend down while creating {}", name)),
        }
    }
}

/// Record of one create call
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub name: String,
    pub at: Instant,
}

#[derive(Default)]
struct WorkspaceState {
    info: Option<WorkspaceInfo>,
    variables: Vec<RemoteEntity>,
    triggers: Vec<RemoteEntity>,
}

#[derive(Default)]
struct State {
    workspaces: Vec<WorkspaceState>,
    failures: HashMap<String, FailureKind>,
    unreachable: bool,
    listing_broken: bool,
    create_calls: Vec<CreateCall>,
    list_calls: usize,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn workspace_mut(&mut self, path: &str) -> Result<&mut WorkspaceState, ConnectorError> {
        self.workspaces
            .iter_mut()
            .find(|ws| ws.info.as_ref().is_some_and(|i| i.path == path))
            .ok_or_else(|| ConnectorError::NotFound(path.to_string()))
    }
}

/// Connector holding workspaces in memory
///
/// Rejects a create whose name is already taken in the target collection
/// with `Conflict`, the same rule the vendor applies.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    state: Arc<Mutex<State>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a workspace directly, bypassing failure injection
    pub fn add_workspace(&self, name: &str) -> WorkspaceInfo {
        let mut state = self.state();
        let id = state.next_id();
        let info = WorkspaceInfo {
            name: name.to_string(),
            path: format!("{}/workspaces/{}", CONTAINER_PATH, id),
        };
        state.workspaces.push(WorkspaceState {
            info: Some(info.clone()),
            ..Default::default()
        });
        info
    }

    pub fn workspaces(&self) -> Vec<WorkspaceInfo> {
        self.state().workspaces.iter().filter_map(|ws| ws.info.clone()).collect()
    }

    /// Place an existing entity in a workspace collection
    pub fn seed(&self, workspace_path: &str, entity_type: EntityType, body: Value) -> Result<(), ConnectorError> {
        let mut state = self.state();
        let ws = state.workspace_mut(workspace_path)?;
        let entity = RemoteEntity::from_body(body);
        match entity_type {
            EntityType::Variable => ws.variables.push(entity),
            EntityType::Trigger => ws.triggers.push(entity),
        }
        Ok(())
    }

    /// Current contents of a workspace collection
    pub fn entities(&self, workspace_path: &str, entity_type: EntityType) -> Vec<RemoteEntity> {
        let mut state = self.state();
        match state.workspace_mut(workspace_path) {
            Ok(ws) => match entity_type {
                EntityType::Variable => ws.variables.clone(),
                EntityType::Trigger => ws.triggers.clone(),
            },
            Err(_) => Vec::new(),
        }
    }

    /// Make every create of an entity called `name` fail
    pub fn fail_create(&self, name: &str, kind: FailureKind) {
        self.state().failures.insert(name.to_string(), kind);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Container lookups fail with `NotFound`
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Variable and trigger listings fail with `Unavailable`
    pub fn set_listing_broken(&self, broken: bool) {
        self.state().listing_broken = broken;
    }

    pub fn create_calls(&self) -> Vec<CreateCall> {
        self.state().create_calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    fn workspace_handle(&self, info: WorkspaceInfo) -> Box<dyn Workspace> {
        Box::new(MemoryWorkspace {
            connector: self.clone(),
            info,
        })
    }

    fn list(&self, path: &str, entity_type: EntityType) -> Result<Vec<RemoteEntity>, ConnectorError> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.listing_broken {
            return Err(ConnectorError::Unavailable(format!("cannot list {}s", entity_type)));
        }
        let ws = state.workspace_mut(path)?;
        Ok(match entity_type {
            EntityType::Variable => ws.variables.clone(),
            EntityType::Trigger => ws.triggers.clone(),
        })
    }

    fn create(&self, path: &str, entity: &Entity) -> Result<RemoteEntity, ConnectorError> {
        debug!(%path, name = %entity.name(), "InMemoryConnector::create: called");
        let mut body = entity.body()?;
        let mut state = self.state();
        state.create_calls.push(CreateCall {
            name: entity.name().to_string(),
            at: Instant::now(),
        });
        if let Some(kind) = state.failures.get(entity.name()) {
            return Err(kind.to_error(entity.name()));
        }

        let id = state.next_id();
        let ws = state.workspace_mut(path)?;
        let (collection, segment) = match entity.entity_type() {
            EntityType::Variable => (&mut ws.variables, "variables"),
            EntityType::Trigger => (&mut ws.triggers, "triggers"),
        };
        if collection.iter().any(|e| e.name == entity.name()) {
            return Err(ConnectorError::Conflict(format!(
                "Found entity with duplicate name: {}",
                entity.name()
            )));
        }

        body["path"] = json!(format!("{}/{}/{}", path, segment, id));
        body["fingerprint"] = json!(id.to_string());
        let created = RemoteEntity::from_body(body);
        collection.push(created.clone());
        Ok(created)
    }
}

#[async_trait]
impl TagManagerConnector for InMemoryConnector {
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>, ConnectorError> {
        if self.state().unreachable {
            return Err(ConnectorError::NotFound(CONTAINER_PATH.to_string()));
        }
        Ok(self.workspaces())
    }

    async fn create_workspace(&self, name: &str) -> Result<Box<dyn Workspace>, ConnectorError> {
        if let Some(kind) = self.state().failures.get(name) {
            return Err(kind.to_error(name));
        }
        let info = self.add_workspace(name);
        Ok(self.workspace_handle(info))
    }

    async fn select_workspace(&self, path: &str) -> Result<Box<dyn Workspace>, ConnectorError> {
        let info = self
            .workspaces()
            .into_iter()
            .find(|ws| ws.path == path)
            .ok_or_else(|| ConnectorError::NotFound(path.to_string()))?;
        Ok(self.workspace_handle(info))
    }
}

struct MemoryWorkspace {
    connector: InMemoryConnector,
    info: WorkspaceInfo,
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    fn info(&self) -> &WorkspaceInfo {
        &self.info
    }

    async fn list_variables(&self, _refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError> {
        self.connector.list(&self.info.path, EntityType::Variable)
    }

    async fn list_triggers(&self, _refresh: bool) -> Result<Vec<RemoteEntity>, ConnectorError> {
        self.connector.list(&self.info.path, EntityType::Trigger)
    }

    async fn create_variable(&self, variable: &Variable) -> Result<RemoteEntity, ConnectorError> {
        self.connector.create(&self.info.path, &Entity::Variable(variable.clone()))
    }

    async fn create_trigger(&self, trigger: &Trigger) -> Result<RemoteEntity, ConnectorError> {
        self.connector.create(&self.info.path, &Entity::Trigger(trigger.clone()))
    }
}
