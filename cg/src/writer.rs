//! Rate-limited writer
//!
//! Each entity moves from pending to exactly one terminal status. Creates
//! go through the limiter; skips and failures never abort the batch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::checker::ExistenceChecker;
use crate::connector::{RemoteEntity, Workspace};
use crate::error::ConnectorError;
use crate::limiter::RateLimiter;
use crate::template::{Entity, EntityType};

/// When the remote collection is read for existence checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotMode {
    /// One listing per collection per batch
    #[default]
    PerBatch,
    /// Fresh listing before every entity
    PerItem,
}

/// Terminal status of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Skipped,
    Failed,
    Cancelled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result for one submitted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub entity: Entity,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// A failure that a later re-run may get past unchanged (quota, outage)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    /// Path of the created entity, or of the remote one that made this a skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    /// Name of the remote entity that made this a skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

impl Outcome {
    fn new(entity: Entity, status: Status) -> Self {
        Self {
            entity,
            status,
            error: None,
            retryable: false,
            remote_path: None,
            matched: None,
        }
    }

    fn skipped(entity: Entity, existing: &RemoteEntity) -> Self {
        Self {
            remote_path: existing.path.clone(),
            matched: Some(existing.name.clone()),
            ..Self::new(entity, Status::Skipped)
        }
    }

    fn failed(entity: Entity, failure: Failure) -> Self {
        Self {
            error: Some(failure.message),
            retryable: failure.retryable,
            ..Self::new(entity, Status::Failed)
        }
    }
}

/// What `plan` would do with an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Skip,
}

/// One plan line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub entity: Entity,
    pub action: Action,
    /// Name of the remote entity that makes this a skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Why the remote could not be checked; the entity is planned as a create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Decision {
    pub fn create(entity: Entity) -> Self {
        Self {
            entity,
            action: Action::Create,
            matched: None,
            error: None,
        }
    }
}

/// Sender half of a cancellation signal
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver half, cheap to clone
#[derive(Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_handle, cancellation) = cancellation();
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone first
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a linked cancel handle and signal
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

/// A connector error flattened into an outcome
#[derive(Debug, Clone)]
struct Failure {
    message: String,
    retryable: bool,
}

impl Failure {
    fn from_error(context: Option<&str>, error: &ConnectorError) -> Self {
        let message = match context {
            Some(context) => format!("{}: {}", context, error),
            None => error.to_string(),
        };
        Self {
            message,
            retryable: error.is_retryable(),
        }
    }
}

/// Listings of remote collections, per batch or per item
struct Snapshots<'a> {
    workspace: &'a dyn Workspace,
    mode: SnapshotMode,
    cached: HashMap<EntityType, Result<Vec<RemoteEntity>, Failure>>,
}

impl<'a> Snapshots<'a> {
    fn new(workspace: &'a dyn Workspace, mode: SnapshotMode) -> Self {
        Self {
            workspace,
            mode,
            cached: HashMap::new(),
        }
    }

    async fn get(&mut self, entity_type: EntityType) -> Result<&[RemoteEntity], Failure> {
        if self.mode == SnapshotMode::PerItem || !self.cached.contains_key(&entity_type) {
            debug!(%entity_type, mode = ?self.mode, "Snapshots::get: listing remote collection");
            let listing = self.workspace.list(entity_type, true).await.map_err(|e| {
                let context = format!("Listing remote {}s failed", entity_type);
                Failure::from_error(Some(context.as_str()), &e)
            });
            if let Err(e) = &listing {
                warn!(error = %e.message, "Remote snapshot unavailable");
            }
            self.cached.insert(entity_type, listing);
        }
        match self.cached.get(&entity_type) {
            Some(Ok(entities)) => Ok(entities),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Failure {
                message: format!("No snapshot of remote {}s", entity_type),
                retryable: true,
            }),
        }
    }
}

/// Submits entities under a call-rate budget
pub struct Writer {
    limiter: RateLimiter,
    checker: ExistenceChecker,
    snapshot: SnapshotMode,
}

impl Writer {
    pub fn new(limiter: RateLimiter, checker: ExistenceChecker, snapshot: SnapshotMode) -> Self {
        Self {
            limiter,
            checker,
            snapshot,
        }
    }

    /// Create-or-skip every entity in order; output is index-aligned with input
    pub async fn submit_all(
        &mut self,
        workspace: &dyn Workspace,
        entities: Vec<Entity>,
        cancel: &Cancellation,
    ) -> Vec<Outcome> {
        info!(count = entities.len(), workspace = %workspace.info().name, "Submitting batch");
        let mut snapshots = Snapshots::new(workspace, self.snapshot);
        let mut outcomes = Vec::with_capacity(entities.len());

        for entity in entities {
            let outcome = self.submit_one(workspace, &mut snapshots, entity, cancel).await;
            match outcome.status {
                Status::Created => info!(name = %outcome.entity.name(), "Created"),
                Status::Skipped => info!(
                    name = %outcome.entity.name(),
                    matched = outcome.matched.as_deref().unwrap_or_default(),
                    "Already exists, skipped"
                ),
                Status::Failed => warn!(
                    name = %outcome.entity.name(),
                    error = outcome.error.as_deref().unwrap_or_default(),
                    retryable = outcome.retryable,
                    "Create failed"
                ),
                Status::Cancelled => debug!(name = %outcome.entity.name(), "Cancelled"),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn submit_one(
        &mut self,
        workspace: &dyn Workspace,
        snapshots: &mut Snapshots<'_>,
        entity: Entity,
        cancel: &Cancellation,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::new(entity, Status::Cancelled);
        }

        match snapshots.get(entity.entity_type()).await {
            Ok(remote) => {
                if let Some(existing) = self.checker.find(&entity, remote) {
                    return Outcome::skipped(entity, existing);
                }
            }
            Err(failure) => return Outcome::failed(entity, failure),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::new(entity, Status::Cancelled),
            _ = self.limiter.acquire() => {}
        }

        match workspace.create(&entity).await {
            Ok(created) => Outcome {
                remote_path: created.path,
                ..Outcome::new(entity, Status::Created)
            },
            Err(e) => Outcome::failed(entity, Failure::from_error(None, &e)),
        }
    }

    /// Create/skip decisions without any writes; failed lookups plan a create
    pub async fn plan(&self, workspace: &dyn Workspace, entities: Vec<Entity>) -> Vec<Decision> {
        let mut snapshots = Snapshots::new(workspace, self.snapshot);
        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            let decision = match snapshots.get(entity.entity_type()).await {
                Ok(remote) => match self.checker.find(&entity, remote) {
                    Some(existing) => Decision {
                        matched: Some(existing.name.clone()),
                        action: Action::Skip,
                        ..Decision::create(entity)
                    },
                    None => Decision::create(entity),
                },
                Err(failure) => Decision {
                    error: Some(failure.message),
                    ..Decision::create(entity)
                },
            };
            out.push(decision);
        }
        out
    }
}
