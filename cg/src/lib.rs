//! consentgen - consent-blocking trigger generator for tag manager workspaces
//!
//! Expands one blocking trigger per (trigger kind, consent category) pair from
//! a fixed template, then upserts them into a workspace: each entity is
//! checked against a snapshot of the remote collection and only missing ones
//! are created, under a create-call rate budget.
//!
//! # Flow
//!
//! ```text
//! TemplateStore -> Expander -> (per entity) ExistenceChecker -> Writer -> Workspace
//! ```
//!
//! # Example
//!
//! ```ignore
//! use consentgen::{Expander, TemplateStore};
//!
//! let store = TemplateStore::default();
//! let triggers = Expander::new(&store).expand();
//! assert_eq!(triggers.len(), 40);
//! ```

pub mod checker;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod expander;
pub mod limiter;
pub mod runner;
pub mod template;
pub mod writer;

pub use checker::ExistenceChecker;
pub use config::Config;
pub use connector::{
    GtmConnector, InMemoryConnector, RemoteEntity, TagManagerConnector, Workspace, WorkspaceInfo, find_workspace,
    resolve_workspace,
};
pub use error::{ComparisonAmbiguous, ConnectorError, RunError};
pub use expander::{Expander, title_case, trigger_name};
pub use limiter::{Clock, RateLimitConfig, RateLimiter, TokioClock};
pub use runner::{PlanReport, RunReport, Summary};
pub use template::{
    Condition, ConsentCategory, Entity, EntityType, Parameter, TemplateStore, Trigger, TriggerKind, Variable,
    variable_reference,
};
pub use writer::{Action, CancelHandle, Cancellation, Decision, Outcome, SnapshotMode, Status, Writer, cancellation};
