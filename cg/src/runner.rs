//! Run and plan orchestration
//!
//! A run resolves the workspace (fatal on failure), then submits the consent
//! variable followed by every expanded trigger as one batch.

use colored::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connector::{TagManagerConnector, WorkspaceInfo, find_workspace, resolve_workspace};
use crate::error::RunError;
use crate::expander::Expander;
use crate::template::{Entity, EntityType, TemplateStore, variable_reference};
use crate::writer::{Action, Cancellation, Decision, Outcome, Status, Writer};

/// Counts per terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failures a plain re-run may get past (quota, outage)
    pub retryable: usize,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                Status::Created => summary.created += 1,
                Status::Skipped => summary.skipped += 1,
                Status::Failed => {
                    summary.failed += 1;
                    if outcome.retryable {
                        summary.retryable += 1;
                    }
                }
                Status::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.created + self.skipped + self.failed + self.cancelled
    }

    /// Nothing failed and nothing was left unsubmitted
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Result of `cg run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub workspace: WorkspaceInfo,
    pub outcomes: Vec<Outcome>,
    pub summary: Summary,
}

impl RunReport {
    /// Process exit code: 0 on full success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.summary.is_success() { 0 } else { 1 }
    }
}

/// Result of `cg plan`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub workspace: WorkspaceInfo,
    /// False when the workspace does not exist yet and would be created
    pub workspace_exists: bool,
    pub decisions: Vec<Decision>,
}

impl PlanReport {
    pub fn creates(&self) -> usize {
        self.decisions.iter().filter(|d| d.action == Action::Create).count()
    }

    pub fn skips(&self) -> usize {
        self.decisions.iter().filter(|d| d.action == Action::Skip).count()
    }
}

/// Consent variable first, then the expanded triggers
pub fn batch(store: &TemplateStore, expander: &Expander<'_>) -> Vec<Entity> {
    let mut entities = Vec::with_capacity(expander.len() + 1);
    entities.push(Entity::Variable(store.variable()));
    entities.extend(expander.expand().into_iter().map(Entity::Trigger));
    debug!(count = entities.len(), "batch: built");
    entities
}

/// Split into variables and everything that may reference them, order kept
fn split_variables(entities: Vec<Entity>) -> (Vec<Entity>, Vec<Entity>) {
    entities
        .into_iter()
        .partition(|e| e.entity_type() == EntityType::Variable)
}

/// Point triggers at remote variables that stood in for ours under another name
///
/// A variable is skipped when the remote already holds the same payload,
/// whatever that entity is called. Triggers must then read the remote name,
/// or they would reference a variable the workspace does not have.
fn adopt_existing_variables<'a>(
    matches: impl IntoIterator<Item = (&'a str, &'a str)>,
    dependents: &mut [Entity],
) {
    for (ours, theirs) in matches {
        if ours == theirs {
            continue;
        }
        let (from, to) = (variable_reference(ours), variable_reference(theirs));
        let mut retargeted = 0;
        for entity in dependents.iter_mut() {
            if let Entity::Trigger(trigger) = entity
                && trigger.retarget_variable(&from, &to)
            {
                retargeted += 1;
            }
        }
        warn!(
            variable = %ours,
            existing = %theirs,
            retargeted,
            "Variable already exists under another name, triggers will reference it"
        );
    }
}

/// Resolve or create the workspace and submit the batch
///
/// Variables are submitted before everything else so that triggers can be
/// pointed at whichever remote variable ends up serving them.
pub async fn run(
    connector: &dyn TagManagerConnector,
    workspace_name: &str,
    entities: Vec<Entity>,
    writer: &mut Writer,
    cancel: &Cancellation,
) -> Result<RunReport, RunError> {
    let workspace = resolve_workspace(connector, workspace_name).await?;
    let (variables, mut dependents) = split_variables(entities);

    let mut outcomes = writer.submit_all(workspace.as_ref(), variables, cancel).await;
    adopt_existing_variables(
        outcomes
            .iter()
            .filter(|o| o.status == Status::Skipped)
            .filter_map(|o| o.matched.as_deref().map(|m| (o.entity.name(), m))),
        &mut dependents,
    );
    outcomes.extend(writer.submit_all(workspace.as_ref(), dependents, cancel).await);

    let summary = Summary::from_outcomes(&outcomes);
    info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Run complete"
    );
    Ok(RunReport {
        workspace: workspace.info().clone(),
        outcomes,
        summary,
    })
}

/// Existence decisions without writing; a missing workspace plans all creates
pub async fn plan(
    connector: &dyn TagManagerConnector,
    workspace_name: &str,
    entities: Vec<Entity>,
    writer: &Writer,
) -> Result<PlanReport, RunError> {
    let Some(workspace) = find_workspace(connector, workspace_name).await? else {
        return Ok(PlanReport {
            workspace: WorkspaceInfo {
                name: workspace_name.to_string(),
                path: String::new(),
            },
            workspace_exists: false,
            decisions: entities.into_iter().map(Decision::create).collect(),
        });
    };

    let (variables, mut dependents) = split_variables(entities);
    let mut decisions = writer.plan(workspace.as_ref(), variables).await;
    adopt_existing_variables(
        decisions
            .iter()
            .filter(|d| d.action == Action::Skip)
            .filter_map(|d| d.matched.as_deref().map(|m| (d.entity.name(), m))),
        &mut dependents,
    );
    decisions.extend(writer.plan(workspace.as_ref(), dependents).await);

    Ok(PlanReport {
        workspace: workspace.info().clone(),
        workspace_exists: true,
        decisions,
    })
}

fn status_label(status: Status) -> ColoredString {
    match status {
        Status::Created => "created".green(),
        Status::Skipped => "skipped".dimmed(),
        Status::Failed => "failed".red(),
        Status::Cancelled => "cancelled".yellow(),
    }
}

/// Human-readable run report
pub fn render_run(report: &RunReport) -> String {
    let mut out = format!("Workspace: {}\n", report.workspace.name.cyan());
    for (i, outcome) in report.outcomes.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. [{}] {} {}",
            i + 1,
            status_label(outcome.status),
            outcome.entity.entity_type(),
            outcome.entity.name()
        ));
        if let Some(matched) = outcome.matched.as_deref().filter(|m| *m != outcome.entity.name()) {
            out.push_str(&format!(" (exists as {})", matched.yellow()));
        }
        if let Some(error) = &outcome.error {
            out.push_str(&format!(" ({})", error.red()));
        }
        out.push('\n');
    }
    let s = report.summary;
    out.push_str(&format!(
        "{} created, {} skipped, {} failed, {} cancelled ({} total)\n",
        s.created,
        s.skipped,
        s.failed,
        s.cancelled,
        s.total()
    ));
    if s.retryable > 0 {
        out.push_str(&format!("{} of the failures are transient, safe to re-run\n", s.retryable));
    }
    out
}

/// Human-readable plan report
pub fn render_plan(report: &PlanReport) -> String {
    let mut out = if report.workspace_exists {
        format!("Workspace: {}\n", report.workspace.name.cyan())
    } else {
        format!("Workspace: {} (will be created)\n", report.workspace.name.cyan())
    };
    for decision in &report.decisions {
        let action = match decision.action {
            Action::Create => "Create".green(),
            Action::Skip => "Skip".dimmed(),
        };
        out.push_str(&format!(
            "{:<6} {} {}",
            action,
            decision.entity.entity_type(),
            decision.entity.name()
        ));
        if let Some(matched) = decision.matched.as_deref().filter(|m| *m != decision.entity.name()) {
            out.push_str(&format!(" (exists as {})", matched.yellow()));
        }
        if let Some(error) = &decision.error {
            out.push_str(&format!(" ({})", error.red()));
        }
        out.push('\n');
    }
    out.push_str(&format!("{} to create, {} to skip\n", report.creates(), report.skips()));
    out
}
