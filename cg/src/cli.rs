//! CLI argument parsing for consentgen

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::template::{ConsentCategory, TriggerKind};

/// consentgen - consent-blocking trigger generator
#[derive(Parser, Debug)]
#[command(name = "cg")]
#[command(author, version, about = "Generate consent-blocking triggers into a tag manager workspace", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Expansion axis filters shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct AxisArgs {
    /// Only expand this trigger kind (repeatable)
    #[arg(short = 'k', long = "kind", value_parser = parse_kind)]
    pub kinds: Vec<TriggerKind>,

    /// Only expand this consent category (repeatable)
    #[arg(short = 'g', long = "category", value_parser = parse_category)]
    pub categories: Vec<ConsentCategory>,
}

/// Existence check overrides
#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Compare parameter lists regardless of order
    #[arg(long)]
    pub normalize_order: bool,

    /// Re-list the remote collection before every entity
    #[arg(long)]
    pub snapshot_per_item: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create missing variable and triggers in a workspace
    Run {
        /// Workspace name (created if absent)
        #[arg(short, long, required = true)]
        workspace: String,

        #[command(flatten)]
        axes: AxisArgs,

        #[command(flatten)]
        check: CheckArgs,
    },

    /// Show create/skip decisions without writing
    Plan {
        /// Workspace name
        #[arg(short, long, required = true)]
        workspace: String,

        #[command(flatten)]
        axes: AxisArgs,

        #[command(flatten)]
        check: CheckArgs,
    },

    /// Print the expanded triggers
    Expand {
        #[command(flatten)]
        axes: AxisArgs,
    },
}

fn parse_kind(s: &str) -> Result<TriggerKind, String> {
    s.parse()
}

fn parse_category(s: &str) -> Result<ConsentCategory, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "cg",
            "run",
            "--workspace",
            "Consent",
            "--kind",
            "pageview",
            "-k",
            "customEvent",
            "--category",
            "marketing-and-advertising",
            "--normalize-order",
        ])
        .unwrap();

        match cli.command {
            Command::Run { workspace, axes, check } => {
                assert_eq!(workspace, "Consent");
                assert_eq!(axes.kinds, vec![TriggerKind::Pageview, TriggerKind::CustomEvent]);
                assert_eq!(axes.categories, vec![ConsentCategory::MarketingAndAdvertising]);
                assert!(check.normalize_order);
                assert!(!check.snapshot_per_item);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["cg", "expand", "--kind", "scrollDepth"]).is_err());
    }

    #[test]
    fn test_plan_requires_workspace() {
        assert!(Cli::try_parse_from(["cg", "plan"]).is_err());
    }

    #[test]
    fn test_global_format() {
        let cli = Cli::try_parse_from(["cg", "expand", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
