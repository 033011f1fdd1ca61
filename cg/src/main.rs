//! consentgen - consent-blocking trigger generator
//!
//! CLI entry point for expanding, planning and running trigger batches.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use consentgen::cli::{AxisArgs, CheckArgs, Cli, Command, OutputFormat};
use consentgen::config::Config;
use consentgen::connector::GtmConnector;
use consentgen::runner::{self, render_plan, render_run};
use consentgen::{Cancellation, ExistenceChecker, Expander, RateLimiter, SnapshotMode, TemplateStore, Writer};

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

/// Priority: CLI --log-level > config file > RUST_LOG > INFO
fn log_filter(cli_log_level: Option<&str>, config_log_level: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_log_level.or(config_log_level).map(parse_level) {
        return EnvFilter::builder()
            .parse_lossy(rust_log.unwrap_or_default())
            .add_directive(level.into());
    }
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::builder().parse_lossy(directives),
        _ => EnvFilter::new("info"),
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(cli_log_level, config_log_level, rust_log.as_deref());

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    debug!("Logging initialized");
    Ok(())
}

fn expander<'a>(store: &'a TemplateStore, config: &Config, axes: &AxisArgs) -> Expander<'a> {
    let mut expander = Expander::new(store);
    let kinds = if axes.kinds.is_empty() { &config.templates.kinds } else { &axes.kinds };
    if !kinds.is_empty() {
        expander = expander.with_kinds(kinds.iter().copied());
    }
    let categories = if axes.categories.is_empty() {
        &config.templates.categories
    } else {
        &axes.categories
    };
    if !categories.is_empty() {
        expander = expander.with_categories(categories.iter().copied());
    }
    expander
}

fn writer(config: &Config, check: &CheckArgs) -> Writer {
    let checker = ExistenceChecker::new(check.normalize_order || config.check.normalize_order);
    let snapshot = if check.snapshot_per_item {
        SnapshotMode::PerItem
    } else {
        config.check.snapshot_mode()
    };
    debug!(normalize_order = checker.normalizes_order(), ?snapshot, "writer: configured");
    Writer::new(RateLimiter::new(&config.rate_limit), checker, snapshot)
}

/// Cancel the batch on Ctrl-C
fn cancel_on_interrupt() -> Cancellation {
    let (handle, cancel) = consentgen::cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining entities");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let store = config.templates.store();

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Expand { axes } => {
            let triggers = expander(&store, &config, &axes).expand();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&triggers)?),
                OutputFormat::Text => {
                    for (i, trigger) in triggers.iter().enumerate() {
                        println!(
                            "{:>3}. {} {}",
                            i + 1,
                            trigger.name,
                            trigger.regex_target().unwrap_or_default().dimmed()
                        );
                    }
                }
            }
        }
        Command::Plan { workspace, axes, check } => {
            let connector = GtmConnector::from_config(&config.connector)?;
            let entities = runner::batch(&store, &expander(&store, &config, &axes));
            let writer = writer(&config, &check);

            let report = runner::plan(&connector, &workspace, entities, &writer).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", render_plan(&report)),
            }
        }
        Command::Run { workspace, axes, check } => {
            let connector = GtmConnector::from_config(&config.connector)?;
            let entities = runner::batch(&store, &expander(&store, &config, &axes));
            let mut writer = writer(&config, &check);
            let cancel = cancel_on_interrupt();

            info!(workspace = %workspace, count = entities.len(), "Starting run");
            let report = runner::run(&connector, &workspace, entities, &mut writer, &cancel).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", render_run(&report)),
            }
            if report.exit_code() != 0 {
                std::process::exit(report.exit_code());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_rust_log_applies_without_explicit_level() {
        let filter = log_filter(None, None, Some("debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_info_when_nothing_is_set() {
        assert_eq!(log_filter(None, None, None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(None, None, Some("  ")).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_cli_level_beats_config_level() {
        let filter = log_filter(Some("trace"), Some("warn"), None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = log_filter(None, Some("warn"), None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("loud"), tracing::Level::INFO);
        assert_eq!(parse_level("Warning"), tracing::Level::WARN);
    }
}
