//! Citycast - batch weather lookups grouped by region
//!
//! ## Commands
//!
//! - `submit`: start a task for a list of cities
//! - `status`: show the state of a task
//! - `results`: list every record persisted for a region
//! - `check-config`: validate the configuration file

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use citycast_core::{AppError, Config, ConfigError, StorageError};
use citycast_tasks::{App, ReadError, ServiceError, StatusError};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "citycast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetch weather for batches of cities and group it by region", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/citycast/config.toml)
    #[arg(short, long, global = true, env = "CITYCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task for one or more cities
    Submit {
        /// City names, any casing
        #[arg(required = true)]
        cities: Vec<String>,

        /// Print the final task state instead of just the task id
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the status of a task
    Status {
        /// Task id returned by `submit`
        task_id: String,
    },

    /// List all persisted records for a region
    Results {
        /// Region label, e.g. "Europe", "Unknown" or "Incorrect"
        region: String,
    },

    /// Validate the configuration and report problems
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    if let Err(e) = citycast_core::init_with_filter(filter) {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let detail = format!("{:#}", e);
            let error = into_app_error(e);
            tracing::debug!("Command failed: {:?}", error);
            eprintln!("error: {}", error.user_message());
            eprintln!("  {}", detail);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Submit { cities, wait } => {
            cmd_submit(cli.config.as_deref(), cities, wait).await
        }
        Commands::Status { task_id } => cmd_status(cli.config.as_deref(), &task_id).await,
        Commands::Results { region } => cmd_results(cli.config.as_deref(), &region).await,
        Commands::CheckConfig => cmd_check_config(cli.config.as_deref()),
    }
}

/// Recover the typed error behind a command failure so the operator gets
/// the matching short message. Context layers stay in the printed detail.
fn into_app_error(err: anyhow::Error) -> AppError {
    let err = match err.downcast::<ConfigError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ServiceError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<StatusError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ReadError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<StorageError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    match err.downcast::<std::io::Error>() {
        Ok(e) => e.into(),
        Err(err) => AppError::Other(err),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let (config, validation) = Config::load_validated(path)?;
    tracing::debug!(
        "Configuration loaded with {} warning(s)",
        validation.warnings.len()
    );
    Ok(config)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", json);
    Ok(())
}

async fn cmd_submit(config: Option<&Path>, cities: Vec<String>, wait: bool) -> Result<()> {
    let app = App::from_config(load_config(config)?)?;
    let service = app.service();

    let id = service.submit(cities).await?;
    if !wait {
        println!("{}", id);
    }

    // The pipeline runs on this process's runtime; it has to finish before exit
    app.shutdown().await;

    if wait {
        print_json(&service.status(&id).await?)?;
    }
    Ok(())
}

async fn cmd_status(config: Option<&Path>, raw_id: &str) -> Result<()> {
    let app = App::reader(&load_config(config)?)?;
    let view = app.service().status_by_str(raw_id).await?;
    print_json(&view)
}

async fn cmd_results(config: Option<&Path>, region: &str) -> Result<()> {
    let app = App::reader(&load_config(config)?)?;
    let records = app.service().region_results(region).await?;
    print_json(&records)
}

fn cmd_check_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => Config::load_from(p)?,
        None => Config::load()?,
    };
    let validation = config.validate();

    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    for error in &validation.errors {
        println!("error: {}", error);
    }

    if !validation.is_valid() {
        anyhow::bail!("Configuration has {} error(s)", validation.errors.len());
    }

    println!("Configuration OK");
    println!("  Results directory: {}", config.storage.data_dir.display());
    println!("  Task database:     {}", config.storage.status_db.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_missing_region_reports_not_found() {
        let err = anyhow::Error::from(ReadError::RegionNotFound("Asia".into()));
        let error = into_app_error(err);
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn test_context_does_not_hide_config_errors() {
        let err = Err::<(), _>(ConfigError::MissingSetting("provider.api_key".into()))
            .context("Failed to configure weather provider")
            .unwrap_err();
        let error = into_app_error(err);
        assert!(matches!(error, AppError::Config(ConfigError::MissingSetting(_))));
        assert!(error.user_message().contains("setting is missing"));
    }

    #[test]
    fn test_storage_failure_behind_status_error() {
        let err = Err::<(), _>(StatusError::Storage(StorageError::ConnectionFailed(
            "tasks.db".into(),
        )))
        .context("Failed to open task database")
        .unwrap_err();
        assert!(matches!(into_app_error(err), AppError::Storage(_)));
    }

    #[test]
    fn test_untyped_failure_is_other() {
        let error = into_app_error(anyhow::anyhow!("boom"));
        assert!(matches!(error, AppError::Other(_)));
    }
}
