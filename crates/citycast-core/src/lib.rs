pub mod config;
pub mod error;

pub use config::{
    Config, ProviderConfig, RetrySettings, StorageConfig, TablesConfig, TasksConfig,
    ValidationResult,
};
pub use error::{
    AppError, ConfigError, NetworkError, ReqwestErrorExt, RusqliteErrorExt, StorageError,
};

use anyhow::Result;

/// Initialize logging to stderr with `default_filter` unless `RUST_LOG` says otherwise
pub fn init_with_filter(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!("Citycast logging initialized");
    Ok(())
}
