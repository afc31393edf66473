use std::sync::Arc;

use anyhow::{Context, Result};
use citycast_core::Config;
use citycast_geo::MappingTables;
use citycast_weather::WeatherProvider;

use crate::orchestrator::{Orchestrator, TaskLimits};
use crate::results::ResultStore;
use crate::service::TaskService;
use crate::status::{SqliteStatusStore, StatusStore};

/// Application state: a task service wired from configuration
pub struct App {
    service: TaskService,
}

impl App {
    /// Wire the pipeline from an already loaded configuration.
    ///
    /// Fails when the mapping tables are missing or malformed, the provider
    /// has no API key, or the status database cannot be opened.
    pub fn from_config(config: Config) -> Result<Self> {
        let tables = MappingTables::load(&config.tables).context("Failed to load mapping tables")?;
        let tables = Arc::new(tables);

        let provider = WeatherProvider::from_config(&config.provider, &config.retry)
            .context("Failed to configure weather provider")?;

        let status = open_status_db(&config)?;

        let orchestrator = Orchestrator::new(
            Arc::clone(&tables),
            Arc::new(provider),
            ResultStore::new(&config.storage.data_dir),
            status,
            TaskLimits::from(&config.tasks),
        );

        tracing::info!(
            "Citycast ready: results in {}, {} regions known",
            config.storage.data_dir.display(),
            tables.region_names().count()
        );

        Ok(Self {
            service: TaskService::new(orchestrator),
        })
    }

    /// Open the stores for status and region queries only.
    ///
    /// Skips the mapping tables and the provider, so a missing API key does
    /// not prevent reading what earlier tasks recorded.
    pub fn reader(config: &Config) -> Result<Self> {
        let status = open_status_db(config)?;
        let results = ResultStore::new(&config.storage.data_dir);

        Ok(Self {
            service: TaskService::reader(status, results),
        })
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    /// Drain in-flight tasks
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down citycast");
        self.service.shutdown().await;
    }
}

fn open_status_db(config: &Config) -> Result<StatusStore> {
    let store = SqliteStatusStore::open(&config.storage.status_db).with_context(|| {
        format!(
            "Failed to open task database {}",
            config.storage.status_db.display()
        )
    })?;
    Ok(StatusStore::sqlite(store))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::service::ServiceError;
    use crate::task::{TaskId, TaskView};
    use std::fs;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        fs::write(dir.join("typos.json"), r#"{"Kyev": "Kyiv"}"#).unwrap();
        fs::write(dir.join("aliases.json"), r#"{"Kiev": "Kyiv"}"#).unwrap();
        fs::write(dir.join("regions.json"), r#"{"Europe": ["Kyiv"]}"#).unwrap();

        let mut config = Config::default();
        config.provider.api_key = Some("test-key".into());
        config.tables.typos = dir.join("typos.json");
        config.tables.aliases = dir.join("aliases.json");
        config.tables.regions = dir.join("regions.json");
        config.storage.data_dir = dir.join("weather_data");
        config.storage.status_db = dir.join("db").join("tasks.db");
        config
    }

    #[tokio::test]
    async fn test_app_wires_from_config() {
        let dir = tempdir().unwrap();
        let app = App::from_config(config_in(dir.path())).unwrap();

        assert!(dir.path().join("db").join("tasks.db").exists());
        assert_eq!(app.service().in_flight(), 0);
        app.shutdown().await;
    }

    #[test]
    fn test_missing_tables_are_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.tables.regions = dir.path().join("absent.json");

        let err = App::from_config(config).err().unwrap();
        assert!(format!("{:#}", err).contains("mapping tables"));
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.provider.api_key = None;

        assert!(App::from_config(config).is_err());
    }

    #[tokio::test]
    async fn test_reader_needs_no_api_key_or_tables() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.provider.api_key = None;
        config.tables.regions = dir.path().join("absent.json");

        let app = App::reader(&config).unwrap();
        assert_eq!(
            app.service().status_by_str(&TaskId::new().to_string()).await.unwrap(),
            TaskView::Unknown
        );
        assert!(matches!(
            app.service().submit(vec!["Kyiv".into()]).await,
            Err(ServiceError::ReadOnly)
        ));
    }
}
