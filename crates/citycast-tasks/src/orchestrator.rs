//! Per-task pipeline: normalize, fan out lookups, classify, aggregate,
//! persist, record the terminal status.

use std::sync::Arc;
use std::time::Duration;

use citycast_core::TasksConfig;
use citycast_geo::{CanonicalCity, MappingTables, Normalizer, RegionClassifier, INCORRECT_REGION};
use citycast_weather::{FetchOutcome, WeatherProvider};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::results::ResultStore;
use crate::status::{StatusError, StatusStore};
use crate::task::{RegionBuckets, TaskFailure, TaskId, TaskStatus};

/// Optional per-task limits; both off by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskLimits {
    pub max_concurrent_fetches: Option<usize>,
    pub fetch_timeout: Option<Duration>,
}

impl From<&TasksConfig> for TaskLimits {
    fn from(config: &TasksConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches.filter(|n| *n > 0),
            fetch_timeout: config
                .fetch_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        }
    }
}

pub struct Orchestrator {
    normalizer: Normalizer,
    classifier: RegionClassifier,
    provider: Arc<WeatherProvider>,
    results: ResultStore,
    status: StatusStore,
    limits: TaskLimits,
}

impl Orchestrator {
    pub fn new(
        tables: Arc<MappingTables>,
        provider: Arc<WeatherProvider>,
        results: ResultStore,
        status: StatusStore,
        limits: TaskLimits,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(Arc::clone(&tables)),
            classifier: RegionClassifier::new(tables),
            provider,
            results,
            status,
            limits,
        }
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    pub fn result_store(&self) -> &ResultStore {
        &self.results
    }

    /// Drive an enqueued task to its terminal status.
    ///
    /// Task-level failures are recorded in the status store, not returned;
    /// the error path is reserved for the status store itself failing.
    #[instrument(skip(self, cities), fields(task = %id, cities = cities.len()))]
    pub async fn run(&self, id: TaskId, cities: Vec<String>) -> Result<TaskStatus, StatusError> {
        self.status.set_running(&id).await?;
        tracing::info!("Task {} running", id);

        let failure = match self.execute(&id, &cities).await {
            Ok(buckets) => match self.status.set_success(&id, &buckets).await {
                Ok(()) => {
                    tracing::info!(
                        "Task {} succeeded with {} records in {} regions",
                        id,
                        buckets.record_count(),
                        buckets.regions().count()
                    );
                    return Ok(TaskStatus::Success);
                }
                Err(e) => {
                    tracing::error!("Recording success for task {} failed: {}", id, e);
                    self.discard_persisted(&id).await;
                    TaskFailure::Persistence {
                        message: e.to_string(),
                    }
                }
            },
            Err(failure) => failure,
        };

        tracing::error!("Task {} failed: {}", id, failure);
        self.status.set_failure(&id, &failure).await?;
        Ok(TaskStatus::Failure)
    }

    /// Canonicalize, fetch, aggregate and persist.
    ///
    /// Nothing is persisted unless every lookup settled without a hard error.
    pub async fn execute(
        &self,
        id: &TaskId,
        cities: &[String],
    ) -> Result<RegionBuckets, TaskFailure> {
        let canonical: Vec<CanonicalCity> = cities
            .iter()
            .map(|raw| self.normalizer.canonicalize(raw))
            .collect();

        let buckets = self.collect(canonical).await?;
        self.persist(id, &buckets).await?;
        Ok(buckets)
    }

    /// Fan out one lookup per city and merge results in completion order.
    ///
    /// Waits for every lookup even after a failure; the first failure joined
    /// is the one reported.
    async fn collect(&self, cities: Vec<CanonicalCity>) -> Result<RegionBuckets, TaskFailure> {
        let limiter = self
            .limits
            .max_concurrent_fetches
            .map(|n| Arc::new(Semaphore::new(n)));
        let timeout = self.limits.fetch_timeout;

        let mut join_set = JoinSet::new();
        for city in cities {
            let provider = Arc::clone(&self.provider);
            let limiter = limiter.clone();
            join_set.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = fetch_one(&provider, &city, timeout).await;
                (city, outcome)
            });
        }

        let mut buckets = RegionBuckets::new();
        let mut failure: Option<TaskFailure> = None;

        while let Some(joined) = join_set.join_next().await {
            let (city, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    failure.get_or_insert(TaskFailure::Internal {
                        message: format!("fetch task join error: {}", e),
                    });
                    continue;
                }
            };

            match outcome {
                Ok(FetchOutcome::Found(record)) => {
                    let region = self.classifier.classify_region(&city);
                    tracing::debug!("{} -> {}", city, region);
                    buckets.push(region, record.into());
                }
                Ok(FetchOutcome::NotFound(record)) => {
                    buckets.push(INCORRECT_REGION, record.into());
                }
                Err(e) if failure.is_none() => {
                    tracing::warn!("Lookup for {} failed: {}", city, e);
                    failure = Some(e);
                }
                Err(e) => {
                    tracing::debug!("Further lookup failure for {}: {}", city, e);
                }
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(buckets),
        }
    }

    async fn persist(&self, id: &TaskId, buckets: &RegionBuckets) -> Result<(), TaskFailure> {
        let store = self.results.clone();
        let id = *id;
        let buckets = buckets.clone();

        tokio::task::spawn_blocking(move || store.persist_task(&id, &buckets))
            .await
            .map_err(|e| TaskFailure::Internal {
                message: format!("persist worker failed: {}", e),
            })?
            .map(|_| ())
            .map_err(|e| TaskFailure::Persistence {
                message: e.to_string(),
            })
    }

    async fn discard_persisted(&self, id: &TaskId) {
        let store = self.results.clone();
        let id = *id;
        match tokio::task::spawn_blocking(move || store.remove_task(&id)).await {
            Ok(removed) => tracing::debug!("Removed {} result objects for task {}", removed, id),
            Err(e) => tracing::warn!("Cleanup for task {} did not run: {}", id, e),
        }
    }
}

async fn fetch_one(
    provider: &WeatherProvider,
    city: &CanonicalCity,
    timeout: Option<Duration>,
) -> Result<FetchOutcome, TaskFailure> {
    let fetched = match timeout {
        Some(limit) => tokio::time::timeout(limit, provider.fetch(city))
            .await
            .map_err(|_| TaskFailure::Timeout {
                city: city.to_string(),
            })?,
        None => provider.fetch(city).await,
    };

    fetched.map_err(|e| TaskFailure::Fetch {
        city: city.to_string(),
        message: e.to_string(),
    })
}
