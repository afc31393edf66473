//! End-to-end task pipeline against a mocked weather provider.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use citycast_geo::MappingTables;
use citycast_tasks::{
    Orchestrator, ReadError, RegionBuckets, ResultStore, SqliteStatusStore, StatusStore,
    TaskFailure, TaskId, TaskLimits, TaskService, TaskView,
};
use citycast_weather::{ErrorRecord, ResultRecord, RetryConfig, WeatherProvider};
use tempfile::TempDir;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TYPOS: &str = r#"{"Kyev": "Kyiv", "Tokio": "Tokyo"}"#;
const ALIASES: &str = r#"{"Kiev": "Kyiv", "Nyc": "New York"}"#;
const REGIONS: &str = r#"{
    "Europe": ["Kyiv", "Paris", "Oslo"],
    "Asia": ["Tokyo"],
    "America": ["New York", "Lima"]
}"#;

struct Harness {
    server: MockServer,
    dir: TempDir,
    status: StatusStore,
}

impl Harness {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().unwrap(),
            status: StatusStore::memory(),
        }
    }

    fn data_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("weather_data")
    }

    fn service(&self, limits: TaskLimits) -> TaskService {
        self.service_with(limits, self.status.clone(), &self.data_dir())
    }

    fn service_with(&self, limits: TaskLimits, status: StatusStore, data_dir: &Path) -> TaskService {
        let tables = Arc::new(MappingTables::from_json(TYPOS, ALIASES, REGIONS).unwrap());
        let provider = WeatherProvider::new(
            &format!("{}/data/2.5/weather", self.server.uri()),
            "test-key",
            "metric",
            Duration::from_secs(5),
            RetryConfig::none(),
        )
        .unwrap();

        TaskService::new(Orchestrator::new(
            tables,
            Arc::new(provider),
            ResultStore::new(data_dir),
            status,
            limits,
        ))
    }

    async fn weather(&self, query: &str, name: &str, temp: f64, delay: Duration) {
        Mock::given(method("GET"))
            .and(query_param("q", query))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "name": name,
                        "main": {"temp": temp},
                        "weather": [{"description": "scattered clouds"}]
                    }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    async fn status_code(&self, query: &str, status: u16, delay: Duration) {
        Mock::given(method("GET"))
            .and(query_param("q", query))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    fn object_count(&self) -> usize {
        let Ok(regions) = fs::read_dir(self.data_dir()) else {
            return 0;
        };
        regions
            .filter_map(Result::ok)
            .filter_map(|r| fs::read_dir(r.path()).ok())
            .flat_map(|entries| entries.filter_map(Result::ok))
            .count()
    }
}

fn cities(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn run_to_end(service: &TaskService, names: &[&str]) -> (TaskId, TaskView) {
    let id = service.submit(cities(names)).await.unwrap();
    service.shutdown().await;
    let view = service.status(&id).await.unwrap();
    (id, view)
}

fn completed(view: TaskView) -> RegionBuckets {
    match view {
        TaskView::Completed { result } => result,
        other => panic!("expected completed task, got {:?}", other),
    }
}

fn failed(view: TaskView) -> TaskFailure {
    match view {
        TaskView::Failed { error } => error,
        other => panic!("expected failed task, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_spellings_fetch_separately() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(query_param("q", "Kyiv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Kyiv",
            "main": {"temp": -3.0},
            "weather": [{"description": "snow"}]
        })))
        .expect(3)
        .mount(&h.server)
        .await;

    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &["Kyiv", "kyiv ", "KYIV"]).await;

    let result = completed(view);
    assert_eq!(result.get("Europe").map(<[_]>::len), Some(3));
    assert_eq!(result.record_count(), 3);
}

#[tokio::test]
async fn test_all_success_persists_one_object_per_region() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 1.5, Duration::ZERO).await;
    h.weather("Paris", "Paris", 12.0, Duration::ZERO).await;
    h.weather("Tokyo", "Tokyo", 18.0, Duration::ZERO).await;
    h.weather("Smallville", "Smallville", 22.0, Duration::ZERO).await;

    let service = h.service(TaskLimits::default());
    let (id, view) = run_to_end(&service, &["kyiv", "PARIS", "tokio", "smallville"]).await;

    let result = completed(view);
    assert_eq!(
        result.regions().collect::<Vec<_>>(),
        vec!["Asia", "Europe", "Unknown"]
    );
    assert_eq!(h.object_count(), 3);

    let europe_file = h.data_dir().join("Europe").join(format!("task_{}.json", id));
    let europe: Vec<ResultRecord> = serde_json::from_slice(&fs::read(europe_file).unwrap()).unwrap();
    assert_eq!(europe.len(), 2);
    assert_eq!(Some(europe.as_slice()), result.get("Europe"));

    let asia = service.region_results("Asia").await.unwrap();
    assert_eq!(asia.len(), 1);
    assert_eq!(asia[0].city(), "Tokyo");
}

#[tokio::test]
async fn test_not_found_city_lands_in_incorrect() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 4.0, Duration::ZERO).await;
    h.status_code("Atlantis", 404, Duration::ZERO).await;

    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &["kyev", "atlantis"]).await;

    let result = completed(view);
    assert_eq!(
        result.get("Incorrect"),
        Some(&[ResultRecord::from(ErrorRecord::city_not_found("Atlantis"))][..])
    );
    assert_eq!(result.get("Europe").map(<[_]>::len), Some(1));
}

#[tokio::test]
async fn test_server_error_fails_task_and_persists_nothing() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 4.0, Duration::ZERO).await;
    h.weather("Paris", "Paris", 9.0, Duration::ZERO).await;
    h.status_code("Lima", 500, Duration::ZERO).await;

    let service = h.service(TaskLimits::default());
    let (_, view) = run_to_end(&service, &["Kyiv", "Lima", "Paris"]).await;

    match failed(view) {
        TaskFailure::Fetch { city, message } => {
            assert_eq!(city, "Lima");
            assert!(message.contains("500"));
        }
        other => panic!("unexpected failure {:?}", other),
    }
    assert_eq!(h.object_count(), 0);
    assert!(matches!(
        service.region_results("Europe").await,
        Err(ReadError::RegionNotFound(_))
    ));
}

#[tokio::test]
async fn test_first_failure_in_completion_order_wins() {
    let h = Harness::start().await;
    h.status_code("Oslo", 503, Duration::from_millis(400)).await;
    h.status_code("Lima", 500, Duration::ZERO).await;

    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &["Oslo", "Lima"]).await;

    assert!(matches!(failed(view), TaskFailure::Fetch { city, .. } if city == "Lima"));
}

#[tokio::test]
async fn test_out_of_range_temperature_fails_task() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 71.0, Duration::ZERO).await;

    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &["Kyiv"]).await;

    assert!(matches!(failed(view), TaskFailure::Fetch { .. }));
    assert_eq!(h.object_count(), 0);
}

#[tokio::test]
async fn test_classification_uses_input_city_not_provider_name() {
    let h = Harness::start().await;
    h.weather("New York", "New York City", 8.0, Duration::ZERO).await;

    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &["nyc"]).await;

    let result = completed(view);
    let america = result.get("America").unwrap();
    assert_eq!(america[0].city(), "New York City");
}

#[tokio::test]
async fn test_empty_region_is_not_found() {
    let h = Harness::start().await;
    let service = h.service(TaskLimits::default());

    assert!(matches!(
        service.region_results("Europe").await,
        Err(ReadError::RegionNotFound(_))
    ));
    assert!(matches!(
        service.region_results("../etc").await,
        Err(ReadError::RegionNotFound(_))
    ));
}

#[tokio::test]
async fn test_region_history_spans_tasks_and_skips_malformed() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 2.0, Duration::ZERO).await;
    h.weather("Paris", "Paris", 10.0, Duration::ZERO).await;

    run_to_end(&h.service(TaskLimits::default()), &["Kyiv"]).await;
    run_to_end(&h.service(TaskLimits::default()), &["Paris", "Kyiv"]).await;
    fs::write(h.data_dir().join("Europe").join("task_garbage.json"), b"[{]").unwrap();

    let records = h
        .service(TaskLimits::default())
        .region_results("Europe")
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn test_unknown_id_is_distinct_from_pending() {
    let h = Harness::start().await;
    let service = h.service(TaskLimits::default());

    let pending = TaskId::new();
    h.status.enqueue(&pending).await.unwrap();

    assert_eq!(service.status(&pending).await.unwrap(), TaskView::Pending);
    assert_eq!(service.status(&TaskId::new()).await.unwrap(), TaskView::Unknown);
    assert_eq!(service.status_by_str("not-a-uuid").await.unwrap(), TaskView::Unknown);
}

#[tokio::test]
async fn test_submit_returns_before_lookups_finish() {
    let h = Harness::start().await;
    let delay = Duration::from_millis(500);
    h.weather("Kyiv", "Kyiv", 1.0, delay).await;
    h.weather("Tokyo", "Tokyo", 15.0, delay).await;

    let service = h.service(TaskLimits::default());
    let started = Instant::now();
    let id = service.submit(cities(&["Kyiv", "Tokyo"])).await.unwrap();
    assert!(started.elapsed() < delay, "submit waited for lookups");

    let first = service.status(&id).await.unwrap();
    assert!(
        matches!(first, TaskView::Pending | TaskView::Running),
        "unexpected status right after submit: {:?}",
        first
    );

    // The pipeline marks itself running before the slow lookups return
    let deadline = Instant::now() + Duration::from_millis(400);
    let mut view = service.status(&id).await.unwrap();
    while view != TaskView::Running && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
        view = service.status(&id).await.unwrap();
    }
    assert_eq!(view, TaskView::Running);
    assert_eq!(service.in_flight(), 1);

    service.shutdown().await;
    let result = completed(service.status(&id).await.unwrap());
    assert_eq!(result.record_count(), 2);
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test]
async fn test_lookups_run_concurrently() {
    let h = Harness::start().await;
    let delay = Duration::from_millis(300);
    for city in ["Kyiv", "Paris", "Oslo", "Tokyo", "Lima"] {
        h.weather(city, city, 10.0, delay).await;
    }

    let started = Instant::now();
    let (_, view) = run_to_end(
        &h.service(TaskLimits::default()),
        &["Kyiv", "Paris", "Oslo", "Tokyo", "Lima"],
    )
    .await;

    assert_eq!(completed(view).record_count(), 5);
    assert!(started.elapsed() < delay * 4, "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_concurrency_cap_serializes_lookups() {
    let h = Harness::start().await;
    let delay = Duration::from_millis(150);
    for city in ["Kyiv", "Paris", "Oslo"] {
        h.weather(city, city, 10.0, delay).await;
    }

    let limits = TaskLimits {
        max_concurrent_fetches: Some(1),
        fetch_timeout: None,
    };
    let started = Instant::now();
    let (_, view) = run_to_end(&h.service(limits), &["Kyiv", "Paris", "Oslo"]).await;

    assert_eq!(completed(view).record_count(), 3);
    assert!(started.elapsed() >= delay * 3, "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_slow_lookup_times_out() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 3.0, Duration::ZERO).await;
    h.weather("Tokyo", "Tokyo", 20.0, Duration::from_secs(3)).await;

    let limits = TaskLimits {
        max_concurrent_fetches: None,
        fetch_timeout: Some(Duration::from_millis(200)),
    };
    let (_, view) = run_to_end(&h.service(limits), &["Kyiv", "Tokyo"]).await;

    assert_eq!(
        failed(view),
        TaskFailure::Timeout {
            city: "Tokyo".to_string()
        }
    );
    assert_eq!(h.object_count(), 0);
}

#[tokio::test]
async fn test_persistence_failure_fails_task() {
    let h = Harness::start().await;
    h.weather("Kyiv", "Kyiv", 3.0, Duration::ZERO).await;

    let blocked = h.dir.path().join("not-a-dir");
    fs::write(&blocked, b"occupied").unwrap();

    let service = h.service_with(TaskLimits::default(), h.status.clone(), &blocked);
    let (_, view) = run_to_end(&service, &["Kyiv"]).await;

    assert!(matches!(failed(view), TaskFailure::Persistence { .. }));
}

#[tokio::test]
async fn test_empty_submission_completes_empty() {
    let h = Harness::start().await;
    let (_, view) = run_to_end(&h.service(TaskLimits::default()), &[]).await;

    assert!(completed(view).is_empty());
    assert_eq!(h.object_count(), 0);
}

#[tokio::test]
async fn test_sqlite_status_survives_service_restart() {
    let h = Harness::start().await;
    h.weather("Paris", "Paris", 14.0, Duration::ZERO).await;
    let db = h.dir.path().join("tasks.db");

    let status = StatusStore::sqlite(SqliteStatusStore::open(&db).unwrap());
    let service = h.service_with(TaskLimits::default(), status, &h.data_dir());
    let (id, _) = run_to_end(&service, &["paris"]).await;
    drop(service);

    let reopened = StatusStore::sqlite(SqliteStatusStore::open(&db).unwrap());
    let service = h.service_with(TaskLimits::default(), reopened, &h.data_dir());
    let result = completed(service.status(&id).await.unwrap());
    assert_eq!(result.get("Europe").map(<[_]>::len), Some(1));
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let h = Harness::start().await;
    let service = h.service(TaskLimits::default());
    service.shutdown().await;

    assert!(service.submit(cities(&["Kyiv"])).await.is_err());
}
