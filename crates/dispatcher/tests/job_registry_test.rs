use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use harvest_config::{EngineConfig, PipelineExecutorConfig};
use harvest_dispatcher::{InMemoryJobRegistry, JobRegistry, JobRegistryDeps};
use harvest_domain::{
    DestinationKind, EngineEvent, EventBus, JobFilter, JobMetrics, JobStatus, SourceKind,
};
use harvest_errors::ErrorKind;
use harvest_observability::MetricsCollector;
use harvest_pipeline::{PipelineExecutor, StrategyRegistry};
use harvest_testing_utils::{
    wait_for_job_status, MockExtractor, MockLoader, MockPersistence, MockScraperSource,
    ScraperBuilder,
};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    registry: InMemoryJobRegistry,
    scrapers: MockScraperSource,
    persistence: MockPersistence,
    events: EventBus,
}

async fn harness(capacity: usize, extractor: MockExtractor, loader: MockLoader) -> Harness {
    let strategies = Arc::new(StrategyRegistry::new());
    strategies
        .register_extractor(SourceKind::Simulated, Arc::new(extractor))
        .await;
    strategies
        .register_loader(DestinationKind::Database, Arc::new(loader))
        .await;

    let metrics = Arc::new(MetricsCollector::new());
    let events = EventBus::new(128);
    let persistence = MockPersistence::new();
    let executor = Arc::new(
        PipelineExecutor::new(
            strategies,
            PipelineExecutorConfig::default(),
            metrics.clone(),
            events.clone(),
        )
        .with_persistence(Arc::new(persistence.clone())),
    );

    let scrapers = MockScraperSource::with_scrapers(vec![
        ScraperBuilder::new("s1").build(),
        ScraperBuilder::new("s2").build(),
        ScraperBuilder::new("s3").build(),
        ScraperBuilder::new("s4").build(),
        ScraperBuilder::new("off").disabled().build(),
    ]);

    let config = EngineConfig {
        max_concurrent_jobs: capacity,
        ..Default::default()
    };
    let registry = InMemoryJobRegistry::new(
        config,
        JobRegistryDeps {
            scrapers: Arc::new(scrapers.clone()),
            executor,
            persistence: Some(Arc::new(persistence.clone())),
            metrics,
            events: events.clone(),
            health: None,
        },
    );

    Harness {
        registry,
        scrapers,
        persistence,
        events,
    }
}

fn slow_extractor(millis: u64) -> MockExtractor {
    MockExtractor::new("mock").with_delay(Duration::from_millis(millis))
}

fn loader() -> MockLoader {
    MockLoader::new("mock", DestinationKind::Database)
}

#[tokio::test]
async fn test_admission_up_to_capacity_then_resource_exhausted() {
    let h = harness(3, slow_extractor(2_000), loader()).await;

    let results = join_all(["s1", "s2", "s3"].map(|id| h.registry.run_scraper(id))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(h.registry.active_job_count().await, 3);

    let err = h.registry.run_scraper("s4").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(err.should_backoff());

    for job in results.into_iter().flatten() {
        assert_eq!(job.status, JobStatus::Running);
        assert!(h.registry.stop_job(job.id).await.unwrap());
    }
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_slot_is_released_when_job_completes() {
    let h = harness(1, slow_extractor(200), loader()).await;

    let j1 = h.registry.run_scraper("s1").await.unwrap();
    assert_eq!(j1.status, JobStatus::Running);

    let err = h.registry.run_scraper("s1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    let done = wait_for_job_status(
        || h.registry.get_job_status(j1.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .expect("job should finish");
    assert_eq!(done.status, JobStatus::Completed);

    let j2 = h.registry.run_scraper("s1").await.unwrap();
    assert_ne!(j1.id, j2.id);
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_completed_job_records_a_valid_status_path() {
    let h = harness(2, slow_extractor(20), loader()).await;

    let job = h.registry.run_scraper("s1").await.unwrap();
    let done = wait_for_job_status(
        || h.registry.get_job_status(job.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .unwrap();

    let path = done.status_path();
    assert_eq!(
        path,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
    assert!(path.windows(2).all(|pair| pair[0].can_transition_to(pair[1])));
    assert_eq!(done.metrics.records_extracted, Some(5));
    assert_eq!(done.metrics.records_loaded, Some(5));
    assert!(done.pipeline_run_id.is_some());

    let saved = h.persistence.latest_job(job.id).unwrap();
    assert_eq!(saved.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_load_failure_marks_job_failed_and_keeps_counts() {
    let h = harness(2, slow_extractor(0), loader().failing("target offline")).await;

    let job = h.registry.run_scraper("s1").await.unwrap();
    let done = wait_for_job_status(
        || h.registry.get_job_status(job.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.last_error.unwrap().contains("target offline"));
    assert_eq!(done.metrics.records_extracted, Some(5));
    assert_eq!(done.metrics.records_transformed, Some(5));
    assert_eq!(done.metrics.records_loaded, None);
}

#[tokio::test]
async fn test_admission_errors() {
    let h = harness(2, slow_extractor(0), loader()).await;

    let err = h.registry.run_scraper("off").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = h.registry.run_scraper("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.scrapers.set_enabled("off", true);
    assert!(h.registry.run_scraper("off").await.is_ok());
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_stop_job_is_immediate_and_idempotent() {
    let h = harness(1, slow_extractor(10_000), loader()).await;

    let job = h.registry.run_scraper("s1").await.unwrap();
    assert!(h.registry.stop_job(job.id).await.unwrap());
    assert_eq!(
        h.registry.get_job_status(job.id).await.unwrap().status,
        JobStatus::Stopped
    );
    assert_eq!(h.registry.active_job_count().await, 0);
    assert!(!h.registry.stop_job(job.id).await.unwrap());
    assert!(!h.registry.cancel_job(job.id).await.unwrap());

    // 停止后名额立即释放
    assert!(h.registry.run_scraper("s2").await.is_ok());

    let err = h.registry.stop_job(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_update_job_status_enforces_state_machine() {
    let h = harness(2, slow_extractor(10_000), loader()).await;
    let job = h.registry.run_scraper("s1").await.unwrap();

    let metrics = JobMetrics {
        records_extracted: Some(42),
        ..Default::default()
    };
    assert!(h
        .registry
        .update_job_status(job.id, JobStatus::Completed, Some(metrics))
        .await
        .unwrap());
    let current = h.registry.get_job_status(job.id).await.unwrap();
    assert_eq!(current.status, JobStatus::Completed);
    assert_eq!(current.metrics.records_extracted, Some(42));

    let err = h
        .registry
        .update_job_status(job.id, JobStatus::Running, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let err = h
        .registry
        .update_job_status(Uuid::new_v4(), JobStatus::Running, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_pause_frees_slot_and_resume_rechecks_capacity() {
    let h = harness(1, slow_extractor(300), loader()).await;

    let j1 = h.registry.run_scraper("s1").await.unwrap();
    assert!(h.registry.pause_job(j1.id).await.unwrap());
    assert!(!h.registry.pause_job(j1.id).await.unwrap());

    let status = h.registry.get_system_status().await;
    assert_eq!(status.active_jobs, 0);
    assert_eq!(status.paused_jobs, 1);

    let j2 = h.registry.run_scraper("s2").await.unwrap();
    let err = h.registry.resume_job(j1.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    wait_for_job_status(
        || h.registry.get_job_status(j2.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .unwrap();

    // 暂停期间作业停在阶段边界
    assert_eq!(
        h.registry.get_job_status(j1.id).await.unwrap().status,
        JobStatus::Paused
    );
    assert!(h.registry.resume_job(j1.id).await.unwrap());
    let done = wait_for_job_status(
        || h.registry.get_job_status(j1.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        done.status_path(),
        vec![
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Running,
            JobStatus::Completed
        ]
    );
}

#[tokio::test]
async fn test_system_status_is_stable_without_activity() {
    let h = harness(4, slow_extractor(10_000), loader()).await;
    h.registry.run_scraper("s1").await.unwrap();
    h.registry.run_scraper("s2").await.unwrap();

    let first = h.registry.get_system_status().await;
    let second = h.registry.get_system_status().await;
    assert_eq!(first.active_jobs, 2);
    assert_eq!(first.active_jobs, second.active_jobs);
    assert_eq!(first.capacity, 4);
    assert_eq!(first.available_slots, 2);
    assert_eq!(first.health_status, harvest_domain::HealthStatus::Healthy);
    assert!(first.last_health_check.is_none());
    h.registry.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_list_jobs_and_events() {
    let h = harness(4, slow_extractor(0), loader()).await;
    let mut events = h.events.subscribe();

    let a = h.registry.run_scraper("s1").await.unwrap();
    let b = h.registry.run_scraper("s2").await.unwrap();
    for id in [a.id, b.id] {
        wait_for_job_status(|| h.registry.get_job_status(id), JobStatus::is_terminal, WAIT)
            .await
            .unwrap();
    }

    let all = h.registry.list_jobs(&JobFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let only_s1 = h
        .registry
        .list_jobs(&JobFilter {
            scraper_id: Some("s1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(only_s1.len(), 1);
    assert_eq!(only_s1[0].id, a.id);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::JobStatusChanged { job_id, to, .. } = event {
            if job_id == a.id {
                transitions.push(to);
            }
        }
    }
    assert_eq!(transitions, vec![JobStatus::Running, JobStatus::Completed]);
}

#[tokio::test]
async fn test_panicking_pipeline_fails_job_and_frees_slot() {
    let extractor = MockExtractor::new("mock").panicking_times(1);
    let h = harness(1, extractor.clone(), loader()).await;

    let job = h.registry.run_scraper("s1").await.unwrap();
    let done = wait_for_job_status(
        || h.registry.get_job_status(job.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .expect("panicked job should still finish");
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done
        .last_error
        .as_deref()
        .unwrap()
        .contains("mock extractor blew up"));
    assert_eq!(h.registry.active_job_count().await, 0);

    let retry = h.registry.run_scraper("s1").await.unwrap();
    let done = wait_for_job_status(
        || h.registry.get_job_status(retry.id),
        JobStatus::is_terminal,
        WAIT,
    )
    .await
    .expect("second run should finish");
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(extractor.calls(), 2);
    h.registry.shutdown(WAIT).await;
}
