use std::sync::Arc;
use std::time::Duration;

use harvest::Application;
use harvest_config::{AppConfig, DatabaseConfig, ScraperEntry};
use harvest_domain::{
    DestinationKind, EngineEvent, HealthStatus, JobFilter, JobStatus, SourceKind,
};
use harvest_errors::ErrorKind;
use harvest_testing_utils::{
    wait_for_job_status, ScraperBuilder, StaticResourceSampler, StepSpecBuilder,
    WorkflowSpecBuilder,
};
use serde_json::json;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

fn test_config(dir: &TempDir) -> AppConfig {
    let file_scraper = ScraperBuilder::new("to-file")
        .with_source(SourceKind::Simulated)
        .with_extract_options(json!({ "count": 4, "latency_ms": 10 }))
        .with_destination(DestinationKind::File)
        .with_load_options(json!({ "path": dir.path().join("to-file.jsonl") }))
        .build();
    let db_scraper = ScraperBuilder::new("to-db")
        .with_source(SourceKind::Simulated)
        .with_extract_options(json!({ "count": 3, "latency_ms": 10 }))
        .with_destination(DestinationKind::Database)
        .build();
    let slow_scraper = ScraperBuilder::new("slow")
        .with_source(SourceKind::Simulated)
        .with_extract_options(json!({ "count": 1, "latency_ms": 30_000 }))
        .with_destination(DestinationKind::File)
        .build();

    let mut config = AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        },
        scrapers: vec![
            ScraperEntry::from(&file_scraper),
            ScraperEntry::from(&db_scraper),
            ScraperEntry::from(&slow_scraper),
        ],
        ..Default::default()
    };
    config.pipeline.output_dir = dir.path().display().to_string();
    config.engine.max_concurrent_jobs = 2;
    config.workflow.scheduler_interval_seconds = 1;
    config
}

async fn start(dir: &TempDir) -> Application {
    Application::with_sampler(test_config(dir), Arc::new(StaticResourceSampler::healthy()))
        .await
        .expect("application should start")
}

#[tokio::test]
async fn test_run_scraper_to_completion_writes_file() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;

    let job = app
        .run_scraper_to_completion("to-file", WAIT)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.metrics.records_loaded, Some(4));

    let written = std::fs::read_to_string(dir.path().join("to-file.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 4);
    app.shutdown().await;
}

#[tokio::test]
async fn test_database_destination_uses_shared_pool() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;

    let job = app.run_scraper("to-db").await.unwrap();
    let done = wait_for_job_status(|| app.get_job_status(job.id), JobStatus::is_terminal, WAIT)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.metrics.records_loaded, Some(3));

    let jobs = app.list_jobs(&JobFilter::default()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_capacity_and_job_control_through_application() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;

    let a = app.run_scraper("slow").await.unwrap();
    let b = app.run_scraper("slow").await.unwrap();
    let err = app.run_scraper("to-file").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    assert!(app.pause_job(a.id).await.unwrap());
    assert_eq!(app.get_system_status().await.available_slots, 1);
    assert!(app.cancel_job(b.id).await.unwrap());
    assert!(app.resume_job(a.id).await.unwrap());
    assert!(app.stop_job(a.id).await.unwrap());

    let status = app.get_system_status().await;
    assert_eq!(status.active_jobs, 0);
    assert_eq!(status.capacity, 2);
    app.shutdown().await;
}

#[tokio::test]
async fn test_workflow_create_and_execute() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;
    let output = dir.path().join("workflow.jsonl");

    let spec = WorkflowSpecBuilder::new("daily-import")
        .with_schedule("daily")
        .with_step(
            StepSpecBuilder::extract("extract", "simulated")
                .with_config(json!({ "count": 2, "latency_ms": 0 }))
                .build(),
        )
        .with_step(StepSpecBuilder::transform("transform").build())
        .with_step(
            StepSpecBuilder::load("load", "file")
                .with_config(json!({ "path": output }))
                .build(),
        )
        .build();
    let workflow_id = app.create_workflow(&spec).await.unwrap();

    let execution = app
        .execute_workflow(workflow_id, json!({ "data_type": "permits" }))
        .await
        .unwrap();
    assert!(execution.success, "{:?}", execution.error);
    assert_eq!(execution.step_results.len(), 3);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap().lines().count(),
        2
    );

    let report = app.get_workflow_status(workflow_id).await.unwrap();
    assert_eq!(report.executions_total, 1);
    assert!(report.definition.next_run_at.is_none());
    assert_eq!(app.list_workflows().await.len(), 1);

    assert!(app
        .schedule_workflow(workflow_id, None, json!({}))
        .await
        .unwrap());
    let report = app.get_workflow_status(workflow_id).await.unwrap();
    assert!(report.definition.next_run_at.is_some());

    assert!(app.cancel_workflow(workflow_id).await.unwrap());
    assert!(!app
        .schedule_workflow(workflow_id, None, json!({}))
        .await
        .unwrap());

    let invalid = WorkflowSpecBuilder::new("broken").without_schedule().build();
    let err = app.create_workflow(&invalid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    app.shutdown().await;
}

#[tokio::test]
async fn test_health_snapshot_and_background_loop() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;
    let mut events = app.events().subscribe();

    let snapshot = app.get_health_snapshot().await;
    assert_eq!(snapshot.overall, HealthStatus::Healthy);
    assert_eq!(snapshot.database.status, HealthStatus::Healthy);
    assert!(matches!(
        events.recv().await.unwrap(),
        EngineEvent::HealthReported { .. }
    ));

    app.start_background().await;
    let status = app.get_system_status().await;
    assert_eq!(status.health_status, HealthStatus::Healthy);
    assert!(status.last_health_check.is_some());

    tokio::time::timeout(WAIT, app.shutdown())
        .await
        .expect("shutdown should finish");
}

#[tokio::test]
async fn test_serve_returns_after_signal_and_shutdown_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;
    let job = app.run_scraper("slow").await.unwrap();

    tokio::time::timeout(WAIT, app.serve(tokio::time::sleep(Duration::from_millis(50))))
        .await
        .expect("serve should return")
        .unwrap();

    let stopped = app.get_job_status(job.id).await.unwrap();
    assert_eq!(stopped.status, JobStatus::Stopped);

    tokio::time::timeout(Duration::from_secs(1), app.shutdown())
        .await
        .expect("second shutdown is a no-op");
}

#[tokio::test]
async fn test_reload_scrapers_replaces_configuration() {
    let dir = TempDir::new().unwrap();
    let app = start(&dir).await;

    app.reload_scrapers(vec![ScraperBuilder::new("fresh")
        .with_extract_options(json!({ "count": 1, "latency_ms": 0 }))
        .with_destination(DestinationKind::File)
        .build()])
        .await;

    let err = app.run_scraper("to-file").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let job = app.run_scraper_to_completion("fresh", WAIT).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    app.shutdown().await;
}

#[test]
fn test_printed_config_round_trips() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let printed = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&printed).unwrap();
    assert_eq!(parsed.engine, config.engine);
    assert_eq!(parsed.database, config.database);
    assert_eq!(parsed.scrapers.len(), 3);
    assert_eq!(parsed.scrapers[1].pipeline.load.destination, DestinationKind::Database);
}
