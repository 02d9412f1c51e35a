use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harvest_config::{PipelineExecutorConfig, WorkflowEngineConfig};
use harvest_dispatcher::{
    RetryPolicy, StepHandler, StepInput, StepOutput, WorkflowEngine, WorkflowScheduler,
};
use harvest_domain::{
    DestinationKind, EngineEvent, EventBus, ExecutionTrigger, SourceKind, StepType,
};
use harvest_errors::{ErrorKind, HarvestResult};
use harvest_observability::MetricsCollector;
use harvest_pipeline::{PipelineExecutor, StrategyRegistry};
use harvest_testing_utils::{
    wait_until, MockExtractor, MockLoader, MockPersistence, StepSpecBuilder, WorkflowSpecBuilder,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct Harness {
    engine: Arc<WorkflowEngine>,
    extractor: MockExtractor,
    loader: MockLoader,
    persistence: MockPersistence,
    events: EventBus,
}

async fn harness(extractor: MockExtractor, loader: MockLoader) -> Harness {
    let strategies = Arc::new(StrategyRegistry::new());
    strategies
        .register_extractor(SourceKind::Database, Arc::new(extractor.clone()))
        .await;
    strategies
        .register_extractor(SourceKind::Simulated, Arc::new(extractor.clone()))
        .await;
    strategies
        .register_loader(DestinationKind::File, Arc::new(loader.clone()))
        .await;

    let metrics = Arc::new(MetricsCollector::new());
    let events = EventBus::new(64);
    let executor = Arc::new(PipelineExecutor::new(
        strategies,
        PipelineExecutorConfig::default(),
        metrics.clone(),
        events.clone(),
    ));
    let persistence = MockPersistence::new();
    let config = WorkflowEngineConfig {
        step_timeout_seconds: 5,
        execution_history_limit: 3,
        ..Default::default()
    };
    let engine = WorkflowEngine::new(config, executor, metrics, events.clone())
        .with_persistence(Arc::new(persistence.clone()))
        .with_retry_policy(RetryPolicy::immediate());

    Harness {
        engine: Arc::new(engine),
        extractor,
        loader,
        persistence,
        events,
    }
}

fn etl_spec(schedule: &str) -> harvest_domain::WorkflowSpec {
    WorkflowSpecBuilder::new("nightly-bills")
        .with_schedule(schedule)
        .with_step(StepSpecBuilder::extract("pull", "db").build())
        .with_step(
            StepSpecBuilder::transform("clean")
                .with_config(json!({
                    "type_conversions": { "amount": "integer" },
                    "rules": [ { "op": "drop", "field": "id" } ]
                }))
                .build(),
        )
        .with_step(StepSpecBuilder::load("store", "file").build())
        .build()
}

#[tokio::test]
async fn test_missing_destination_is_reported_by_field() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;
    let spec = WorkflowSpecBuilder::new("broken")
        .with_step(StepSpecBuilder::extract("pull", "db").without_source().build())
        .with_step(StepSpecBuilder::transform("clean").build())
        .with_step(StepSpecBuilder::load("store", "file").without_destination().build())
        .without_schedule()
        .build();

    let err = h.engine.create_workflow(&spec).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
    assert_eq!(
        fields,
        vec!["schedule", "steps[0].source", "steps[2].destination"]
    );
    assert!(h.engine.list_workflows().await.is_empty());
}

#[tokio::test]
async fn test_daily_workflow_schedules_and_runs_steps_in_order() {
    let h = harness(
        MockExtractor::new("db").with_record_count(4),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    let mut events = h.events.subscribe();
    let id = h.engine.create_workflow(&etl_spec("daily")).await.unwrap();

    let before = Utc::now();
    assert!(h.engine.schedule_workflow(id, None, Value::Null).await.unwrap());
    let next = h.engine.get_workflow(id).await.unwrap().next_run_at.unwrap();
    let offset = next - before;
    assert!(offset >= chrono::Duration::hours(24));
    assert!(offset < chrono::Duration::hours(24) + chrono::Duration::seconds(5));

    let execution = h.engine.execute_workflow(id, Value::Null).await.unwrap();
    assert!(execution.success);
    assert_eq!(execution.trigger, ExecutionTrigger::Manual);
    let order: Vec<(&str, StepType)> = execution
        .step_results
        .iter()
        .map(|r| (r.step_name.as_str(), r.step_type))
        .collect();
    assert_eq!(
        order,
        vec![
            ("pull", StepType::Extract),
            ("clean", StepType::Transform),
            ("store", StepType::Load)
        ]
    );
    assert!(execution.step_results.iter().all(|r| r.records == Some(4)));

    let written = h.loader.written();
    assert_eq!(written.len(), 4);
    assert!(written[0].get("id").is_none());
    assert_eq!(written[0]["amount"], json!(10));

    assert_eq!(h.persistence.saved_executions().len(), 1);
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        EngineEvent::WorkflowFinished { success: true, steps_completed: 3, .. }
    ));
}

#[tokio::test]
async fn test_step_retries_until_success() {
    let h = harness(
        MockExtractor::new("db").failing_times(2),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    let spec = WorkflowSpecBuilder::etl("retrying")
        .with_max_retries(2)
        .build();
    let id = h.engine.create_workflow(&spec).await.unwrap();

    let execution = h.engine.execute_workflow(id, Value::Null).await.unwrap();
    assert!(execution.success);
    assert_eq!(execution.step_results[0].attempts, 3);
    assert_eq!(execution.step_results[0].retry_count, 2);
    assert_eq!(h.extractor.calls(), 3);
}

#[tokio::test]
async fn test_first_failing_step_stops_the_workflow() {
    let h = harness(
        MockExtractor::new("db").failing_times(5),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    let spec = WorkflowSpecBuilder::etl("fragile").with_max_retries(1).build();
    let id = h.engine.create_workflow(&spec).await.unwrap();

    let execution = h.engine.execute_workflow(id, Value::Null).await.unwrap();
    assert!(!execution.success);
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(execution.step_results[0].attempts, 2);
    assert!(execution.error.unwrap().contains("pull"));
    assert_eq!(h.loader.calls(), 0);
}

#[tokio::test]
async fn test_load_failure_keeps_earlier_step_results() {
    let h = harness(
        MockExtractor::new("db"),
        MockLoader::new("file", DestinationKind::File).failing("disk full"),
    )
    .await;
    let spec = WorkflowSpecBuilder::etl("partial").with_max_retries(0).build();
    let id = h.engine.create_workflow(&spec).await.unwrap();

    let execution = h.engine.execute_workflow(id, Value::Null).await.unwrap();
    assert!(!execution.success);
    let success: Vec<bool> = execution.step_results.iter().map(|r| r.success).collect();
    assert_eq!(success, vec![true, true, false]);
    assert!(execution.step_results[2]
        .error
        .as_deref()
        .unwrap()
        .contains("disk full"));
}

struct CountingHandler;

#[async_trait]
impl StepHandler for CountingHandler {
    async fn handle(
        &self,
        input: StepInput,
        _cancel: &CancellationToken,
    ) -> HarvestResult<StepOutput> {
        let keep = input.config["keep"].as_u64().unwrap_or(1) as usize;
        Ok(StepOutput {
            output: json!({ "seen": input.records.len(), "region": input.params["region"] }),
            records: Some(input.records.into_iter().take(keep).collect()),
        })
    }
}

#[tokio::test]
async fn test_custom_handler_can_reshape_records() {
    let h = harness(
        MockExtractor::new("db").with_record_count(6),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    h.engine
        .register_handler("sample", Arc::new(CountingHandler))
        .await;
    let spec = WorkflowSpecBuilder::new("sampled")
        .with_step(StepSpecBuilder::extract("pull", "db").build())
        .with_step(
            StepSpecBuilder::custom("take-two", "sample")
                .with_config(json!({ "keep": 2 }))
                .build(),
        )
        .with_step(StepSpecBuilder::load("store", "file").build())
        .build();
    let id = h.engine.create_workflow(&spec).await.unwrap();

    let execution = h
        .engine
        .execute_workflow(id, json!({ "region": "north" }))
        .await
        .unwrap();
    assert!(execution.success);
    assert_eq!(execution.step_results[1].output["seen"], json!(6));
    assert_eq!(execution.step_results[1].output["region"], json!("north"));
    assert_eq!(h.loader.written().len(), 2);
}

#[tokio::test]
async fn test_unknown_custom_handler_fails_the_step() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;
    let spec = WorkflowSpecBuilder::new("orphan")
        .with_step(StepSpecBuilder::custom("notify", "missing-handler").build())
        .with_max_retries(3)
        .build();
    let id = h.engine.create_workflow(&spec).await.unwrap();

    let execution = h.engine.execute_workflow(id, Value::Null).await.unwrap();
    assert!(!execution.success);
    assert_eq!(execution.step_results[0].attempts, 1);
}

#[tokio::test]
async fn test_cancel_interrupts_running_execution() {
    let h = harness(
        MockExtractor::new("db").with_delay(Duration::from_secs(3)),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    let id = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("slow").build())
        .await
        .unwrap();

    let engine = h.engine.clone();
    let running = tokio::spawn(async move { engine.execute_workflow(id, Value::Null).await });
    assert!(
        wait_until(
            || async { h.engine.get_workflow_status(id).await.unwrap().running },
            Duration::from_secs(2)
        )
        .await
    );

    assert!(h.engine.cancel_workflow(id).await.unwrap());
    let execution = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("execution should stop promptly")
        .unwrap()
        .unwrap();
    assert!(!execution.success);
    assert_eq!(execution.step_results.len(), 1);

    let status = h.engine.get_workflow_status(id).await.unwrap();
    assert!(!status.running);
    assert_eq!(status.executions_total, 1);
}

#[tokio::test]
async fn test_scheduler_runs_due_workflows() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;
    let once = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("once").build())
        .await
        .unwrap();
    let daily = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("daily").with_schedule("daily").build())
        .await
        .unwrap();
    let unscheduled = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("idle").build())
        .await
        .unwrap();

    h.engine
        .schedule_workflow(once, None, json!({ "data_type": "bills" }))
        .await
        .unwrap();
    h.engine.schedule_workflow(daily, None, Value::Null).await.unwrap();

    let scheduler = WorkflowScheduler::new(h.engine.clone(), Duration::from_secs(60));
    assert_eq!(scheduler.tick().await, 1);
    assert!(h.engine.get_workflow(once).await.unwrap().next_run_at.is_none());
    assert_eq!(scheduler.tick().await, 0);

    let tomorrow = Utc::now() + chrono::Duration::hours(25);
    let executions = h.engine.run_due_workflows(tomorrow).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].workflow_id, daily);
    assert_eq!(executions[0].trigger, ExecutionTrigger::Scheduled);
    let next = h.engine.get_workflow(daily).await.unwrap().next_run_at.unwrap();
    assert_eq!(next, tomorrow + chrono::Duration::hours(24));

    assert!(h.engine.executions(unscheduled).await.is_empty());
    let once_runs = h.engine.executions(once).await;
    assert_eq!(once_runs[0].params["data_type"], json!("bills"));
    assert_eq!(h.extractor.requests()[0].data_type, "bills");
}

#[tokio::test]
async fn test_execution_history_is_bounded() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;
    let id = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("busy").build())
        .await
        .unwrap();

    for _ in 0..5 {
        h.engine.execute_workflow(id, Value::Null).await.unwrap();
    }
    assert_eq!(h.engine.executions(id).await.len(), 3);
    assert_eq!(h.persistence.saved_executions().len(), 5);
}

#[tokio::test]
async fn test_unparseable_cron_is_rejected_on_create_and_update() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;

    for schedule in ["run it every single day", "0 0 0 32 * *"] {
        let err = h
            .engine
            .create_workflow(&etl_spec(schedule))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{schedule}");
        let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["schedule"], "{schedule}");
    }
    assert!(h.engine.list_workflows().await.is_empty());

    let id = h.engine.create_workflow(&etl_spec("0 30 2 * * *")).await.unwrap();
    let err = h
        .engine
        .update_workflow(id, &etl_spec("61 * * * *"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.field_errors()[0].field, "schedule");
    let kept = h.engine.get_workflow(id).await.unwrap();
    assert_eq!(kept.version, 1);
    assert_eq!(kept.schedule.to_string(), "0 30 2 * * *");
}

#[tokio::test]
async fn test_scheduler_shutdown_interrupts_running_tick() {
    let h = harness(
        MockExtractor::new("db").with_delay(Duration::from_secs(30)),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;
    let id = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("long-haul").build())
        .await
        .unwrap();
    h.engine.schedule_workflow(id, None, Value::Null).await.unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle =
        WorkflowScheduler::new(h.engine.clone(), Duration::from_millis(50)).start(shutdown_rx);
    assert!(
        wait_until(
            || async { h.engine.get_workflow_status(id).await.unwrap().running },
            Duration::from_secs(2)
        )
        .await
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler should stop promptly")
        .unwrap();

    let executions = h.engine.executions(id).await;
    assert_eq!(executions.len(), 1);
    assert!(!executions[0].success);
    assert_eq!(executions[0].trigger, ExecutionTrigger::Scheduled);
    assert!(!h.engine.get_workflow_status(id).await.unwrap().running);
}

#[tokio::test]
async fn test_stopped_engine_rejects_new_executions() {
    let h = harness(MockExtractor::new("db"), MockLoader::new("file", DestinationKind::File)).await;
    let id = h
        .engine
        .create_workflow(&WorkflowSpecBuilder::etl("late").build())
        .await
        .unwrap();
    h.engine.schedule_workflow(id, None, Value::Null).await.unwrap();

    assert_eq!(h.engine.cancel_running().await, 0);
    let err = h.engine.execute_workflow(id, Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(h.engine.run_due_workflows(Utc::now()).await.is_empty());
    assert_eq!(h.extractor.calls(), 0);
}

#[tokio::test]
async fn test_cancel_racing_with_execute_never_leaves_a_run_behind() {
    let h = harness(
        MockExtractor::new("db").with_delay(Duration::from_secs(5)),
        MockLoader::new("file", DestinationKind::File),
    )
    .await;

    for round in 0..20 {
        let id = h
            .engine
            .create_workflow(&WorkflowSpecBuilder::etl(&format!("race-{round}")).build())
            .await
            .unwrap();
        let engine = h.engine.clone();
        let execute = tokio::spawn(async move { engine.execute_workflow(id, Value::Null).await });
        tokio::task::yield_now().await;
        assert!(h.engine.cancel_workflow(id).await.unwrap());

        let result = tokio::time::timeout(Duration::from_secs(2), execute)
            .await
            .expect("execution must observe the cancellation")
            .unwrap();
        match result {
            Ok(execution) => assert!(!execution.success),
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidState),
        }
        assert!(!h.engine.get_workflow_status(id).await.unwrap().running);
    }
}
