//! In-memory mock implementations of the engine ports
//!
//! Every mock is cheap to clone; clones share state so a test can keep a handle
//! for assertions after handing the mock to the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harvest_domain::{
    DestinationKind, ExtractRequest, Extractor, HealthSnapshot, Job, LoadRequest, LoadResult,
    Loader, PersistenceSink, PipelineRun, Record, ResourceSampler, ResourceUsage,
    ScraperDescriptor, ScraperFilter, ScraperSource, WorkflowExecution,
};
use harvest_errors::{HarvestError, HarvestResult};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Mock scraper descriptor source
#[derive(Debug, Clone, Default)]
pub struct MockScraperSource {
    scrapers: Arc<Mutex<HashMap<String, ScraperDescriptor>>>,
}

impl MockScraperSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scrapers(scrapers: Vec<ScraperDescriptor>) -> Self {
        let source = Self::new();
        for scraper in scrapers {
            source.add_scraper(scraper);
        }
        source
    }

    pub fn add_scraper(&self, scraper: ScraperDescriptor) {
        self.scrapers
            .lock()
            .unwrap()
            .insert(scraper.id.clone(), scraper);
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        if let Some(scraper) = self.scrapers.lock().unwrap().get_mut(id) {
            scraper.enabled = enabled;
        }
    }

    pub fn count(&self) -> usize {
        self.scrapers.lock().unwrap().len()
    }
}

#[async_trait]
impl ScraperSource for MockScraperSource {
    async fn get_scraper_by_id(&self, id: &str) -> HarvestResult<ScraperDescriptor> {
        self.scrapers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| HarvestError::scraper_not_found(id))
    }

    async fn list_scrapers(&self, filter: &ScraperFilter) -> HarvestResult<Vec<ScraperDescriptor>> {
        let mut scrapers: Vec<_> = self
            .scrapers
            .lock()
            .unwrap()
            .values()
            .filter(|scraper| filter.matches(scraper))
            .cloned()
            .collect();
        scrapers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scrapers)
    }
}

/// Mock persistence that records every write
#[derive(Debug, Clone, Default)]
pub struct MockPersistence {
    jobs: Arc<Mutex<Vec<Job>>>,
    runs: Arc<Mutex<Vec<PipelineRun>>>,
    executions: Arc<Mutex<Vec<WorkflowExecution>>>,
    snapshots: Arc<Mutex<Vec<HealthSnapshot>>>,
    failing: Arc<AtomicBool>,
    unreachable: Arc<AtomicBool>,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a persistence error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `ping` fail
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn saved_jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Latest saved version of each job
    pub fn latest_job(&self, id: uuid::Uuid) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|job| job.id == id)
            .cloned()
    }

    pub fn saved_runs(&self) -> Vec<PipelineRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn saved_executions(&self) -> Vec<WorkflowExecution> {
        self.executions.lock().unwrap().clone()
    }

    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    fn check_failing(&self) -> HarvestResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HarvestError::persistence("mock persistence failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for MockPersistence {
    async fn save_job(&self, job: &Job) -> HarvestResult<()> {
        self.check_failing()?;
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn save_pipeline_run(&self, run: &PipelineRun) -> HarvestResult<()> {
        self.check_failing()?;
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn save_workflow_execution(&self, execution: &WorkflowExecution) -> HarvestResult<()> {
        self.check_failing()?;
        self.executions.lock().unwrap().push(execution.clone());
        Ok(())
    }

    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> HarvestResult<()> {
        self.check_failing()?;
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn ping(&self) -> HarvestResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HarvestError::persistence("mock database unreachable"));
        }
        Ok(())
    }
}

/// Generate `count` records shaped like a scraped listing
pub fn sample_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let mut record = Record::new();
            record.insert("id".to_string(), json!(i + 1));
            record.insert("title".to_string(), json!(format!("  Item {}  ", i + 1)));
            record.insert("amount".to_string(), json!(format!("{}", (i + 1) * 10)));
            record
        })
        .collect()
}

async fn simulate_delay(delay: Duration, cancel: &CancellationToken) -> HarvestResult<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(HarvestError::Cancelled("mock operation cancelled".to_string())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Mock extractor returning a fixed record set
#[derive(Debug, Clone)]
pub struct MockExtractor {
    name: String,
    records: Vec<Record>,
    delay: Duration,
    failure: Option<String>,
    /// Remaining calls that fail before the extractor starts succeeding
    fail_times: Arc<AtomicUsize>,
    /// Remaining calls that panic instead of returning
    panic_times: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ExtractRequest>>>,
}

impl MockExtractor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: sample_records(5),
            delay: Duration::ZERO,
            failure: None,
            fail_times: Arc::new(AtomicUsize::new(0)),
            panic_times: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    pub fn with_record_count(self, count: usize) -> Self {
        self.with_records(sample_records(count))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Fail the first `times` calls, then succeed
    pub fn failing_times(self, times: usize) -> Self {
        self.fail_times.store(times, Ordering::SeqCst);
        self
    }

    /// Panic on the first `times` calls, then behave normally
    pub fn panicking_times(self, times: usize) -> Self {
        self.panic_times.store(times, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExtractRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        simulate_delay(self.delay, cancel).await?;

        let panics = self.panic_times.load(Ordering::SeqCst);
        if panics > 0 {
            self.panic_times.store(panics - 1, Ordering::SeqCst);
            panic!("mock extractor blew up");
        }
        if let Some(message) = &self.failure {
            return Err(HarvestError::execution("extract", message.clone()));
        }
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(HarvestError::execution("extract", "transient mock failure"));
        }
        Ok(self.records.clone())
    }
}

/// Mock loader that keeps every written record
#[derive(Debug, Clone)]
pub struct MockLoader {
    name: String,
    destination: DestinationKind,
    delay: Duration,
    failure: Option<String>,
    fail_times: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<Record>>>,
}

impl MockLoader {
    pub fn new(name: &str, destination: DestinationKind) -> Self {
        Self {
            name: name.to_string(),
            destination,
            delay: Duration::ZERO,
            failure: None,
            fail_times: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn failing_times(self, times: usize) -> Self {
        self.fail_times.store(times, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Record> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Loader for MockLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        records: &[Record],
        _request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_delay(self.delay, cancel).await?;

        if let Some(message) = &self.failure {
            return Err(HarvestError::execution("load", message.clone()));
        }
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(HarvestError::execution("load", "transient mock failure"));
        }

        self.written.lock().unwrap().extend_from_slice(records);
        Ok(LoadResult {
            records_written: records.len() as u64,
            duration_ms: self.delay.as_millis() as u64,
            destination: self.destination,
            location: Some(format!("mock://{}", self.name)),
        })
    }
}

/// Resource sampler returning fixed, adjustable readings
#[derive(Debug, Clone)]
pub struct StaticResourceSampler {
    usage: Arc<Mutex<(f32, f32, f32)>>,
    failing: Arc<AtomicBool>,
}

impl StaticResourceSampler {
    pub fn new(cpu_percent: f32, memory_percent: f32, disk_percent: f32) -> Self {
        Self {
            usage: Arc::new(Mutex::new((cpu_percent, memory_percent, disk_percent))),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn healthy() -> Self {
        Self::new(10.0, 20.0, 30.0)
    }

    pub fn set(&self, cpu_percent: f32, memory_percent: f32, disk_percent: f32) {
        *self.usage.lock().unwrap() = (cpu_percent, memory_percent, disk_percent);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceSampler for StaticResourceSampler {
    async fn sample(&self) -> HarvestResult<ResourceUsage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HarvestError::Internal("mock sampler failure".to_string()));
        }
        let (cpu_percent, memory_percent, disk_percent) = *self.usage.lock().unwrap();
        Ok(ResourceUsage {
            cpu_percent,
            memory_percent,
            disk_percent,
            memory_used_mb: (memory_percent * 160.0) as u64,
            memory_total_mb: 16_000,
            sampled_at: Utc::now(),
        })
    }
}
