use harvest_config::{AppConfig, DatabaseBackend, DatabaseConfig};
use harvest_domain::{JobStatus, PersistenceSink, ScraperFilter, ScraperSource};
use harvest_infrastructure::{ConfigScraperSource, PersistenceBackend, SqlitePersistence};
use harvest_testing_utils::ScraperBuilder;

#[tokio::test]
async fn test_sqlite_backend_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("harvest.db").display()),
        ..Default::default()
    };

    let mut job = harvest_domain::Job::new("ca-bills", "bills");
    job.transition(JobStatus::Running, None).unwrap();
    {
        let backend = PersistenceBackend::connect(&config, 10).await.unwrap();
        backend.sink.save_job(&job).await.unwrap();
        backend.close().await;
    }

    let backend = PersistenceBackend::connect(&config, 10).await.unwrap();
    let database = backend.database.as_ref().unwrap();
    let persistence = SqlitePersistence::new(database.pool().clone());
    let stored = persistence.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.scraper_id, "ca-bills");
}

#[tokio::test]
async fn test_memory_backend_has_no_database() {
    let config = DatabaseConfig {
        backend: DatabaseBackend::Memory,
        ..Default::default()
    };
    let backend = PersistenceBackend::connect(&config, 10).await.unwrap();
    assert!(backend.database.is_none());
    backend.sink.ping().await.unwrap();
}

#[tokio::test]
async fn test_scraper_source_built_from_config() {
    let mut config = AppConfig::default();
    config.scrapers.push((&ScraperBuilder::new("ny-bills").build()).into());
    config
        .scrapers
        .push((&ScraperBuilder::new("ny-votes").disabled().build()).into());

    let source = ConfigScraperSource::from_config(&config);
    assert_eq!(source.len().await, 2);
    assert!(!source.get_scraper_by_id("ny-votes").await.unwrap().enabled);
    let all = source.list_scrapers(&ScraperFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}
