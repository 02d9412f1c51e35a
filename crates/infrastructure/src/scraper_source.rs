use std::collections::BTreeMap;

use async_trait::async_trait;
use harvest_config::AppConfig;
use harvest_domain::{ScraperDescriptor, ScraperFilter, ScraperSource};
use harvest_errors::{HarvestError, HarvestResult};
use tokio::sync::RwLock;
use tracing::info;

/// 由配置文件提供的采集器描述
///
/// 描述只随配置整体替换，引擎侧只读。
pub struct ConfigScraperSource {
    scrapers: RwLock<BTreeMap<String, ScraperDescriptor>>,
}

impl ConfigScraperSource {
    pub fn new(scrapers: Vec<ScraperDescriptor>) -> Self {
        Self {
            scrapers: RwLock::new(
                scrapers
                    .into_iter()
                    .map(|scraper| (scraper.id.clone(), scraper))
                    .collect(),
            ),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.scraper_descriptors())
    }

    /// 配置重新加载后整体替换
    pub async fn replace_all(&self, scrapers: Vec<ScraperDescriptor>) {
        let mut current = self.scrapers.write().await;
        *current = scrapers
            .into_iter()
            .map(|scraper| (scraper.id.clone(), scraper))
            .collect();
        info!(count = current.len(), "采集器描述已重新加载");
    }

    pub async fn len(&self) -> usize {
        self.scrapers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.scrapers.read().await.is_empty()
    }
}

#[async_trait]
impl ScraperSource for ConfigScraperSource {
    async fn get_scraper_by_id(&self, id: &str) -> HarvestResult<ScraperDescriptor> {
        self.scrapers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HarvestError::scraper_not_found(id))
    }

    async fn list_scrapers(&self, filter: &ScraperFilter) -> HarvestResult<Vec<ScraperDescriptor>> {
        Ok(self
            .scrapers
            .read()
            .await
            .values()
            .filter(|scraper| filter.matches(scraper))
            .cloned()
            .collect())
    }
}
