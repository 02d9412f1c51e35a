use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use harvest_config::PipelineExecutorConfig;
use harvest_domain::{DestinationKind, Extractor, Loader, SourceKind};
use harvest_errors::{HarvestError, HarvestResult};
use tokio::sync::RwLock;
use tracing::info;

use crate::extractors::{FileExtractor, HttpExtractor, SimulatedExtractor};
use crate::loaders::{ApiLoader, FileLoader};

/// 抽取/加载策略注册表
///
/// 来源与目标类型在配置加载时解析为枚举，这里按枚举查找。
/// 数据类型专用的抽取器优先于通用来源类型。
#[derive(Default)]
pub struct StrategyRegistry {
    extractors: RwLock<HashMap<SourceKind, Arc<dyn Extractor>>>,
    data_type_extractors: RwLock<HashMap<String, Arc<dyn Extractor>>>,
    loaders: RwLock<HashMap<DestinationKind, Arc<dyn Loader>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册不依赖外部资源的参考策略，数据库策略由基础设施层注册
    pub async fn with_defaults(config: &PipelineExecutorConfig) -> Self {
        let registry = Self::new();
        registry
            .register_extractor(
                SourceKind::Simulated,
                Arc::new(SimulatedExtractor::new(10, Duration::from_millis(50))),
            )
            .await;
        registry
            .register_extractor(SourceKind::File, Arc::new(FileExtractor))
            .await;
        registry
            .register_extractor(
                SourceKind::Http,
                Arc::new(HttpExtractor::new(config.http_timeout())),
            )
            .await;
        registry
            .register_loader(
                DestinationKind::File,
                Arc::new(FileLoader::new(&config.output_dir)),
            )
            .await;
        registry
            .register_loader(
                DestinationKind::Api,
                Arc::new(ApiLoader::new(config.http_timeout())),
            )
            .await;
        registry
    }

    pub async fn register_extractor(&self, kind: SourceKind, extractor: Arc<dyn Extractor>) {
        info!(source = %kind, extractor = extractor.name(), "注册抽取策略");
        self.extractors.write().await.insert(kind, extractor);
    }

    pub async fn register_data_type_extractor<S: Into<String>>(
        &self,
        data_type: S,
        extractor: Arc<dyn Extractor>,
    ) {
        let data_type = data_type.into();
        info!(data_type = %data_type, extractor = extractor.name(), "注册数据类型专用抽取策略");
        self.data_type_extractors
            .write()
            .await
            .insert(data_type, extractor);
    }

    pub async fn register_loader(&self, kind: DestinationKind, loader: Arc<dyn Loader>) {
        info!(destination = %kind, loader = loader.name(), "注册加载策略");
        self.loaders.write().await.insert(kind, loader);
    }

    pub async fn resolve_extractor(
        &self,
        data_type: &str,
        kind: SourceKind,
    ) -> HarvestResult<Arc<dyn Extractor>> {
        if let Some(extractor) = self.data_type_extractors.read().await.get(data_type) {
            return Ok(Arc::clone(extractor));
        }
        self.extractors
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| HarvestError::strategy_not_found(format!("extract:{kind}")))
    }

    pub async fn resolve_loader(&self, kind: DestinationKind) -> HarvestResult<Arc<dyn Loader>> {
        self.loaders
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| HarvestError::strategy_not_found(format!("load:{kind}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_errors::ErrorKind;

    #[tokio::test]
    async fn test_defaults_cover_reference_strategies() {
        let registry = StrategyRegistry::with_defaults(&PipelineExecutorConfig::default()).await;

        assert_eq!(
            registry
                .resolve_extractor("bills", SourceKind::File)
                .await
                .unwrap()
                .name(),
            "file"
        );
        assert_eq!(
            registry
                .resolve_loader(DestinationKind::Api)
                .await
                .unwrap()
                .name(),
            "api"
        );

        let err = registry
            .resolve_loader(DestinationKind::Database)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_data_type_extractor_takes_precedence() {
        let registry = StrategyRegistry::with_defaults(&PipelineExecutorConfig::default()).await;
        registry
            .register_data_type_extractor("legislators", Arc::new(FileExtractor))
            .await;

        let extractor = registry
            .resolve_extractor("legislators", SourceKind::Simulated)
            .await
            .unwrap();
        assert_eq!(extractor.name(), "file");

        let generic = registry
            .resolve_extractor("bills", SourceKind::Simulated)
            .await
            .unwrap();
        assert_eq!(generic.name(), "simulated");
    }
}
