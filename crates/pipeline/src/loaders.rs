//! 加载策略的参考实现

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use harvest_domain::{DestinationKind, LoadRequest, LoadResult, Loader, Record};
use harvest_errors::{HarvestError, HarvestResult};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STAGE: &str = "load";

/// 文件加载：逐行 JSON 写入
///
/// 路径取 `options.path`，否则在输出目录下按采集器、数据类型和时间戳生成文件名。
/// `options.append` 为真时追加写入。
pub struct FileLoader {
    output_dir: PathBuf,
}

impl FileLoader {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn resolve_path(&self, request: &LoadRequest) -> PathBuf {
        match request.config.options.get("path").and_then(Value::as_str) {
            Some(path) => PathBuf::from(path),
            None => self.output_dir.join(format!(
                "{}_{}_{}.jsonl",
                request.scraper_id,
                request.data_type,
                Utc::now().format("%Y%m%dT%H%M%S%.3f")
            )),
        }
    }
}

#[async_trait]
impl Loader for FileLoader {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(
        &self,
        records: &[Record],
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult> {
        let started = Instant::now();
        let path = self.resolve_path(request);
        let append = request
            .config
            .options
            .get("append")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HarvestError::execution(STAGE, format!("创建输出目录失败 {}: {e}", parent.display()))
            })?;
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled("文件加载被取消".to_string()));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| {
                HarvestError::execution(STAGE, format!("打开输出文件失败 {}: {e}", path.display()))
            })?;
        file.write_all(&buffer)
            .await
            .map_err(|e| HarvestError::execution(STAGE, format!("写入输出文件失败: {e}")))?;
        file.flush()
            .await
            .map_err(|e| HarvestError::execution(STAGE, format!("写入输出文件失败: {e}")))?;

        info!(path = %path.display(), records = records.len(), "文件加载完成");

        Ok(LoadResult {
            records_written: records.len() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
            destination: DestinationKind::File,
            location: Some(path.display().to_string()),
        })
    }
}

/// 外部 API 加载：按批次 POST JSON 数组
///
/// 选项：`url`（必填）、`batch_size`（默认100）、`headers`。
/// 某一批失败时之前的批次已经写入，不做补偿。
pub struct ApiLoader {
    client: reqwest::Client,
    timeout: Duration,
}

impl ApiLoader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Loader for ApiLoader {
    fn name(&self) -> &str {
        "api"
    }

    async fn load(
        &self,
        records: &[Record],
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult> {
        let started = Instant::now();
        let options = &request.config.options;
        let url = options
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::invalid_field("load.options.url", "缺少目标地址"))?;
        let batch_size = options
            .get("batch_size")
            .and_then(Value::as_u64)
            .filter(|size| *size > 0)
            .unwrap_or(100) as usize;

        let mut written = 0u64;
        for batch in records.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled(format!(
                    "API加载被取消，已写入 {written} 条"
                )));
            }

            let mut builder = self.client.post(url).timeout(self.timeout).json(batch);
            if let Some(headers) = options.get("headers").and_then(Value::as_object) {
                for (key, value) in headers {
                    if let Some(value) = value.as_str() {
                        builder = builder.header(key.as_str(), value);
                    }
                }
            }

            let response = builder.send().await.map_err(|e| {
                HarvestError::execution(
                    STAGE,
                    format!("API请求失败（已写入 {written} 条）: {e}"),
                )
            })?;
            if !response.status().is_success() {
                warn!(url = url, status = response.status().as_u16(), "API加载返回非成功状态");
                return Err(HarvestError::execution(
                    STAGE,
                    format!(
                        "API返回状态码 {}（已写入 {written} 条）",
                        response.status().as_u16()
                    ),
                ));
            }
            written += batch.len() as u64;
        }

        info!(url = url, records = written, "API加载完成");

        Ok(LoadResult {
            records_written: written,
            duration_ms: started.elapsed().as_millis() as u64,
            destination: DestinationKind::Api,
            location: Some(url.to_string()),
        })
    }
}
