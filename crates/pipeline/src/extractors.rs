//! 抽取策略的参考实现

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harvest_domain::{ExtractRequest, Extractor, Record};
use harvest_errors::{HarvestError, HarvestResult};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STAGE: &str = "extract";

/// 模拟抽取：按配置生成合成记录
///
/// 选项：`count`（记录数）、`latency_ms`（模拟耗时）、`fail`（为真时报错）。
pub struct SimulatedExtractor {
    default_count: usize,
    default_latency: Duration,
}

impl SimulatedExtractor {
    pub fn new(default_count: usize, default_latency: Duration) -> Self {
        Self {
            default_count,
            default_latency,
        }
    }
}

impl Default for SimulatedExtractor {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(50))
    }
}

#[async_trait]
impl Extractor for SimulatedExtractor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        let options = &request.config.options;
        let count = options
            .get("count")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .unwrap_or(self.default_count);
        let latency = options
            .get("latency_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.default_latency);

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarvestError::Cancelled("模拟抽取被取消".to_string()));
            }
            _ = tokio::time::sleep(latency) => {}
        }

        if options.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(HarvestError::execution(STAGE, "模拟数据源返回错误"));
        }

        let collected_at = Utc::now().to_rfc3339();
        let records = (0..count)
            .map(|i| {
                let mut record = Record::new();
                record.insert(
                    "id".to_string(),
                    json!(format!("{}-{}", request.scraper_id, i + 1)),
                );
                record.insert("scraper_id".to_string(), json!(request.scraper_id));
                record.insert("data_type".to_string(), json!(request.data_type));
                record.insert(
                    "title".to_string(),
                    json!(format!("{} record {}", request.data_type, i + 1)),
                );
                record.insert("sequence".to_string(), json!(i + 1));
                record.insert("collected_at".to_string(), json!(collected_at));
                if let Some(url) = &request.source_url {
                    record.insert("source_url".to_string(), json!(url));
                }
                record
            })
            .collect::<Vec<_>>();

        info!(
            scraper_id = %request.scraper_id,
            records = records.len(),
            "模拟抽取完成"
        );
        Ok(records)
    }
}

/// 文件抽取：读取 JSON 数组或逐行 JSON
///
/// 路径取 `options.path`，否则取 `file://` 形式的采集器来源地址。
pub struct FileExtractor;

impl FileExtractor {
    fn resolve_path(request: &ExtractRequest) -> HarvestResult<PathBuf> {
        if let Some(path) = request.config.options.get("path").and_then(Value::as_str) {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = request
            .source_url
            .as_deref()
            .and_then(|url| url.strip_prefix("file://"))
        {
            return Ok(PathBuf::from(path));
        }
        Err(HarvestError::invalid_field(
            "extract.options.path",
            "文件抽取需要指定路径",
        ))
    }
}

/// 解析 JSON 数组或逐行 JSON，非对象值包装为 `{"value": ...}`
pub fn parse_records(content: &str) -> HarvestResult<Vec<Record>> {
    let trimmed = content.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| HarvestError::execution(STAGE, format!("解析JSON数组失败: {e}")))?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    HarvestError::execution(STAGE, format!("第{}行JSON无效: {e}", index + 1))
                })
            })
            .collect::<HarvestResult<_>>()?
    };

    Ok(values.into_iter().map(into_record).collect())
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => {
            let mut record = Record::new();
            record.insert("value".to_string(), other);
            record
        }
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    fn name(&self) -> &str {
        "file"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        let path = Self::resolve_path(request)?;
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled("文件抽取被取消".to_string()));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            HarvestError::execution(STAGE, format!("读取文件失败 {}: {e}", path.display()))
        })?;
        let records = parse_records(&content)?;

        info!(path = %path.display(), records = records.len(), "文件抽取完成");
        Ok(records)
    }
}

/// HTTP 抽取：GET 请求并把响应体解析为记录
///
/// 响应为数组时逐项作为记录；为对象时按 `options.records_field`（默认依次尝试
/// `data`、`results`、`items`）取数组，都不存在则整个对象作为一条记录。
pub struct HttpExtractor {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn records_from_body(body: Value, records_field: Option<&str>) -> Vec<Record> {
        match body {
            Value::Array(items) => items.into_iter().map(into_record).collect(),
            Value::Object(mut map) => {
                let fields: Vec<&str> = match records_field {
                    Some(field) => vec![field],
                    None => vec!["data", "results", "items"],
                };
                for field in fields {
                    if matches!(map.get(field), Some(Value::Array(_))) {
                        if let Some(Value::Array(items)) = map.remove(field) {
                            return items.into_iter().map(into_record).collect();
                        }
                    }
                }
                vec![map]
            }
            other => vec![into_record(other)],
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        let options = &request.config.options;
        let url = options
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| request.source_url.clone())
            .ok_or_else(|| HarvestError::invalid_field("extract.options.url", "缺少请求地址"))?;

        let mut builder = self.client.get(&url).timeout(self.timeout);
        if let Some(headers) = options.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(key.as_str(), value);
                }
            }
        }

        info!(scraper_id = %request.scraper_id, url = %url, "执行HTTP抽取");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HarvestError::Cancelled("HTTP抽取被取消".to_string()));
            }
            response = builder.send() => response
                .map_err(|e| HarvestError::execution(STAGE, format!("HTTP请求失败: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "HTTP抽取返回非成功状态");
            return Err(HarvestError::execution(
                STAGE,
                format!("HTTP请求失败，状态码: {}", status.as_u16()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| HarvestError::execution(STAGE, format!("解析响应体失败: {e}")))?;
        let records_field = options.get("records_field").and_then(Value::as_str);
        Ok(Self::records_from_body(body, records_field))
    }
}
