//! 记录转换
//!
//! 处理顺序：字段重命名 → 显式规则 → 清洗 → 类型转换 → 必填过滤 → 附加来源元数据。
//! 类型转换采用宽松策略，无法解析的值原样保留。

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use harvest_domain::{FieldType, Record, TransformConfig, TransformRule};
use serde_json::{json, Number, Value};
use tracing::debug;

/// 元数据字段名
pub const METADATA_FIELD: &str = "_metadata";

#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    pub records: Vec<Record>,
    /// 因缺少必填字段被丢弃的记录数
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Transformer {
    pipeline_version: String,
}

impl Transformer {
    pub fn new<V: Into<String>>(pipeline_version: V) -> Self {
        Self {
            pipeline_version: pipeline_version.into(),
        }
    }

    pub fn pipeline_version(&self) -> &str {
        &self.pipeline_version
    }

    pub fn transform(
        &self,
        records: Vec<Record>,
        config: &TransformConfig,
        source: &str,
    ) -> TransformOutcome {
        let transformed_at = Utc::now().to_rfc3339();
        let mut required: BTreeSet<&str> =
            config.required_fields.iter().map(String::as_str).collect();
        for rule in &config.rules {
            if let TransformRule::Require { field } = rule {
                required.insert(field.as_str());
            }
        }

        let mut outcome = TransformOutcome::default();
        for mut record in records {
            self.apply_mappings(&mut record, config);
            for rule in &config.rules {
                apply_rule(&mut record, rule);
            }
            if config.clean {
                clean_record(&mut record);
            }
            for (field, target) in &config.type_conversions {
                if let Some(value) = record.get_mut(field) {
                    *value = coerce(value.take(), *target);
                }
            }

            if let Some(missing) = required.iter().find(|field| !has_value(&record, field)) {
                debug!(field = *missing, "丢弃缺少必填字段的记录");
                outcome.dropped += 1;
                continue;
            }

            record.insert(
                METADATA_FIELD.to_string(),
                json!({
                    "transformed_at": transformed_at,
                    "pipeline_version": self.pipeline_version,
                    "source": source,
                }),
            );
            outcome.records.push(record);
        }
        outcome
    }

    fn apply_mappings(&self, record: &mut Record, config: &TransformConfig) {
        for (from, to) in &config.field_mappings {
            if let Some(value) = record.remove(from) {
                record.insert(to.clone(), value);
            }
        }
    }
}

fn apply_rule(record: &mut Record, rule: &TransformRule) {
    match rule {
        TransformRule::Rename { from, to } => {
            if let Some(value) = record.remove(from) {
                record.insert(to.clone(), value);
            }
        }
        TransformRule::Convert { field, to } => {
            if let Some(value) = record.get_mut(field) {
                *value = coerce(value.take(), *to);
            }
        }
        TransformRule::Drop { field } => {
            record.remove(field);
        }
        TransformRule::Default { field, value } => {
            let missing = record.get(field).map(Value::is_null).unwrap_or(true);
            if missing {
                record.insert(field.clone(), value.clone());
            }
        }
        // 在整条记录处理完后统一检查
        TransformRule::Require { .. } => {}
    }
}

fn clean_record(record: &mut Record) {
    for value in record.values_mut() {
        if let Value::String(s) = value {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
    }
    record.retain(|_, value| match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    });
}

fn has_value(record: &Record, field: &str) -> bool {
    match record.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// 宽松类型转换，失败时返回原值
pub fn coerce(value: Value, target: FieldType) -> Value {
    let converted = match target {
        FieldType::String => to_string_value(&value),
        FieldType::Integer => to_integer(&value),
        FieldType::Float => to_float(&value),
        FieldType::Boolean => to_boolean(&value),
        FieldType::DateTime => to_datetime(&value),
    };
    converted.unwrap_or(value)
}

fn to_string_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        other => Some(Value::String(other.to_string())),
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n.as_f64().and_then(whole_i64).map(Value::from),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().map(Value::from).or_else(|| {
                s.parse::<f64>().ok().and_then(whole_i64).map(Value::from)
            })
        }
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        _ => None,
    }
}

/// 超出 i64 范围的整数值不做截断
fn whole_i64(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

fn to_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

fn to_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => Some(Value::Bool(true)),
            "false" | "no" | "n" | "0" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn to_datetime(value: &Value) -> Option<Value> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.with_timezone(&Utc)
            } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                naive.and_utc()
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                date.and_hms_opt(0, 0, 0)?.and_utc()
            } else {
                return None;
            }
        }
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?,
        _ => return None,
    };
    Some(Value::String(parsed.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lenient_coercions() {
        assert_eq!(coerce(json!(" 42 "), FieldType::Integer), json!(42));
        assert_eq!(coerce(json!("3.0"), FieldType::Integer), json!(3));
        assert_eq!(coerce(json!("abc"), FieldType::Integer), json!("abc"));
        assert_eq!(coerce(json!("2.5"), FieldType::Float), json!(2.5));
        assert_eq!(coerce(json!("yes"), FieldType::Boolean), json!(true));
        assert_eq!(coerce(json!("maybe"), FieldType::Boolean), json!("maybe"));
        assert_eq!(coerce(json!(7), FieldType::String), json!("7"));
        assert_eq!(
            coerce(json!("2024-03-01"), FieldType::DateTime),
            json!("2024-03-01T00:00:00+00:00")
        );
        assert_eq!(
            coerce(json!("not a date"), FieldType::DateTime),
            json!("not a date")
        );
    }

    #[test]
    fn test_integer_coercion_out_of_range_passes_through() {
        assert_eq!(coerce(json!("1e30"), FieldType::Integer), json!("1e30"));
        assert_eq!(coerce(json!(1e30), FieldType::Integer), json!(1e30));
        assert_eq!(
            coerce(json!(-9.3e18), FieldType::Integer),
            json!(-9.3e18)
        );
        assert_eq!(coerce(json!("1e3"), FieldType::Integer), json!(1000));
        assert_eq!(coerce(json!(-2.0), FieldType::Integer), json!(-2));
    }

    #[test]
    fn test_transform_pipeline_order() {
        let transformer = Transformer::new("2.1.0");
        let mut field_mappings = BTreeMap::new();
        field_mappings.insert("Bill Number".to_string(), "bill_id".to_string());
        let mut type_conversions = BTreeMap::new();
        type_conversions.insert("session".to_string(), FieldType::Integer);

        let config = TransformConfig {
            field_mappings,
            type_conversions,
            rules: vec![
                TransformRule::Drop {
                    field: "internal".to_string(),
                },
                TransformRule::Default {
                    field: "chamber".to_string(),
                    value: json!("upper"),
                },
            ],
            clean: true,
            required_fields: vec!["bill_id".to_string()],
        };

        let outcome = transformer.transform(
            vec![
                record(json!({
                    "Bill Number": " SB-1 ",
                    "session": "2024",
                    "internal": "x",
                    "summary": "   "
                })),
                record(json!({ "session": "2023" })),
            ],
            &config,
            "ca-bills",
        );

        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.records.len(), 1);
        let out = &outcome.records[0];
        assert_eq!(out["bill_id"], json!("SB-1"));
        assert_eq!(out["session"], json!(2024));
        assert_eq!(out["chamber"], json!("upper"));
        assert!(!out.contains_key("internal"));
        assert!(!out.contains_key("summary"));
        assert_eq!(out[METADATA_FIELD]["pipeline_version"], json!("2.1.0"));
        assert_eq!(out[METADATA_FIELD]["source"], json!("ca-bills"));
        assert!(out[METADATA_FIELD]["transformed_at"].is_string());
    }

    #[test]
    fn test_require_rule_and_disabled_cleaning() {
        let transformer = Transformer::new("1.0.0");
        let config = TransformConfig {
            clean: false,
            rules: vec![TransformRule::Require {
                field: "title".to_string(),
            }],
            ..Default::default()
        };

        let outcome = transformer.transform(
            vec![
                record(json!({ "title": "kept", "note": "" })),
                record(json!({ "title": null })),
            ],
            &config,
            "s",
        );

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.records[0]["note"], json!(""));
    }
}
