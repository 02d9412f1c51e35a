use crate::{ConfigError, ConfigResult};

/// 配置段校验
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// 通用校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_positive(value: u64, field_name: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        Self::validate_positive(timeout_seconds, field_name)?;
        if timeout_seconds > 86_400 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过86400秒"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        if count > 10_000 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过10000"
            )));
        }
        Ok(())
    }

    /// 百分比阈值必须落在 (0, 100]
    pub fn validate_percent(value: f32, field_name: &str) -> ConfigResult<()> {
        if !(value > 0.0 && value <= 100.0) {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须在 0 到 100 之间，当前值: {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !url.contains("://") {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须是带协议的有效URL"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_bounds() {
        assert!(ValidationUtils::validate_percent(80.0, "cpu").is_ok());
        assert!(ValidationUtils::validate_percent(100.0, "cpu").is_ok());
        assert!(ValidationUtils::validate_percent(0.0, "cpu").is_err());
        assert!(ValidationUtils::validate_percent(120.0, "cpu").is_err());
        assert!(ValidationUtils::validate_percent(f32::NAN, "cpu").is_err());
    }

    #[test]
    fn test_url_requires_scheme() {
        assert!(ValidationUtils::validate_url("sqlite://harvest.db", "database.url").is_ok());
        assert!(ValidationUtils::validate_url("harvest.db", "database.url").is_err());
        assert!(ValidationUtils::validate_url("  ", "database.url").is_err());
    }
}
