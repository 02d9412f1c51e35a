use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use harvest_domain::Schedule;
use harvest_errors::{HarvestError, HarvestResult};

/// CRON表达式解析和调度工具
///
/// 接受5段（分 时 日 月 周）或6/7段（带秒、年）表达式，5段表达式按第0秒触发。
pub struct CronScheduler {
    schedule: CronSchedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> HarvestResult<Self> {
        let schedule = CronSchedule::from_str(&Self::normalize(cron_expr)).map_err(|e| {
            HarvestError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self { schedule })
    }

    fn normalize(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> HarvestResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

/// 按调度描述计算下一次运行时间
///
/// immediate 即当前时间；daily/weekly/monthly 为固定偏移；CRON表达式取 `from` 之后的第一个触发点。
pub fn next_run_at(schedule: &Schedule, from: DateTime<Utc>) -> HarvestResult<DateTime<Utc>> {
    if let Some(offset) = schedule.fixed_offset() {
        return Ok(from + offset);
    }

    let expr = schedule.as_cron().unwrap_or_default();
    CronScheduler::new(expr)?
        .next_execution_time(from)
        .ok_or_else(|| HarvestError::InvalidCron {
            expr: expr.to_string(),
            message: "表达式没有后续触发时间".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn test_five_field_expression_is_accepted() {
        let scheduler = CronScheduler::new("30 9 * * *").unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let next = scheduler.next_execution_time(from).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (9, 30, 0));
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 */5 * * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("invalid").is_err());
        assert!(CronScheduler::validate_cron_expression("0 0 0 32 * *").is_err());

        let err = CronScheduler::new("61 * * * *").err().unwrap();
        assert!(matches!(err, HarvestError::InvalidCron { .. }));
    }

    #[test]
    fn test_next_run_at_for_each_schedule() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap();

        assert_eq!(next_run_at(&Schedule::Immediate, from).unwrap(), from);
        assert_eq!(
            next_run_at(&Schedule::Daily, from).unwrap(),
            from + Duration::hours(24)
        );
        assert_eq!(
            next_run_at(&Schedule::Weekly, from).unwrap(),
            from + Duration::days(7)
        );
        // 不按自然月计算
        assert_eq!(
            next_run_at(&Schedule::Monthly, from).unwrap(),
            from + Duration::days(30)
        );
        assert_eq!(
            next_run_at(&Schedule::Cron("0 0 12 * * *".to_string()), from).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
        );
        assert!(next_run_at(&Schedule::Cron("bad cron expr here x".to_string()), from).is_err());
    }
}
