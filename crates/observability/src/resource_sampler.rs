//! 基于 sysinfo 的主机资源采样

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use harvest_domain::{ResourceSampler, ResourceUsage};
use harvest_errors::{HarvestError, HarvestResult};
use sysinfo::{Disks, System};
use tracing::debug;

/// 主机名，获取失败时返回 `unknown`
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct SysinfoSampler {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl SysinfoSampler {
    pub fn new<P: Into<PathBuf>>(disk_path: P) -> Self {
        let mut system = System::new();
        // CPU 使用率基于两次刷新之间的差值，先做一次基线刷新
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            disk_path: disk_path.into(),
        }
    }

    fn disk_percent(&self) -> f32 {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| self.disk_path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());

        match disk {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space().saturating_sub(disk.available_space());
                used as f32 / disk.total_space() as f32 * 100.0
            }
            _ => {
                debug!(path = %self.disk_path.display(), "No mounted disk found for path");
                0.0
            }
        }
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> HarvestResult<ResourceUsage> {
        let (cpu_percent, memory_used, memory_total) = {
            let mut system = self
                .system
                .lock()
                .map_err(|_| HarvestError::Internal("资源采样器锁已损坏".to_string()))?;
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                system.global_cpu_usage(),
                system.used_memory(),
                system.total_memory(),
            )
        };

        let memory_percent = if memory_total > 0 {
            memory_used as f32 / memory_total as f32 * 100.0
        } else {
            0.0
        };

        Ok(ResourceUsage {
            cpu_percent,
            memory_percent,
            disk_percent: self.disk_percent(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            sampled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_values_are_percentages() {
        let sampler = SysinfoSampler::new("/");
        let usage = sampler.sample().await.unwrap();

        assert!((0.0..=100.0).contains(&usage.memory_percent));
        assert!((0.0..=100.0).contains(&usage.disk_percent));
        assert!(usage.cpu_percent >= 0.0);
        assert!(usage.memory_used_mb <= usage.memory_total_mb);
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
