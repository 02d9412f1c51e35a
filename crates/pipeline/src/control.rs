//! 作业运行控制：取消令牌与暂停闸门

use std::sync::Arc;

use harvest_errors::{HarvestError, HarvestResult};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 每个被接纳的作业持有一份，注册表与执行器共享
///
/// 执行器在每个阶段开始前和定稿前调用 [`JobControl::checkpoint`]：
/// 暂停时在此等待，取消时返回 `Cancelled`。
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl JobControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub async fn checkpoint(&self) -> HarvestResult<()> {
        let mut paused = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled("作业已被停止".to_string()));
            }
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                changed = paused.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_passes_when_running() {
        let control = JobControl::new();
        assert!(control.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_fails_after_cancel() {
        let control = JobControl::new();
        control.cancel();
        let err = control.checkpoint().await.unwrap_err();
        assert!(matches!(err, HarvestError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_checkpoint_waits_while_paused() {
        let control = JobControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        control.resume();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_checkpoint() {
        let control = JobControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(HarvestError::Cancelled(_))));
    }
}
