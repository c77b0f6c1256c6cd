use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 出错后的等待时间
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// 单轮刷新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// 执行了一次同步
    Ran,
    /// 同一目录仍在同步中，本轮跳过
    Skipped,
}

/// 定时刷新循环
///
/// 每隔 `interval` 执行一次回调；回调出错时记录日志，等待 `error_backoff`
/// 后继续。`shutdown` 取消后在当前等待结束时立即退出。
#[derive(Debug, Clone, Copy)]
pub struct RefreshLoop {
    pub interval: Duration,
    pub error_backoff: Duration,
}

impl RefreshLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// 运行直到 `shutdown` 被取消，返回执行的轮数
    pub async fn run<F, Fut, E>(&self, shutdown: CancellationToken, mut tick: F) -> usize
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Tick, E>>,
        E: std::fmt::Display,
    {
        info!("定时同步已启动，间隔 {} 秒", self.interval.as_secs());
        let mut rounds = 0;

        while !shutdown.is_cancelled() {
            rounds += 1;
            let wait = match tick().await {
                Ok(Tick::Ran) => self.interval,
                Ok(Tick::Skipped) => {
                    info!("上一轮同步仍在进行，跳过本轮");
                    self.interval
                }
                Err(e) => {
                    error!("定时同步出错: {}", e);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("定时同步已停止，共执行 {} 轮", rounds);
        rounds
    }
}
