use crate::config::{Config, FailurePolicy};
use crate::core::engine::{Analysis, SyncHandle, SyncRequest};
use crate::core::schedule::{RefreshLoop, Tick};
use crate::core::RunState;
use crate::error::{Error, Result};
use crate::AppState;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 覆盖配置中的同步参数（命令行参数等）
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub folder: Option<PathBuf>,
    pub bucket: Option<String>,
    pub max_concurrent_uploads: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    /// Some(true) 允许删除远端多余对象
    pub allow_delete: Option<bool>,
}

impl SyncOverrides {
    /// 合并到配置快照上
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(ref folder) = self.folder {
            config.sync_folder = Some(folder.clone());
        }
        if let Some(ref bucket) = self.bucket {
            config.bucket_name = Some(bucket.clone());
        }
        if let Some(n) = self.max_concurrent_uploads {
            config.max_concurrent_uploads = n;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(allow) = self.allow_delete {
            config.no_delete = !allow;
        }
        config
    }
}

fn request_for(config: &Config) -> Result<SyncRequest> {
    Ok(SyncRequest::from_config(config)?)
}

/// 启动一次同步，立即返回句柄
pub fn start_sync(state: &AppState, overrides: &SyncOverrides) -> Result<SyncHandle> {
    let config = overrides.apply(state.load_config()?);
    let request = request_for(&config)?;
    let store = state.store_for(&config)?;
    Ok(state.engine.start(store, request)?)
}

/// 预览差异，不上传
pub async fn analyze(state: &AppState, overrides: &SyncOverrides) -> Result<Analysis> {
    let config = overrides.apply(state.load_config()?);
    let request = request_for(&config)?;
    let store = state.store_for(&config)?;
    state.engine.analyze(store, &request).await
}

/// 停止指定目录和 bucket 的同步，返回是否有运行被停止
pub fn stop_sync(state: &AppState, overrides: &SyncOverrides) -> Result<bool> {
    let config = overrides.apply(state.load_config()?);
    let request = request_for(&config)?;
    Ok(state.engine.stop(&request.folder, &request.bucket))
}

/// 执行一轮同步并等待结束；同一目录仍在同步时跳过
pub async fn refresh_once(state: &AppState, overrides: &SyncOverrides) -> Result<Tick> {
    let config = overrides.apply(state.load_config()?);
    let request = request_for(&config)?;
    if state.engine.is_active(&request.folder, &request.bucket) {
        return Ok(Tick::Skipped);
    }

    let store = state.store_for(&config)?;
    let handle = state.engine.start(store, request)?;
    let report = handle.wait().await?;
    match report.state {
        RunState::Error => Err(Error::Task(report.errors.join("; "))),
        _ => {
            info!(
                "本轮同步结束: {:?}, 上传 {} 个文件",
                report.state, report.files_uploaded
            );
            Ok(Tick::Ran)
        }
    }
}

/// 按配置的间隔持续同步，直到 `shutdown` 被取消
pub async fn watch(
    state: &AppState,
    overrides: &SyncOverrides,
    shutdown: CancellationToken,
) -> Result<usize> {
    let config = overrides.apply(state.load_config()?);
    request_for(&config)?;
    let interval = Duration::from_secs(config.refresh_frequency_seconds.max(1));

    let rounds = RefreshLoop::new(interval)
        .run(shutdown, || refresh_once(state, overrides))
        .await;
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::SyncConfig;

    #[test]
    fn overrides_replace_config_values() {
        let overrides = SyncOverrides {
            bucket: Some("other".to_string()),
            allow_delete: Some(true),
            max_concurrent_uploads: Some(3),
            ..Default::default()
        };
        let config = overrides.apply(Config {
            bucket_name: Some("media".to_string()),
            sync_folder: Some(PathBuf::from("/data")),
            ..Default::default()
        });

        assert_eq!(config.bucket_name.as_deref(), Some("other"));
        assert_eq!(config.sync_folder, Some(PathBuf::from("/data")));
        assert!(!config.no_delete);
        assert_eq!(SyncConfig::from_config(&config).concurrency(), 3);
    }

    #[test]
    fn concurrency_is_clamped() {
        let config = Config {
            max_concurrent_uploads: 64,
            ..Default::default()
        };
        assert_eq!(SyncConfig::from_config(&config).concurrency(), 4);

        let config = Config {
            max_concurrent_uploads: 0,
            ..Default::default()
        };
        assert_eq!(SyncConfig::from_config(&config).concurrency(), 1);
    }
}
