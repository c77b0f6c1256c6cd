use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub mod commands;
pub mod config;
pub mod core;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod media;
pub mod storage;

pub use crate::core::{SyncConfig, SyncEngine, SyncHandle, SyncReport, SyncRequest};
pub use config::{Config, ConfigStore, FailurePolicy, JsonConfigStore, MemoryConfigStore, ProviderKind};
pub use credentials::{Credentials, EnvLookup, ProcessEnv, Resolution};
pub use error::{Error, Result};
pub use storage::ObjectStore;

/// 应用目录名
pub const APP_DIR_NAME: &str = "bucket-mirror";

/// 根据凭证构建存储实例
pub type StoreFactory = Arc<dyn Fn(&Credentials) -> Arc<dyn ObjectStore> + Send + Sync>;

/// 应用状态，在各命令之间共享
///
/// 持有配置存储、环境变量来源和同步引擎。存储实例按凭证缓存，
/// 凭证变化（切换提供方、修改密钥）后自动重建。
#[derive(Clone)]
pub struct AppState {
    pub config_dir: PathBuf,
    pub config_store: Arc<dyn ConfigStore>,
    pub env: Arc<dyn EnvLookup>,
    pub engine: SyncEngine,
    store_factory: StoreFactory,
    store: Arc<Mutex<Option<(Credentials, Arc<dyn ObjectStore>)>>>,
}

impl AppState {
    /// 使用 `config_dir/config.json` 和进程环境变量
    pub fn new(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        Ok(Self::with_parts(
            config_dir,
            Arc::new(JsonConfigStore::new(config_dir)),
            Arc::new(ProcessEnv),
            Arc::new(|credentials: &Credentials| storage::create_store(credentials)),
        ))
    }

    pub fn with_parts(
        config_dir: &Path,
        config_store: Arc<dyn ConfigStore>,
        env: Arc<dyn EnvLookup>,
        store_factory: StoreFactory,
    ) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            config_store,
            env,
            engine: SyncEngine::new(),
            store_factory,
            store: Arc::new(Mutex::new(None)),
        }
    }

    /// 读取配置，并应用提供方自动检测
    ///
    /// 发现次级提供方的专用凭证且当前配置不同时，切换并持久化。
    pub fn load_config(&self) -> Result<Config> {
        let mut config = self.config_store.load()?;
        if let Some(switch) = credentials::detect_provider_switch(&config, self.env.as_ref()) {
            tracing::info!(
                "检测到 {} 凭证，存储提供方自动切换: {} -> {}",
                switch.to,
                switch.from,
                switch.to
            );
            config.storage_provider = Some(switch.to);
            self.config_store.save(&config)?;
        }
        Ok(config)
    }

    /// 解析当前凭证
    pub fn resolve(&self, config: &Config) -> Result<Resolution> {
        Ok(credentials::resolve(config, self.env.as_ref())?)
    }

    /// 获取当前凭证对应的存储实例，无可用凭证时同步功能被禁用
    pub fn store_for(&self, config: &Config) -> Result<Arc<dyn ObjectStore>> {
        let credentials = match self.resolve(config)? {
            Resolution::Ready(credentials) => credentials,
            Resolution::Uninitialized { reason } => {
                return Err(error::ValidationError::SyncDisabled(reason).into());
            }
        };

        let mut cached = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((current, store)) = cached.as_ref() {
            if *current == credentials {
                return Ok(store.clone());
            }
            tracing::info!("凭证已变化，重建存储实例");
        }

        let store = (self.store_factory)(&credentials);
        *cached = Some((credentials, store.clone()));
        Ok(store)
    }

    /// 读取配置并获取存储实例
    pub fn config_and_store(&self) -> Result<(Config, Arc<dyn ObjectStore>)> {
        let config = self.load_config()?;
        let store = self.store_for(&config)?;
        Ok((config, store))
    }

    /// 清理资源（退出时调用）
    pub fn cleanup(&self) {
        tracing::info!("正在停止所有同步任务...");
        self.engine.stop_all();
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// 应用配置目录，无法确定用户目录时使用当前目录下的隐藏目录
    pub fn app_config_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join(super::APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", super::APP_DIR_NAME)))
    }
}
