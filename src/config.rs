//! 应用配置模块

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 存储提供方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "aws")]
    Primary,
    #[serde(alias = "storj")]
    Secondary,
}

impl ProviderKind {
    /// 另一个提供方（用于凭证故障转移）
    pub fn other(self) -> Self {
        match self {
            ProviderKind::Primary => ProviderKind::Secondary,
            ProviderKind::Secondary => ProviderKind::Primary,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Primary => write!(f, "primary"),
            ProviderKind::Secondary => write!(f, "secondary"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "primary" | "aws" => Ok(ProviderKind::Primary),
            "secondary" | "storj" => Ok(ProviderKind::Secondary),
            _ => Err(Error::Config(format!(
                "invalid storage provider '{}', expected 'primary' or 'secondary'",
                s
            ))),
        }
    }
}

/// 单个文件上传失败后的处理策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 中止剩余文件（默认）
    #[default]
    Abort,
    /// 继续上传其余文件，结束时汇总失败
    Continue,
}

/// 同步配置（持久化在 config.json 顶层）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_folder: Option<PathBuf>,
    /// 优先使用环境变量中的凭证
    #[serde(default = "default_true")]
    pub prefer_env_vars: bool,
    /// 禁止删除远端多余对象
    #[serde(default = "default_true")]
    pub no_delete: bool,
    #[serde(default = "default_refresh_frequency")]
    pub refresh_frequency_seconds: u64,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_true() -> bool {
    true
}

fn default_refresh_frequency() -> u64 {
    300 // 默认 5 分钟
}

fn default_max_concurrent_uploads() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_provider: None,
            access_key: None,
            secret_key: None,
            secondary_access_key: None,
            secondary_secret_key: None,
            secondary_endpoint: None,
            region: None,
            bucket_name: None,
            sync_folder: None,
            prefer_env_vars: default_true(),
            no_delete: default_true(),
            refresh_frequency_seconds: default_refresh_frequency(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Config {
    /// 当前生效的提供方，未指定时为 primary
    pub fn provider(&self) -> ProviderKind {
        self.storage_provider.unwrap_or(ProviderKind::Primary)
    }
}

/// 配置存储接口
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config>;
    fn save(&self, config: &Config) -> Result<()>;
}

/// 基于 config.json 的配置存储
///
/// 保存时合并到已有的 JSON 文档中，`log` 等其他段落保持不变。
pub struct JsonConfigStore {
    config_file: PathBuf,
}

impl JsonConfigStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            config_file: config_dir.join("config.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_file
    }

    fn read_document(&self) -> Result<serde_json::Value> {
        if !self.config_file.exists() {
            return Ok(serde_json::json!({}));
        }
        let content = fs::read_to_string(&self.config_file)?;
        Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("配置文件解析失败，使用空配置: {}", e);
            serde_json::json!({})
        }))
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<Config> {
        let document = self.read_document()?;
        let config = serde_json::from_value(document)?;
        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<()> {
        let mut document = self.read_document()?;
        if !document.is_object() {
            document = serde_json::json!({});
        }

        // 先移除可选字段，避免已清空的值残留在文件中
        let fields = serde_json::to_value(config)?;
        if let (Some(target), Some(source)) = (document.as_object_mut(), fields.as_object()) {
            for key in [
                "storageProvider",
                "accessKey",
                "secretKey",
                "secondaryAccessKey",
                "secondarySecretKey",
                "secondaryEndpoint",
                "region",
                "bucketName",
                "syncFolder",
            ] {
                target.remove(key);
            }
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }

        if let Some(parent) = self.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_file, serde_json::to_string_pretty(&document)?)?;
        tracing::debug!("配置已保存: {:?}", self.config_file);
        Ok(())
    }
}

/// 内存配置存储（嵌入方或测试使用）
#[derive(Default)]
pub struct MemoryConfigStore {
    config: Mutex<Config>,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Config> {
        Ok(self
            .config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save(&self, config: &Config) -> Result<()> {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        Ok(())
    }
}
