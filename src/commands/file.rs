//! 单个对象和文件相关命令：浏览、播放链接、元数据、删除、目录统计

use super::bucket_or_configured;
use crate::config::Config;
use crate::core::lister::{FolderListing, FolderStats, RemoteLister};
use crate::core::scanner::contained_path;
use crate::error::{Error, Result, ValidationError};
use crate::media;
use crate::storage::ObjectMeta;
use crate::AppState;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// 预签名链接默认有效期
pub const DEFAULT_URL_EXPIRY_SECS: u64 = 3600;

/// 对象元数据及其本地同步状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    /// 同步目录中是否存在同名文件
    pub exists_locally: bool,
}

/// 对象键在同步目录中对应的文件路径；未配置目录或键越界时为 None
fn local_file(config: &Config, key: &str) -> Option<PathBuf> {
    let folder = config
        .sync_folder
        .as_ref()
        .filter(|f| !f.as_os_str().is_empty())?;
    contained_path(folder, key)
}

/// 浏览 bucket 中某一层的目录和文件
pub async fn list_files(
    state: &AppState,
    bucket: Option<&str>,
    path: &str,
) -> Result<FolderListing> {
    let (config, store) = state.config_and_store()?;
    let bucket = bucket_or_configured(bucket, &config)?;
    Ok(RemoteLister::new(store).browse(&bucket, path).await?)
}

/// 生成带媒体 Content-Type 的预签名播放链接
pub async fn streaming_url(
    state: &AppState,
    bucket: Option<&str>,
    key: &str,
    expiry_secs: u64,
) -> Result<Option<String>> {
    let (config, store) = state.config_and_store()?;
    let bucket = bucket_or_configured(bucket, &config)?;

    Ok(store
        .presign_url(
            &bucket,
            key,
            Duration::from_secs(expiry_secs),
            Some(media::content_type(key)),
        )
        .await)
}

/// 获取对象元数据，并标记本地是否已有该文件
pub async fn object_info(
    state: &AppState,
    bucket: Option<&str>,
    key: &str,
) -> Result<Option<FileInfo>> {
    let (config, store) = state.config_and_store()?;
    let bucket = bucket_or_configured(bucket, &config)?;

    let Some(meta) = store.head_object(&bucket, key).await? else {
        return Ok(None);
    };
    let exists_locally = local_file(&config, key)
        .map(|path| path.is_file())
        .unwrap_or(false);
    Ok(Some(FileInfo {
        meta,
        exists_locally,
    }))
}

/// 同步目录中是否存在该文件（未配置目录时为 false）
pub fn check_local_file(state: &AppState, key: &str) -> Result<bool> {
    let config = state.load_config()?;
    Ok(local_file(&config, key)
        .map(|path| path.is_file())
        .unwrap_or(false))
}

/// 删除同步目录中的文件，路径不能跳出同步目录
pub fn delete_local_file(state: &AppState, key: &str) -> Result<()> {
    let config = state.load_config()?;
    let folder = config
        .sync_folder
        .as_ref()
        .filter(|f| !f.as_os_str().is_empty())
        .ok_or(ValidationError::MissingFolder)?;
    let path = contained_path(folder, key).ok_or_else(|| {
        warn!("拒绝删除同步目录之外的路径: {}", key);
        ValidationError::InvalidPath(key.to_string())
    })?;

    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("local file not found: {}", key),
        )));
    }
    std::fs::remove_file(&path)?;
    info!("已删除本地文件: {:?}", path);
    Ok(())
}

/// 删除单个对象
pub async fn delete_object(state: &AppState, bucket: Option<&str>, key: &str) -> Result<()> {
    let (config, store) = state.config_and_store()?;
    let bucket = bucket_or_configured(bucket, &config)?;
    store.delete_object(&bucket, key).await?;
    info!("已删除对象: {}/{}", bucket, key);
    Ok(())
}

/// 统计前缀下的对象总大小和数量
pub async fn folder_stats(
    state: &AppState,
    bucket: Option<&str>,
    prefix: &str,
) -> Result<FolderStats> {
    let (config, store) = state.config_and_store()?;
    let bucket = bucket_or_configured(bucket, &config)?;
    Ok(RemoteLister::new(store).folder_stats(&bucket, prefix).await?)
}
