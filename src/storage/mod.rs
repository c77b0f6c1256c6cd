pub mod operator;
pub mod s3;

use crate::credentials::Credentials;
use crate::error::{StorageError, UploadError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use operator::OperatorStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// SDK 层对临时错误的最大尝试次数（含首次）
pub const MAX_ATTEMPTS: usize = 3;
/// 上传时每次读取并写入的块大小
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;
/// 分片上传的分片大小（S3 要求至少 5MB）
pub const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 远端对象（列表结果）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// 对象元数据（HEAD 结果）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

/// 上传进度回调，由存储实现在上传过程中同步调用
pub trait UploadProgress: Send + Sync {
    /// 当前文件已写出的累计字节数
    ///
    /// 只在数据交给存储端之后调用，本地读入缓冲的部分不计；上传成功时
    /// 至少以最终字节数调用一次（空文件为 0）。
    fn on_bytes(&self, transferred: u64);

    /// 返回 true 时在下一个块之前中止上传
    fn should_abort(&self) -> bool {
        false
    }
}

/// 不关心进度时使用
pub struct NoProgress;

impl UploadProgress for NoProgress {
    fn on_bytes(&self, _transferred: u64) {}
}

/// 对象存储能力接口
///
/// 主/次提供方只在端点、寻址方式上不同，这些都属于构造时的配置，
/// 调用方只面对这一个接口。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 分页列出对象，分页细节对调用方透明
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, Result<RemoteObject, StorageError>>;

    /// 获取对象元数据，不存在时返回 None
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StorageError>;

    /// 上传本地文件
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &dyn UploadProgress,
    ) -> Result<(), UploadError>;

    /// 生成预签名下载 URL，失败时返回 None
    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
        content_type: Option<&str>,
    ) -> Option<String>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// 检查 bucket 是否可访问
    async fn validate_bucket_access(&self, bucket: &str) -> bool;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据凭证创建存储实例，提供方只在这里分派一次
pub fn create_store(credentials: &Credentials) -> Arc<dyn ObjectStore> {
    tracing::info!(
        "初始化 {} 存储: region={}, endpoint={:?}",
        credentials.provider,
        credentials.region,
        credentials.endpoint
    );
    Arc::new(s3::S3Profile::from_credentials(credentials).into_store())
}
