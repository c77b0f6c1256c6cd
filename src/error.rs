//! 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 库内统一的 Result 别名
pub type Result<T> = std::result::Result<T, Error>;

/// 凭证解析失败（仅在显式指定了存储提供方时返回）
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("no usable credentials for {requested} or its fallback provider: {reason}")]
    Unavailable { requested: String, reason: String },
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 网络或服务端的临时错误，已在 SDK 层重试过
    #[error("connection error: {0}")]
    Connection(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// 是否为重试后仍失败的连接类错误
    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            opendal::ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
            _ if err.is_temporary() => StorageError::Connection(err.to_string()),
            _ => StorageError::Service(err.to_string()),
        }
    }
}

/// 单个文件上传失败
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to upload {key}: {source}")]
    Transfer {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("upload of {0} cancelled")]
    Cancelled(String),
}

impl UploadError {
    pub fn transfer(key: &str, source: impl Into<StorageError>) -> Self {
        UploadError::Transfer {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// 同步开始前的参数校验失败，同步返回给调用方
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no sync folder configured")]
    MissingFolder,

    #[error("no bucket configured")]
    MissingBucket,

    #[error("sync folder is not a directory: {0}")]
    FolderNotFound(PathBuf),

    #[error("a sync run is already active for {folder} -> {bucket}")]
    AlreadyRunning { folder: PathBuf, bucket: String },

    #[error("sync is disabled: {0}")]
    SyncDisabled(String),

    #[error("path is outside the sync folder: {0}")]
    InvalidPath(String),
}

/// 顶层错误
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
