use super::{
    ObjectMeta, ObjectStore, RemoteObject, UploadProgress, IO_TIMEOUT_SECS, MAX_ATTEMPTS,
    MULTIPART_CHUNK_SIZE, OP_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE,
};
use crate::error::{StorageError, UploadError};
use crate::media;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use opendal::layers::{RetryLayer, TimeoutLayer};
use opendal::{Entry, Metakey, Operator};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// 按 bucket 构建 Operator 的工厂
pub type OperatorFactory = Arc<dyn Fn(&str) -> opendal::Result<Operator> + Send + Sync>;

/// 基于 OpenDAL 的对象存储实现
///
/// 每个 bucket 对应一个 Operator，首次使用时创建并缓存。
/// 所有 Operator 都带超时层和重试层，重试对上层透明。
pub struct OperatorStore {
    name: String,
    factory: OperatorFactory,
    operators: Mutex<HashMap<String, Operator>>,
}

impl OperatorStore {
    pub fn new(name: impl Into<String>, factory: OperatorFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            operators: Mutex::new(HashMap::new()),
        }
    }

    /// 内存存储，每个 bucket 一个独立实例
    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(|_bucket: &str| {
                Ok(Operator::new(opendal::services::Memory::default())?.finish())
            }),
        )
    }

    fn operator(&self, bucket: &str) -> Result<Operator, StorageError> {
        let mut operators = self.operators.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(op) = operators.get(bucket) {
            return Ok(op.clone());
        }

        let op = (self.factory)(bucket)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .layer(
                RetryLayer::new()
                    .with_max_times(MAX_ATTEMPTS - 1)
                    .with_factor(2.0)
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(20))
                    .with_jitter(),
            );

        debug!("创建 Operator: {} bucket={}", self.name, bucket);
        operators.insert(bucket.to_string(), op.clone());
        Ok(op)
    }
}

fn entry_to_object(entry: Entry) -> Option<RemoteObject> {
    let meta = entry.metadata();
    let key = entry.path().trim_start_matches('/');

    // 跳过目录和目录占位对象
    if key.is_empty() || key.ends_with('/') || meta.is_dir() {
        return None;
    }

    Some(RemoteObject {
        key: key.to_string(),
        size: meta.content_length(),
        last_modified: meta.last_modified(),
    })
}

#[async_trait]
impl ObjectStore for OperatorStore {
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, Result<RemoteObject, StorageError>> {
        let lister = async move {
            let op = self.operator(bucket)?;
            let lister = op
                .lister_with(prefix)
                .recursive(true)
                .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
                .await?;
            Ok::<_, StorageError>(lister.map_err(StorageError::from))
        };

        stream::once(lister)
            .try_flatten()
            .try_filter_map(|entry| futures::future::ready(Ok(entry_to_object(entry))))
            .boxed()
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let op = self.operator(bucket)?;
        match op.stat(key).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: meta.content_length(),
                last_modified: meta.last_modified(),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
                content_type: meta.content_type().map(|s| s.to_string()),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &dyn UploadProgress,
    ) -> Result<(), UploadError> {
        let op = self
            .operator(bucket)
            .map_err(|e| UploadError::transfer(key, e))?;
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| UploadError::transfer(key, e))?;

        let mut request = op.writer_with(key);
        if op.info().full_capability().write_with_content_type {
            request = request.content_type(media::content_type(key));
        }
        let mut writer = request
            .await
            .map_err(|e| UploadError::transfer(key, e))?;

        let mut piece = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::with_capacity(MULTIPART_CHUNK_SIZE + UPLOAD_CHUNK_SIZE);
        // 只统计已交给 writer 的字节，读入缓冲区的不算
        let mut transferred = 0u64;

        loop {
            if progress.should_abort() {
                if let Err(e) = writer.abort().await {
                    warn!("中止上传失败: {} - {}", key, e);
                }
                return Err(UploadError::Cancelled(key.to_string()));
            }

            let n = match file.read(&mut piece).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(UploadError::transfer(key, e));
                }
            };
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&piece[..n]);

            // 攒够一个分片再写出，满足分片上传的最小尺寸
            if pending.len() >= MULTIPART_CHUNK_SIZE {
                let part = std::mem::take(&mut pending);
                let size = part.len() as u64;
                if let Err(e) = writer.write(part).await {
                    let _ = writer.abort().await;
                    return Err(UploadError::transfer(key, e));
                }
                transferred += size;
                progress.on_bytes(transferred);
            }
        }

        if !pending.is_empty() {
            let size = pending.len() as u64;
            if let Err(e) = writer.write(pending).await {
                let _ = writer.abort().await;
                return Err(UploadError::transfer(key, e));
            }
            transferred += size;
        }
        writer
            .close()
            .await
            .map_err(|e| UploadError::transfer(key, e))?;
        progress.on_bytes(transferred);

        debug!("上传完成: {}/{} ({} 字节)", bucket, key, transferred);
        Ok(())
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
        content_type: Option<&str>,
    ) -> Option<String> {
        let op = match self.operator(bucket) {
            Ok(op) => op,
            Err(e) => {
                error!("生成预签名 URL 失败: {}", e);
                return None;
            }
        };

        let mut request = op.presign_read_with(key, expiry);
        if let Some(content_type) = content_type {
            request = request.override_content_type(content_type);
        }

        match request.await {
            Ok(presigned) => Some(presigned.uri().to_string()),
            Err(e) => {
                error!("生成预签名 URL 失败: {}/{} - {}", bucket, key, e);
                None
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let op = self.operator(bucket)?;
        op.delete(key).await?;
        Ok(())
    }

    async fn validate_bucket_access(&self, bucket: &str) -> bool {
        let probe = async {
            let op = self.operator(bucket)?;
            let mut lister = op.lister_with("").limit(1).await?;
            lister.try_next().await?;
            Ok::<_, StorageError>(())
        };

        match probe.await {
            Ok(()) => {
                info!("bucket 访问验证成功: {}", bucket);
                true
            }
            Err(e) => {
                error!("bucket 访问验证失败: {} - {}", bucket, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
