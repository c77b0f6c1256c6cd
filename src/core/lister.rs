use crate::error::StorageError;
use crate::media;
use crate::storage::{ObjectStore, RemoteObject};
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// 目录统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    pub total_size: u64,
    pub file_count: usize,
}

/// 单层浏览结果：前缀下的直接子目录和文件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub prefix: String,
    /// 子目录前缀，以 `/` 结尾
    pub folders: Vec<String>,
    pub files: Vec<RemoteObject>,
}

/// 浏览用前缀：去掉开头的 `/`，非空时补齐结尾的 `/`
pub fn browse_prefix(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// 远端对象列表
pub struct RemoteLister {
    store: Arc<dyn ObjectStore>,
}

impl RemoteLister {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// 列出 bucket 中的媒体对象，返回 `key -> 字节数`
    pub async fn list(&self, bucket: &str, prefix: &str) -> Result<HashMap<String, u64>, StorageError> {
        info!("开始列出远端对象: {} bucket={} prefix={:?}", self.store.name(), bucket, prefix);

        let mut objects = HashMap::new();
        let mut skipped = 0usize;
        let mut stream = self.store.list_objects(bucket, prefix);

        while let Some(object) = stream.try_next().await? {
            if object.key.ends_with('/') || !media::is_media_file(&object.key) {
                skipped += 1;
                continue;
            }
            debug!("远端对象: {} ({} 字节)", object.key, object.size);
            objects.insert(object.key, object.size);
        }

        info!("远端列表完成: {} 个媒体对象, {} 个被过滤", objects.len(), skipped);
        Ok(objects)
    }

    /// 按目录层级浏览前缀下的对象（不做媒体过滤）
    pub async fn browse(&self, bucket: &str, path: &str) -> Result<FolderListing, StorageError> {
        let prefix = browse_prefix(path);
        let mut folders = BTreeSet::new();
        let mut files = Vec::new();
        let mut stream = self.store.list_objects(bucket, &prefix);

        while let Some(object) = stream.try_next().await? {
            let Some(rest) = object.key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(format!("{}{}/", prefix, folder));
                }
                None if !rest.is_empty() => files.push(object),
                None => {}
            }
        }
        drop(stream);
        files.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            "浏览 {}/{}: {} 个目录, {} 个文件",
            bucket,
            prefix,
            folders.len(),
            files.len()
        );
        Ok(FolderListing {
            prefix,
            folders: folders.into_iter().collect(),
            files,
        })
    }

    /// 统计前缀下所有对象的总大小和数量（不做媒体过滤，跳过目录占位）
    pub async fn folder_stats(&self, bucket: &str, prefix: &str) -> Result<FolderStats, StorageError> {
        self.store
            .list_objects(bucket, prefix)
            .try_fold(FolderStats::default(), |mut stats, object| async move {
                if !object.key.ends_with('/') {
                    stats.total_size += object.size;
                    stats.file_count += 1;
                }
                Ok::<_, StorageError>(stats)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NoProgress, OperatorStore};

    async fn seeded_store(files: &[(&str, usize)]) -> Arc<dyn ObjectStore> {
        let dir = tempfile::tempdir().unwrap();
        let store = OperatorStore::memory("memory");
        for (key, size) in files {
            let path = dir.path().join("payload");
            std::fs::write(&path, vec![1u8; *size]).unwrap();
            store
                .upload_object("media", key, &path, &NoProgress)
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn list_applies_media_filter() {
        let store = seeded_store(&[("a.mp4", 4), ("b/c.WEBM", 2), ("b/readme.txt", 9)]).await;
        let objects = RemoteLister::new(store).list("media", "").await.unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects.get("a.mp4"), Some(&4));
        assert_eq!(objects.get("b/c.WEBM"), Some(&2));
    }

    #[tokio::test]
    async fn browse_groups_one_level() {
        let store = seeded_store(&[
            ("shows/a.mp4", 1),
            ("shows/s01/e01.mkv", 2),
            ("shows/s01/e02.mkv", 3),
            ("shows/s02/extras/x.mp4", 4),
            ("shows/notes.txt", 5),
            ("movies/m.mp4", 6),
        ])
        .await;
        let listing = RemoteLister::new(store).browse("media", "/shows").await.unwrap();

        assert_eq!(listing.prefix, "shows/");
        assert_eq!(listing.folders, vec!["shows/s01/", "shows/s02/"]);
        let keys: Vec<&str> = listing.files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["shows/a.mp4", "shows/notes.txt"]);
    }

    #[test]
    fn browse_prefix_normalized() {
        assert_eq!(browse_prefix("/"), "");
        assert_eq!(browse_prefix(""), "");
        assert_eq!(browse_prefix("/a/b"), "a/b/");
        assert_eq!(browse_prefix("a/"), "a/");
    }

    #[tokio::test]
    async fn folder_stats_counts_every_object_under_prefix() {
        let store = seeded_store(&[("b/c.mp4", 2), ("b/readme.txt", 9), ("other.mp4", 100)]).await;
        let stats = RemoteLister::new(store).folder_stats("media", "b/").await.unwrap();

        assert_eq!(
            stats,
            FolderStats {
                total_size: 11,
                file_count: 2
            }
        );
    }
}
