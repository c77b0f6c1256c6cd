use crate::error::{Error, Result};
use crate::media;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 每遍历多少个条目检查一次取消
const CANCEL_CHECK_INTERVAL: usize = 100;

/// 本地目录扫描器
///
/// 递归遍历同步目录，返回 `相对路径 -> 字节数`。相对路径统一使用 `/`，
/// 保留大小写；不跟随符号链接，不写任何文件。
#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner {
    cancel: Option<CancellationToken>,
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带取消令牌的扫描器
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// 扫描目录（在阻塞线程池中执行）
    pub async fn scan(&self, root: &Path) -> Result<HashMap<String, u64>> {
        let root = root.to_path_buf();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || scan_blocking(&root, cancel.as_ref()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

/// 相对路径转为对象键
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// 对象键转回本地路径
pub fn local_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}

/// 对象键转为同步目录内的路径，键试图跳出目录（`..`、绝对路径）时返回 None
pub fn contained_path(root: &Path, key: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut depth = 0usize;
    for part in key.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            part if Path::new(part).has_root() || part.contains(':') => return None,
            part => {
                path.push(part);
                depth += 1;
            }
        }
    }
    (depth > 0).then_some(path)
}

/// 按遍历的条目数（不是命中的媒体文件数）定期检查取消状态
fn cancel_due(walked: usize, cancel: Option<&CancellationToken>) -> bool {
    walked % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(|c| c.is_cancelled())
}

fn scan_blocking(root: &Path, cancel: Option<&CancellationToken>) -> Result<HashMap<String, u64>> {
    info!("开始扫描本地目录: {:?}", root);

    let mut files = HashMap::new();
    let mut skipped = 0usize;

    for (walked, entry) in WalkDir::new(root).follow_links(false).into_iter().enumerate() {
        if cancel_due(walked, cancel) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "scan cancelled",
            )));
        }

        let entry = match entry {
            Ok(entry) => entry,
            // 根目录本身不可读时直接失败，子目录出错只跳过
            Err(e) if e.depth() == 0 => return Err(Error::Io(e.into())),
            Err(e) => {
                warn!("跳过无法访问的路径: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = relative_key(root, entry.path()) else {
            continue;
        };

        if entry.depth() == 1 && key == media::HELPER_ARTIFACT {
            continue;
        }
        if !media::is_media_file(&key) {
            skipped += 1;
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("读取文件元数据失败: {:?} - {}", entry.path(), e);
                continue;
            }
        };

        debug!("本地文件: {} ({} 字节)", key, size);
        files.insert(key, size);
    }

    info!("扫描完成: {} 个媒体文件, {} 个被过滤", files.len(), skipped);
    Ok(files)
}
