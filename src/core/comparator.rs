use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// 差异计算结果
///
/// 两个集合都是有序的，同一输入总是产生相同的上传/删除顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// 本地独有或大小不同的文件
    pub to_upload: BTreeSet<String>,
    /// 远端独有的对象（仅在允许删除时非空）
    pub to_delete: BTreeSet<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }
}

/// 差异统计（用于预览）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub local_files: usize,
    pub remote_objects: usize,
    /// 本地独有
    pub new_count: usize,
    /// 两边都有但大小不同
    pub changed_count: usize,
    pub upload_bytes: u64,
    pub delete_count: usize,
    pub unchanged_count: usize,
}

/// 比较本地文件树和远端对象列表
///
/// 只按 (相对路径, 字节数) 比较，不看修改时间和内容。
pub fn diff(
    local: &HashMap<String, u64>,
    remote: &HashMap<String, u64>,
    allow_delete: bool,
) -> DiffResult {
    let to_upload = local
        .iter()
        .filter(|(path, size)| {
            let remote_size = remote.get(*path);
            if let Some(remote_size) = remote_size {
                if remote_size != *size {
                    tracing::debug!(
                        "文件大小不同: {} (local={}, remote={})",
                        path,
                        size,
                        remote_size
                    );
                }
            }
            remote_size != Some(*size)
        })
        .map(|(path, _)| path.clone())
        .collect();

    let to_delete = if allow_delete {
        remote
            .keys()
            .filter(|key| !local.contains_key(*key))
            .cloned()
            .collect()
    } else {
        BTreeSet::new()
    };

    DiffResult {
        to_upload,
        to_delete,
    }
}

/// 统计差异
pub fn summarize(
    local: &HashMap<String, u64>,
    remote: &HashMap<String, u64>,
    result: &DiffResult,
) -> DiffSummary {
    let mut summary = DiffSummary {
        local_files: local.len(),
        remote_objects: remote.len(),
        delete_count: result.to_delete.len(),
        ..Default::default()
    };

    for path in &result.to_upload {
        if remote.contains_key(path) {
            summary.changed_count += 1;
        } else {
            summary.new_count += 1;
        }
        summary.upload_bytes += local.get(path).copied().unwrap_or(0);
    }
    summary.unchanged_count = local.len() - result.to_upload.len();

    summary
}
