//! 面向调用方（CLI 或嵌入方）的命令

pub mod credentials;
pub mod file;
pub mod log;
pub mod sync;

use crate::config::Config;
use crate::error::{Result, ValidationError};

/// 命令参数中的 bucket 优先，否则使用配置
pub(crate) fn bucket_or_configured(bucket: Option<&str>, config: &Config) -> Result<String> {
    bucket
        .map(str::to_string)
        .or_else(|| config.bucket_name.clone())
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ValidationError::MissingBucket.into())
}
