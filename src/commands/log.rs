//! 日志相关命令

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::AppState;

pub fn get_log_config(state: &AppState) -> LogConfig {
    LogConfig::load(&state.config_dir)
}

/// 修改日志配置，下次启动生效
pub fn set_log_config(
    state: &AppState,
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<&str>,
) -> Result<LogConfig> {
    let mut config = LogConfig::load(&state.config_dir);

    if let Some(enabled) = enabled {
        config.enabled = enabled;
    }
    if let Some(size) = max_size_mb {
        config.max_size_mb = size.clamp(1, 100);
    }
    if let Some(level) = level {
        let level = level.to_lowercase();
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(Error::Config(format!("invalid log level: {}", level)));
        }
        config.level = level;
    }

    config.save(&state.config_dir)?;
    Ok(config)
}
