//! 凭证与提供方相关命令

use crate::config::{Config, ProviderKind};
use crate::credentials::{self, Resolution};
use crate::error::Result;
use crate::AppState;
use serde::Serialize;
use tracing::info;

/// 当前凭证来源
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSource {
    /// 主提供方凭证是否来自环境变量
    pub using_env_vars: bool,
    pub prefer_env_vars: bool,
    pub configured_provider: ProviderKind,
    /// 实际生效的提供方（可能是故障转移后的）
    pub active_provider: Option<ProviderKind>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// 无可用凭证时的原因
    pub disabled_reason: Option<String>,
}

pub fn credential_source(state: &AppState) -> Result<CredentialSource> {
    let config = state.load_config()?;
    let resolution = state.resolve(&config)?;

    let (active, reason) = match &resolution {
        Resolution::Ready(creds) => (Some(creds), None),
        Resolution::Uninitialized { reason } => (None, Some(reason.clone())),
    };

    Ok(CredentialSource {
        using_env_vars: credentials::using_env_vars(state.env.as_ref()),
        prefer_env_vars: config.prefer_env_vars,
        configured_provider: config.provider(),
        active_provider: active.map(|c| c.provider),
        region: active.map(|c| c.region.clone()),
        endpoint: active.and_then(|c| c.endpoint.clone()),
        disabled_reason: reason,
    })
}

/// 设置是否优先使用环境变量
pub fn set_prefer_env_vars(state: &AppState, prefer: bool) -> Result<Config> {
    let mut config = state.config_store.load()?;
    config.prefer_env_vars = prefer;
    state.config_store.save(&config)?;
    info!("preferEnvVars 已设置为 {}", prefer);
    Ok(config)
}

/// 显式切换存储提供方
pub fn set_provider(state: &AppState, provider: ProviderKind) -> Result<Config> {
    let mut config = state.config_store.load()?;
    let previous = config.provider();
    config.storage_provider = Some(provider);
    state.config_store.save(&config)?;
    info!("存储提供方已切换: {} -> {}", previous, provider);
    Ok(config)
}
