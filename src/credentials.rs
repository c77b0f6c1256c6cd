//! 凭证解析：决定使用哪个存储提供方以及哪组凭证

use crate::config::{Config, ProviderKind};
use crate::error::CredentialsError;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const PRIMARY_ACCESS_KEY_VARS: &[&str] =
    &["AWS_ACCESS_KEY", "VENV_AWS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
pub const PRIMARY_SECRET_KEY_VARS: &[&str] =
    &["AWS_SECRET_KEY", "VENV_AWS_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];
pub const PRIMARY_REGION_VARS: &[&str] = &["AWS_DEFAULT_REGION", "VENV_AWS_DEFAULT_REGION"];

pub const SECONDARY_ACCESS_KEY_VARS: &[&str] = &["STORJ_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
pub const SECONDARY_SECRET_KEY_VARS: &[&str] = &["STORJ_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];
pub const SECONDARY_ENDPOINT_VARS: &[&str] = &["STORJ_ENDPOINT"];

pub const DEFAULT_PRIMARY_REGION: &str = "us-east-2";
pub const DEFAULT_SECONDARY_ENDPOINT: &str = "https://gateway.eu1.storjshare.io";
/// 次级网关不区分区域，但签名需要一个
pub const SECONDARY_REGION: &str = "us-east-1";

/// 环境变量来源
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;

    /// 按优先级返回第一个非空的变量
    fn first_of(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.var(name))
            .find(|value| !value.trim().is_empty())
    }
}

/// 进程环境变量
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// 解析完成的凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub provider: ProviderKind,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: Option<String>,
    /// 凭证是否来自环境变量
    pub from_env: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("access_key", &mask(&self.access_key))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("from_env", &self.from_env)
            .finish()
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}

/// 凭证解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Credentials),
    /// 无可用凭证：应用继续运行，但同步功能被禁用
    Uninitialized { reason: String },
}

impl Resolution {
    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            Resolution::Ready(creds) => Some(creds),
            Resolution::Uninitialized { .. } => None,
        }
    }
}

/// 自动切换提供方的决定，由调用方记录日志并持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSwitch {
    pub from: ProviderKind,
    pub to: ProviderKind,
}

#[derive(Debug)]
enum AttemptFailure {
    /// 偏好环境变量但环境变量缺失
    EnvPreferredButMissing,
    Missing,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

fn attempt(
    provider: ProviderKind,
    config: &Config,
    env: &dyn EnvLookup,
) -> Result<Credentials, AttemptFailure> {
    let (access_vars, secret_vars, config_access, config_secret) = match provider {
        ProviderKind::Primary => (
            PRIMARY_ACCESS_KEY_VARS,
            PRIMARY_SECRET_KEY_VARS,
            &config.access_key,
            &config.secret_key,
        ),
        ProviderKind::Secondary => (
            SECONDARY_ACCESS_KEY_VARS,
            SECONDARY_SECRET_KEY_VARS,
            &config.secondary_access_key,
            &config.secondary_secret_key,
        ),
    };

    let env_access = env.first_of(access_vars);
    let env_secret = env.first_of(secret_vars);
    debug!(
        "{} 环境变量: access_key={}, secret_key={}",
        provider,
        env_access.is_some(),
        env_secret.is_some()
    );

    if config.prefer_env_vars && (env_access.is_none() || env_secret.is_none()) {
        return Err(AttemptFailure::EnvPreferredButMissing);
    }

    let from_env = env_access.is_some() && env_secret.is_some();
    let access_key = env_access.or_else(|| non_empty(config_access));
    let secret_key = env_secret.or_else(|| non_empty(config_secret));
    let (Some(access_key), Some(secret_key)) = (access_key, secret_key) else {
        return Err(AttemptFailure::Missing);
    };

    let (region, endpoint) = match provider {
        ProviderKind::Primary => (
            env.first_of(PRIMARY_REGION_VARS)
                .or_else(|| non_empty(&config.region))
                .unwrap_or_else(|| DEFAULT_PRIMARY_REGION.to_string()),
            None,
        ),
        ProviderKind::Secondary => (
            SECONDARY_REGION.to_string(),
            Some(
                env.first_of(SECONDARY_ENDPOINT_VARS)
                    .or_else(|| non_empty(&config.secondary_endpoint))
                    .unwrap_or_else(|| DEFAULT_SECONDARY_ENDPOINT.to_string()),
            ),
        ),
    };

    Ok(Credentials {
        provider,
        access_key,
        secret_key,
        region,
        endpoint,
        from_env,
    })
}

/// 解析凭证
///
/// 先尝试配置的提供方，失败后故障转移到另一个提供方。两者都失败时：
/// 显式指定了提供方且未偏好环境变量则返回错误，否则返回 `Uninitialized`。
pub fn resolve(config: &Config, env: &dyn EnvLookup) -> Result<Resolution, CredentialsError> {
    let requested = config.provider();

    let first_failure = match attempt(requested, config, env) {
        Ok(creds) => {
            info!("使用 {} 凭证 (来自环境变量: {})", requested, creds.from_env);
            return Ok(Resolution::Ready(creds));
        }
        Err(failure) => failure,
    };

    let fallback = requested.other();
    match attempt(fallback, config, env) {
        Ok(creds) => {
            warn!(
                "{} 凭证不可用 ({:?})，故障转移到 {}",
                requested, first_failure, fallback
            );
            return Ok(Resolution::Ready(creds));
        }
        Err(second_failure) => {
            debug!("{} 凭证同样不可用: {:?}", fallback, second_failure);
        }
    }

    let reason = if config.prefer_env_vars {
        "environment variables preferred but not found".to_string()
    } else {
        "no access key / secret key configured".to_string()
    };

    if config.storage_provider.is_some() && !config.prefer_env_vars {
        return Err(CredentialsError::Unavailable {
            requested: requested.to_string(),
            reason,
        });
    }

    warn!("没有可用的存储凭证，同步功能已禁用: {}", reason);
    Ok(Resolution::Uninitialized { reason })
}

/// 次级提供方的专用凭证是否可被发现（专用环境变量或配置）
pub fn has_secondary_credentials(config: &Config, env: &dyn EnvLookup) -> bool {
    let env_pair = env.var("STORJ_ACCESS_KEY").filter(|v| !v.is_empty()).is_some()
        && env.var("STORJ_SECRET_KEY").filter(|v| !v.is_empty()).is_some();
    let config_pair = non_empty(&config.secondary_access_key).is_some()
        && non_empty(&config.secondary_secret_key).is_some();
    env_pair || config_pair
}

/// 自动检测策略：发现次级提供方凭证且当前配置不同时，建议切换
pub fn detect_provider_switch(config: &Config, env: &dyn EnvLookup) -> Option<ProviderSwitch> {
    let current = config.provider();
    if current != ProviderKind::Secondary && has_secondary_credentials(config, env) {
        Some(ProviderSwitch {
            from: current,
            to: ProviderKind::Secondary,
        })
    } else {
        None
    }
}

/// 主提供方凭证是否来自环境变量
pub fn using_env_vars(env: &dyn EnvLookup) -> bool {
    env.first_of(&["AWS_ACCESS_KEY"]).is_some() && env.first_of(&["AWS_SECRET_KEY"]).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_without_env_preference() -> Config {
        Config {
            prefer_env_vars: false,
            ..Default::default()
        }
    }

    #[test]
    fn env_aliases_follow_precedence() {
        let env = env(&[
            ("AWS_ACCESS_KEY_ID", "generic"),
            ("VENV_AWS_ACCESS_KEY", "venv"),
            ("AWS_SECRET_ACCESS_KEY", "generic-secret"),
            ("VENV_AWS_DEFAULT_REGION", "eu-west-1"),
        ]);
        let config = Config {
            region: Some("ap-south-1".to_string()),
            ..Default::default()
        };

        let resolution = resolve(&config, &env).unwrap();
        let creds = resolution.credentials().unwrap();
        assert_eq!(creds.provider, ProviderKind::Primary);
        assert_eq!(creds.access_key, "venv");
        assert_eq!(creds.secret_key, "generic-secret");
        assert_eq!(creds.region, "eu-west-1");
        assert!(creds.from_env);
    }

    #[test]
    fn config_values_used_when_env_not_preferred() {
        let config = Config {
            access_key: Some("AKIA".to_string()),
            secret_key: Some("secret".to_string()),
            ..config_without_env_preference()
        };

        let creds = resolve(&config, &env(&[])).unwrap();
        let creds = creds.credentials().unwrap();
        assert_eq!(creds.access_key, "AKIA");
        assert_eq!(creds.region, DEFAULT_PRIMARY_REGION);
        assert!(!creds.from_env);
    }

    #[test]
    fn preferred_env_missing_is_soft_failure() {
        let config = Config {
            storage_provider: Some(ProviderKind::Primary),
            access_key: Some("AKIA".to_string()),
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };

        let resolution = resolve(&config, &env(&[])).unwrap();
        assert!(matches!(resolution, Resolution::Uninitialized { .. }));
    }

    #[test]
    fn explicit_provider_without_any_credentials_is_an_error() {
        let config = Config {
            storage_provider: Some(ProviderKind::Secondary),
            ..config_without_env_preference()
        };

        assert!(resolve(&config, &env(&[])).is_err());
    }

    #[test]
    fn implicit_provider_without_credentials_is_uninitialized() {
        let resolution = resolve(&config_without_env_preference(), &env(&[])).unwrap();
        assert!(matches!(resolution, Resolution::Uninitialized { .. }));
    }

    #[test]
    fn falls_over_to_secondary_provider() {
        let config = Config {
            storage_provider: Some(ProviderKind::Primary),
            secondary_access_key: Some("storj-access".to_string()),
            secondary_secret_key: Some("storj-secret".to_string()),
            ..config_without_env_preference()
        };

        let creds = resolve(&config, &env(&[])).unwrap();
        let creds = creds.credentials().unwrap();
        assert_eq!(creds.provider, ProviderKind::Secondary);
        assert_eq!(creds.region, SECONDARY_REGION);
        assert_eq!(creds.endpoint.as_deref(), Some(DEFAULT_SECONDARY_ENDPOINT));
    }

    #[test]
    fn secondary_endpoint_from_env_wins() {
        let config = Config {
            storage_provider: Some(ProviderKind::Secondary),
            secondary_endpoint: Some("https://config.example".to_string()),
            ..Default::default()
        };
        let env = env(&[
            ("STORJ_ACCESS_KEY", "a"),
            ("STORJ_SECRET_KEY", "s"),
            ("STORJ_ENDPOINT", "https://gateway.us1.storjshare.io"),
        ]);

        let creds = resolve(&config, &env).unwrap();
        assert_eq!(
            creds.credentials().unwrap().endpoint.as_deref(),
            Some("https://gateway.us1.storjshare.io")
        );
    }

    #[test]
    fn switch_detected_only_for_dedicated_secondary_credentials() {
        let config = Config::default();
        assert_eq!(
            detect_provider_switch(&config, &env(&[("AWS_ACCESS_KEY_ID", "a"), ("AWS_SECRET_ACCESS_KEY", "s")])),
            None
        );

        let switch = detect_provider_switch(
            &config,
            &env(&[("STORJ_ACCESS_KEY", "a"), ("STORJ_SECRET_KEY", "s")]),
        );
        assert_eq!(
            switch,
            Some(ProviderSwitch {
                from: ProviderKind::Primary,
                to: ProviderKind::Secondary
            })
        );

        let already = Config {
            storage_provider: Some(ProviderKind::Secondary),
            ..Default::default()
        };
        assert_eq!(
            detect_provider_switch(&already, &env(&[("STORJ_ACCESS_KEY", "a"), ("STORJ_SECRET_KEY", "s")])),
            None
        );
    }

    #[test]
    fn debug_output_masks_keys() {
        let creds = Credentials {
            provider: ProviderKind::Primary,
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "very-secret".to_string(),
            region: "us-east-2".to_string(),
            endpoint: None,
            from_env: false,
        };
        let output = format!("{:?}", creds);
        assert!(output.contains("AKIA****"));
        assert!(!output.contains("very-secret"));
    }
}
