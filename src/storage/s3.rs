use super::operator::OperatorStore;
use crate::config::ProviderKind;
use crate::credentials::Credentials;
use opendal::services::S3;
use opendal::Operator;
use std::sync::Arc;

/// S3 兼容提供方的连接参数
///
/// 主提供方：区域端点 + virtual-host 寻址；次级网关：自定义端点 + path 寻址。
/// 两者都使用 SigV4 签名，差异只存在于这里。
#[derive(Clone)]
pub struct S3Profile {
    pub provider: ProviderKind,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub virtual_host_style: bool,
}

impl S3Profile {
    pub fn primary(credentials: &Credentials) -> Self {
        Self {
            provider: ProviderKind::Primary,
            access_key: credentials.access_key.clone(),
            secret_key: credentials.secret_key.clone(),
            region: credentials.region.clone(),
            endpoint: credentials.endpoint.clone(),
            virtual_host_style: true,
        }
    }

    pub fn secondary(credentials: &Credentials) -> Self {
        Self {
            provider: ProviderKind::Secondary,
            access_key: credentials.access_key.clone(),
            secret_key: credentials.secret_key.clone(),
            region: credentials.region.clone(),
            endpoint: credentials.endpoint.clone(),
            virtual_host_style: false,
        }
    }

    pub fn from_credentials(credentials: &Credentials) -> Self {
        match credentials.provider {
            ProviderKind::Primary => Self::primary(credentials),
            ProviderKind::Secondary => Self::secondary(credentials),
        }
    }

    /// 为指定 bucket 构建 Operator
    pub fn operator(&self, bucket: &str) -> opendal::Result<Operator> {
        let mut builder = S3::default()
            .bucket(bucket)
            .region(&self.region)
            .access_key_id(&self.access_key)
            .secret_access_key(&self.secret_key);

        if let Some(ref ep) = self.endpoint {
            builder = builder.endpoint(ep);
        }
        if self.virtual_host_style {
            builder = builder.enable_virtual_host_style();
        }

        Ok(Operator::new(builder)?.finish())
    }

    pub fn into_store(self) -> OperatorStore {
        let name = match self.endpoint {
            Some(ref ep) => format!("{}:{}", self.provider, ep),
            None => format!("{}:s3/{}", self.provider, self.region),
        };
        OperatorStore::new(name, Arc::new(move |bucket: &str| self.operator(bucket)))
    }
}
