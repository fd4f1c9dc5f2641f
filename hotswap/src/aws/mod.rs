//! AWS control-plane access
//!
//! Credentials, region and endpoints come from the standard AWS
//! configuration chain (environment, shared profiles, SSO, instance
//! metadata), with the settings file able to pin a profile, a region or an
//! endpoint.

pub mod cloudformation;
pub mod ecs;

use std::sync::Arc;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, ConfigLoader, SdkConfig};
use aws_sdk_sts::config::Region;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tracing::debug;

use crate::aws::cloudformation::{CloudFormationApi, CloudFormationClient};
use crate::aws::ecs::{EcsApi, EcsClient};
use crate::errors::HotswapError;
use crate::settings::AwsSettings;

/// The service clients handed to hotswap operations
#[derive(Clone)]
pub struct AwsClients {
    ecs: Arc<dyn EcsApi>,
    cloudformation: Arc<dyn CloudFormationApi>,
}

impl AwsClients {
    pub fn new(ecs: Arc<dyn EcsApi>, cloudformation: Arc<dyn CloudFormationApi>) -> Self {
        Self {
            ecs,
            cloudformation,
        }
    }

    /// SDK-backed clients sharing one configuration
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new(
            Arc::new(EcsClient::new(config)),
            Arc::new(CloudFormationClient::new(config)),
        )
    }

    pub fn ecs(&self) -> Arc<dyn EcsApi> {
        self.ecs.clone()
    }

    pub fn cloudformation(&self) -> Arc<dyn CloudFormationApi> {
        self.cloudformation.clone()
    }
}

/// Configuration loader with the settings applied on top of the defaults
pub fn config_loader(settings: &AwsSettings) -> ConfigLoader {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
        TimeoutConfig::builder()
            .operation_attempt_timeout(Duration::from_secs(settings.request_timeout_secs))
            .build(),
    );

    if let Some(profile) = settings.profile.as_deref().filter(|p| !p.is_empty()) {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = settings.region.as_deref().filter(|r| !r.is_empty()) {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint) = settings.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        loader = loader.endpoint_url(endpoint);
    }
    loader
}

/// Resolve the SDK configuration; a region is required
pub async fn load_sdk_config(settings: &AwsSettings) -> Result<SdkConfig, HotswapError> {
    let config = config_loader(settings).load().await;
    match config.region() {
        Some(region) => debug!("Using region {}", region),
        None => {
            return Err(HotswapError::ConfigError(
                "No region configured. Set aws.region, AWS_REGION or a profile region".to_string(),
            ))
        }
    }
    Ok(config)
}

/// Account and partition of the configured credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account: String,
    pub partition: String,
}

/// Ask STS who the configured credentials belong to
pub async fn current_account(config: &SdkConfig) -> Result<AccountInfo, HotswapError> {
    let identity = aws_sdk_sts::Client::new(config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| sdk_error("sts", "GetCallerIdentity", e))?;

    let account = identity.account().ok_or_else(|| {
        HotswapError::Internal("GetCallerIdentity returned no account".to_string())
    })?;
    let partition = identity.arn().and_then(partition_from_arn).unwrap_or("aws");

    Ok(AccountInfo {
        account: account.to_string(),
        partition: partition.to_string(),
    })
}

/// Partition segment of an ARN (`arn:<partition>:...`)
pub fn partition_from_arn(arn: &str) -> Option<&str> {
    let mut parts = arn.split(':');
    match (parts.next(), parts.next()) {
        (Some("arn"), Some(partition)) if !partition.is_empty() => Some(partition),
        _ => None,
    }
}

/// DNS suffix of a partition's endpoints
pub fn url_suffix_for_partition(partition: &str) -> &'static str {
    match partition {
        "aws-cn" => "amazonaws.com.cn",
        "aws-iso" => "c2s.ic.gov",
        "aws-iso-b" => "sc2s.sgov.gov",
        "aws-iso-e" => "cloud.adc-e.uk",
        "aws-iso-f" => "csp.hci.ic.gov",
        _ => "amazonaws.com",
    }
}

/// SDK accessors return plain or optional values depending on whether the
/// member is required; these accept either
pub(crate) fn owned<'a>(value: impl Into<Option<&'a str>>) -> Option<String> {
    value.into().map(str::to_string)
}

pub(crate) fn count(value: impl Into<Option<i32>>) -> i64 {
    value.into().map(i64::from).unwrap_or_default()
}

/// Turn an SDK failure into a [`HotswapError::AwsError`]
pub(crate) fn sdk_error<E, R>(service: &str, operation: &str, err: SdkError<E, R>) -> HotswapError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = match err.message() {
        Some(message) => message.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    HotswapError::AwsError {
        service: service.to_string(),
        operation: operation.to_string(),
        code,
        message,
    }
}
