//! CloudFormation calls

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_model::models::cloudformation::{ListStackResourcesResult, StackResourceSummary};
use aws_sdk_cloudformation::types::{ResourceStatus, TemplateStage};
use serde_json::Value;

use crate::aws::{owned, sdk_error};
use crate::errors::HotswapError;

/// The CloudFormation operations a hotswap needs
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// One page of the stack's resources
    async fn list_stack_resources(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<ListStackResourcesResult, HotswapError>;

    /// The currently deployed template, parsed
    async fn get_template(&self, stack_name: &str) -> Result<Value, HotswapError>;
}

/// CloudFormation client backed by the AWS SDK
pub struct CloudFormationClient {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(config),
        }
    }
}

#[async_trait]
impl CloudFormationApi for CloudFormationClient {
    async fn list_stack_resources(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<ListStackResourcesResult, HotswapError> {
        let output = self
            .client
            .list_stack_resources()
            .stack_name(stack_name)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error("cloudformation", "ListStackResources", e))?;

        let summaries = output
            .stack_resource_summaries()
            .iter()
            .map(|summary| StackResourceSummary {
                logical_resource_id: owned(summary.logical_resource_id()).unwrap_or_default(),
                physical_resource_id: owned(summary.physical_resource_id()),
                resource_type: owned(summary.resource_type()).unwrap_or_default(),
                resource_status: resource_status(summary.resource_status()),
            })
            .collect();

        Ok(ListStackResourcesResult {
            stack_resource_summaries: Some(summaries),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn get_template(&self, stack_name: &str) -> Result<Value, HotswapError> {
        let output = self
            .client
            .get_template()
            .stack_name(stack_name)
            .template_stage(TemplateStage::Original)
            .send()
            .await
            .map_err(|e| sdk_error("cloudformation", "GetTemplate", e))?;
        parse_template_body(output.template_body().map(str::to_string))
    }
}

fn resource_status<'a>(status: impl Into<Option<&'a ResourceStatus>>) -> Option<String> {
    status.into().map(|s| s.as_str().to_string())
}

fn parse_template_body(body: Option<String>) -> Result<Value, HotswapError> {
    let body = body.ok_or_else(|| {
        HotswapError::TemplateError("GetTemplate returned no template body".to_string())
    })?;
    serde_json::from_str(&body).map_err(|e| {
        HotswapError::TemplateError(format!("Deployed template is not JSON: {}", e))
    })
}
