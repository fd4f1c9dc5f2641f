//! Deployed stack resources

use std::sync::Arc;

use async_trait::async_trait;
use aws_model::models::cloudformation::StackResourceSummary;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::aws::cloudformation::CloudFormationApi;
use crate::errors::HotswapError;

/// Source of the resources currently deployed in a stack
#[async_trait]
pub trait ListStackResources: Send + Sync {
    async fn list_stack_resources(&self) -> Result<Vec<StackResourceSummary>, HotswapError>;
}

#[async_trait]
impl ListStackResources for Vec<StackResourceSummary> {
    async fn list_stack_resources(&self) -> Result<Vec<StackResourceSummary>, HotswapError> {
        Ok(self.clone())
    }
}

/// Lists the stack resources on first use and caches them
///
/// Most hotswapped resources carry their physical name in the template, so
/// the listing is often never needed.
pub struct LazyListStackResources {
    cloudformation: Arc<dyn CloudFormationApi>,
    stack_name: String,
    resources: OnceCell<Vec<StackResourceSummary>>,
}

impl LazyListStackResources {
    pub fn new(cloudformation: Arc<dyn CloudFormationApi>, stack_name: impl Into<String>) -> Self {
        Self {
            cloudformation,
            stack_name: stack_name.into(),
            resources: OnceCell::new(),
        }
    }

    async fn fetch(&self) -> Result<Vec<StackResourceSummary>, HotswapError> {
        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .cloudformation
                .list_stack_resources(&self.stack_name, next_token.as_deref())
                .await?;
            resources.extend(page.stack_resource_summaries.unwrap_or_default());

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} resources of stack {}", resources.len(), self.stack_name);
        Ok(resources)
    }
}

#[async_trait]
impl ListStackResources for LazyListStackResources {
    async fn list_stack_resources(&self) -> Result<Vec<StackResourceSummary>, HotswapError> {
        let resources = self.resources.get_or_try_init(|| self.fetch()).await?;
        Ok(resources.clone())
    }
}
