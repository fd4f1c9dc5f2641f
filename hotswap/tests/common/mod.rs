//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_model::models::cloudformation::{ListStackResourcesResult, StackResourceSummary};
use aws_model::models::ecs::{
    Deployment, DescribeServicesRequest, DescribeServicesResponse, DescribeTaskDefinitionRequest,
    DescribeTaskDefinitionResponse, RegisterTaskDefinitionResponse, RegisteredTaskDefinition,
    Service, UpdateServiceRequest, UpdateServiceResponse,
};
use serde_json::{Map, Value};

use hotswap::aws::cloudformation::CloudFormationApi;
use hotswap::aws::ecs::EcsApi;
use hotswap::aws::AwsClients;
use hotswap::errors::HotswapError;
use hotswap::evaluate::{EvaluateCloudFormationTemplate, EvaluateOptions};
use hotswap::hotswap::common::ChangeCandidate;
use hotswap::hotswap::waiter;
use hotswap::models::template::Template;

pub const REGION: &str = "us-east-1";
pub const ACCOUNT: &str = "123456789012";

/// One recorded ECS call
#[derive(Debug, Clone, PartialEq)]
pub enum EcsCall {
    DescribeTaskDefinition(DescribeTaskDefinitionRequest),
    RegisterTaskDefinition(Value),
    UpdateService(UpdateServiceRequest),
    DescribeServices(DescribeServicesRequest),
}

/// ECS fake that records calls
///
/// Services are reported as settled unless `services_response` is set.
#[derive(Default)]
pub struct FakeEcs {
    pub calls: Mutex<Vec<EcsCall>>,
    pub described_task_definition: Mutex<DescribeTaskDefinitionResponse>,
    pub services_response: Mutex<Option<DescribeServicesResponse>>,
}

impl FakeEcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<EcsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn registered(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EcsCall::RegisterTaskDefinition(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn service_updates(&self) -> Vec<UpdateServiceRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EcsCall::UpdateService(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn service_waits(&self) -> Vec<DescribeServicesRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EcsCall::DescribeServices(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EcsApi for FakeEcs {
    async fn describe_task_definition(
        &self,
        request: DescribeTaskDefinitionRequest,
    ) -> Result<DescribeTaskDefinitionResponse, HotswapError> {
        self.calls
            .lock()
            .unwrap()
            .push(EcsCall::DescribeTaskDefinition(request));
        Ok(self.described_task_definition.lock().unwrap().clone())
    }

    async fn register_task_definition(
        &self,
        request: Value,
    ) -> Result<RegisterTaskDefinitionResponse, HotswapError> {
        let family = request["family"].as_str().unwrap_or("unknown").to_string();
        self.calls
            .lock()
            .unwrap()
            .push(EcsCall::RegisterTaskDefinition(request));
        Ok(RegisterTaskDefinitionResponse {
            task_definition: Some(RegisteredTaskDefinition {
                task_definition_arn: Some(task_definition_arn(&family, 2)),
                family: Some(family),
                revision: Some(2),
            }),
            tags: None,
        })
    }

    async fn update_service(
        &self,
        request: UpdateServiceRequest,
    ) -> Result<UpdateServiceResponse, HotswapError> {
        self.calls.lock().unwrap().push(EcsCall::UpdateService(request));
        Ok(UpdateServiceResponse::default())
    }

    async fn describe_services(
        &self,
        request: DescribeServicesRequest,
    ) -> Result<DescribeServicesResponse, HotswapError> {
        self.calls
            .lock()
            .unwrap()
            .push(EcsCall::DescribeServices(request.clone()));

        if let Some(response) = self.services_response.lock().unwrap().clone() {
            return Ok(response);
        }
        Ok(DescribeServicesResponse {
            services: request
                .services
                .iter()
                .map(|arn| Service {
                    service_arn: Some(arn.clone()),
                    status: Some("ACTIVE".to_string()),
                    deployments: vec![Deployment {
                        status: Some("PRIMARY".to_string()),
                        desired_count: 1,
                        running_count: 1,
                        ..Default::default()
                    }],
                    ..Default::default()
                })
                .collect(),
            failures: vec![],
        })
    }
}

/// CloudFormation fake serving fixed templates and resource lists per stack
///
/// Unknown stacks fail the way CloudFormation does.
#[derive(Default)]
pub struct FakeCloudFormation {
    pub templates: HashMap<String, Value>,
    pub resources: HashMap<String, Vec<StackResourceSummary>>,
}

impl FakeCloudFormation {
    pub fn with_stack(
        mut self,
        stack_name: &str,
        template: Value,
        resources: Vec<StackResourceSummary>,
    ) -> Self {
        self.templates.insert(stack_name.to_string(), template);
        self.resources.insert(stack_name.to_string(), resources);
        self
    }
}

fn stack_does_not_exist(operation: &str, stack_name: &str) -> HotswapError {
    HotswapError::AwsError {
        service: "cloudformation".to_string(),
        operation: operation.to_string(),
        code: "ValidationError".to_string(),
        message: format!("Stack with id {} does not exist", stack_name),
    }
}

#[async_trait]
impl CloudFormationApi for FakeCloudFormation {
    async fn list_stack_resources(
        &self,
        stack_name: &str,
        _next_token: Option<&str>,
    ) -> Result<ListStackResourcesResult, HotswapError> {
        let resources = self
            .resources
            .get(stack_name)
            .ok_or_else(|| stack_does_not_exist("ListStackResources", stack_name))?;
        Ok(ListStackResourcesResult {
            stack_resource_summaries: Some(resources.clone()),
            next_token: None,
        })
    }

    async fn get_template(&self, stack_name: &str) -> Result<Value, HotswapError> {
        self.templates
            .get(stack_name)
            .cloned()
            .ok_or_else(|| stack_does_not_exist("GetTemplate", stack_name))
    }
}

pub fn clients(ecs: Arc<FakeEcs>) -> Arc<AwsClients> {
    clients_with(ecs, FakeCloudFormation::default())
}

pub fn clients_with(ecs: Arc<FakeEcs>, cloudformation: FakeCloudFormation) -> Arc<AwsClients> {
    Arc::new(AwsClients::new(ecs, Arc::new(cloudformation)))
}

pub fn task_definition_arn(family: &str, revision: u32) -> String {
    format!(
        "arn:aws:ecs:{}:{}:task-definition/{}:{}",
        REGION, ACCOUNT, family, revision
    )
}

pub fn service_arn(cluster: &str, service: &str) -> String {
    format!("arn:aws:ecs:{}:{}:service/{}/{}", REGION, ACCOUNT, cluster, service)
}

pub fn stack_resource(logical_id: &str, resource_type: &str, physical_id: &str) -> StackResourceSummary {
    StackResourceSummary {
        logical_resource_id: logical_id.to_string(),
        physical_resource_id: Some(physical_id.to_string()),
        resource_type: resource_type.to_string(),
        resource_status: Some("UPDATE_COMPLETE".to_string()),
    }
}

/// Evaluator over `template` for a stack with `resources` deployed
pub fn evaluator(template: Value, resources: Vec<StackResourceSummary>) -> EvaluateCloudFormationTemplate {
    EvaluateCloudFormationTemplate::new(EvaluateOptions {
        template: Template::new(template),
        parameters: HashMap::new(),
        account: ACCOUNT.to_string(),
        region: REGION.to_string(),
        partition: "aws".to_string(),
        url_suffix: "amazonaws.com".to_string(),
        stack_name: "test-stack".to_string(),
        stack_resources: Arc::new(resources),
    })
}

pub fn task_definition_change(logical_id: &str, old_properties: Value, new_properties: Value) -> ChangeCandidate {
    ChangeCandidate::new(
        logical_id,
        "AWS::ECS::TaskDefinition",
        as_map(old_properties),
        as_map(new_properties),
    )
}

pub fn as_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn fast_waiter() -> waiter::Options {
    waiter::Options {
        delay: Duration::ZERO,
        max_attempts: 3,
    }
}
