//! ECS control-plane calls

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_model::models::ecs::{
    Deployment, DescribeServicesRequest, DescribeServicesResponse, DescribeTaskDefinitionRequest,
    DescribeTaskDefinitionResponse, Failure, RegisterTaskDefinitionResponse,
    RegisteredTaskDefinition, Service, Tag, UpdateServiceRequest, UpdateServiceResponse,
};
use aws_sdk_ecs::types::{DeploymentConfiguration as SdkDeploymentConfiguration, TaskDefinitionField};
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::AfterDeserializationInterceptorContextRef;
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::orchestrator::HttpRequest;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::body::SdkBody;
use aws_smithy_types::config_bag::ConfigBag;
use serde_json::Value;
use tracing::trace;

use crate::aws::{count, owned, sdk_error};
use crate::errors::HotswapError;

/// The ECS operations a hotswap needs
#[async_trait]
pub trait EcsApi: Send + Sync {
    async fn describe_task_definition(
        &self,
        request: DescribeTaskDefinitionRequest,
    ) -> Result<DescribeTaskDefinitionResponse, HotswapError>;

    /// Register a new revision; the request is the lowercased task definition
    async fn register_task_definition(
        &self,
        request: Value,
    ) -> Result<RegisterTaskDefinitionResponse, HotswapError>;

    async fn update_service(
        &self,
        request: UpdateServiceRequest,
    ) -> Result<UpdateServiceResponse, HotswapError>;

    async fn describe_services(
        &self,
        request: DescribeServicesRequest,
    ) -> Result<DescribeServicesResponse, HotswapError>;
}

/// ECS client backed by the AWS SDK
///
/// Task definitions travel as raw JSON in both directions. The merged
/// definition is sent as the RegisterTaskDefinition body unchanged, and the
/// DescribeTaskDefinition body is read back as-is, so members the typed
/// model does not know about survive the round trip.
pub struct EcsClient {
    client: aws_sdk_ecs::Client,
}

impl EcsClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ecs::Client::new(config),
        }
    }
}

#[async_trait]
impl EcsApi for EcsClient {
    async fn describe_task_definition(
        &self,
        request: DescribeTaskDefinitionRequest,
    ) -> Result<DescribeTaskDefinitionResponse, HotswapError> {
        let capture = CaptureResponseBody::default();
        let include = request
            .include
            .iter()
            .map(|field| TaskDefinitionField::from(field.as_str()))
            .collect::<Vec<_>>();

        self.client
            .describe_task_definition()
            .task_definition(&request.task_definition)
            .set_include((!include.is_empty()).then_some(include))
            .customize()
            .interceptor(capture.clone())
            .send()
            .await
            .map_err(|e| sdk_error("ecs", "DescribeTaskDefinition", e))?;

        let body = capture.take().ok_or_else(|| {
            HotswapError::Internal("DescribeTaskDefinition response body was not captured".to_string())
        })?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn register_task_definition(
        &self,
        request: Value,
    ) -> Result<RegisterTaskDefinitionResponse, HotswapError> {
        let family = request
            .get("family")
            .and_then(Value::as_str)
            .ok_or_else(|| HotswapError::DeployError("Task definition has no family".to_string()))?
            .to_string();
        let body = serde_json::to_vec(&request)?;

        let output = self
            .client
            .register_task_definition()
            .family(family)
            .customize()
            .mutate_request(move |req| replace_body(req, body.clone()))
            .send()
            .await
            .map_err(|e| sdk_error("ecs", "RegisterTaskDefinition", e))?;

        Ok(RegisterTaskDefinitionResponse {
            task_definition: output.task_definition().map(|td| RegisteredTaskDefinition {
                task_definition_arn: owned(td.task_definition_arn()),
                family: owned(td.family()),
                revision: Some(count(td.revision())),
            }),
            tags: Some(
                output
                    .tags()
                    .iter()
                    .map(|tag| Tag {
                        key: owned(tag.key()),
                        value: owned(tag.value()),
                    })
                    .collect(),
            ),
        })
    }

    async fn update_service(
        &self,
        request: UpdateServiceRequest,
    ) -> Result<UpdateServiceResponse, HotswapError> {
        let deployment_configuration = SdkDeploymentConfiguration::builder()
            .set_minimum_healthy_percent(request.deployment_configuration.minimum_healthy_percent)
            .set_maximum_percent(request.deployment_configuration.maximum_percent)
            .build();

        let output = self
            .client
            .update_service()
            .service(request.service)
            .cluster(request.cluster)
            .task_definition(request.task_definition)
            .force_new_deployment(request.force_new_deployment)
            .deployment_configuration(deployment_configuration)
            .send()
            .await
            .map_err(|e| sdk_error("ecs", "UpdateService", e))?;

        Ok(UpdateServiceResponse {
            service: output.service().map(service_from_sdk),
        })
    }

    async fn describe_services(
        &self,
        request: DescribeServicesRequest,
    ) -> Result<DescribeServicesResponse, HotswapError> {
        let output = self
            .client
            .describe_services()
            .cluster(request.cluster)
            .set_services(Some(request.services))
            .send()
            .await
            .map_err(|e| sdk_error("ecs", "DescribeServices", e))?;

        Ok(DescribeServicesResponse {
            services: output.services().iter().map(service_from_sdk).collect(),
            failures: output
                .failures()
                .iter()
                .map(|failure| Failure {
                    arn: owned(failure.arn()),
                    reason: owned(failure.reason()),
                    detail: owned(failure.detail()),
                })
                .collect(),
        })
    }
}

fn service_from_sdk(service: &aws_sdk_ecs::types::Service) -> Service {
    Service {
        service_arn: owned(service.service_arn()),
        service_name: owned(service.service_name()),
        cluster_arn: owned(service.cluster_arn()),
        status: owned(service.status()),
        desired_count: count(service.desired_count()),
        running_count: count(service.running_count()),
        task_definition: owned(service.task_definition()),
        deployments: service
            .deployments()
            .iter()
            .map(|deployment| Deployment {
                id: owned(deployment.id()),
                status: owned(deployment.status()),
                task_definition: owned(deployment.task_definition()),
                desired_count: count(deployment.desired_count()),
                running_count: count(deployment.running_count()),
                pending_count: count(deployment.pending_count()),
                rollout_state: deployment.rollout_state().map(|s| s.as_str().to_string()),
            })
            .collect(),
    }
}

/// Swap the serialized request body for `body`
fn replace_body(request: &mut HttpRequest, body: Vec<u8>) {
    request
        .headers_mut()
        .insert("content-length", body.len().to_string());
    *request.body_mut() = SdkBody::from(body);
}

/// Keeps a copy of the raw response body
#[derive(Clone, Default)]
struct CaptureResponseBody {
    body: Arc<Mutex<Option<Vec<u8>>>>,
}

impl CaptureResponseBody {
    fn take(&self) -> Option<Vec<u8>> {
        self.body.lock().ok().and_then(|mut body| body.take())
    }
}

impl fmt::Debug for CaptureResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CaptureResponseBody")
    }
}

impl Intercept for CaptureResponseBody {
    fn name(&self) -> &'static str {
        "CaptureResponseBody"
    }

    fn read_after_deserialization(
        &self,
        context: &AfterDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        if let Some(bytes) = context.response().body().bytes() {
            trace!("Captured {} response bytes", bytes.len());
            if let Ok(mut body) = self.body.lock() {
                *body = Some(bytes.to_vec());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replace_body_keeps_unmodelled_members() {
        let mut request = HttpRequest::new(SdkBody::from("{\"family\":\"web\"}"));
        let definition = json!({
            "family": "web",
            "containerDefinitions": [{ "name": "app", "image": "nginx:2" }],
            "runtimePlatform": { "cpuArchitecture": "ARM64" }
        });
        let body = serde_json::to_vec(&definition).unwrap();

        replace_body(&mut request, body.clone());

        assert_eq!(request.body().bytes(), Some(body.as_slice()));
        assert_eq!(
            request.headers().get("content-length"),
            Some(body.len().to_string().as_str())
        );
        let sent: Value = serde_json::from_slice(request.body().bytes().unwrap()).unwrap();
        assert_eq!(sent["runtimePlatform"]["cpuArchitecture"], "ARM64");
    }

    #[test]
    fn test_capture_take_empties() {
        let capture = CaptureResponseBody::default();
        assert!(capture.take().is_none());
        if let Ok(mut body) = capture.body.lock() {
            *body = Some(b"{}".to_vec());
        }
        assert_eq!(capture.clone().take(), Some(b"{}".to_vec()));
        assert!(capture.take().is_none());
    }
}
