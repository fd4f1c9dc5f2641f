//! ECS API models (camelCase members, as on the wire)

use serde::{Deserialize, Serialize};

/// DescribeTaskDefinition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskDefinitionRequest {
    /// Family, `family:revision` or full ARN
    pub task_definition: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

/// DescribeTaskDefinition response
///
/// The task definition itself is kept as raw JSON: it is merged and sent
/// straight back in a RegisterTaskDefinition request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskDefinitionResponse {
    #[serde(default)]
    pub task_definition: Option<serde_json::Value>,

    #[serde(default)]
    pub tags: Option<Vec<Tag>>,
}

/// Resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// RegisterTaskDefinition response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskDefinitionResponse {
    #[serde(default)]
    pub task_definition: Option<RegisteredTaskDefinition>,

    #[serde(default)]
    pub tags: Option<Vec<Tag>>,
}

/// The parts of a registered task definition the engine reads back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTaskDefinition {
    #[serde(default)]
    pub task_definition_arn: Option<String>,

    #[serde(default)]
    pub family: Option<String>,

    #[serde(default)]
    pub revision: Option<i64>,
}

/// UpdateService request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    pub service: String,

    pub cluster: String,

    pub task_definition: String,

    pub force_new_deployment: bool,

    pub deployment_configuration: DeploymentConfiguration,
}

/// Deployment configuration of a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_healthy_percent: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_percent: Option<i32>,
}

/// UpdateService response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceResponse {
    #[serde(default)]
    pub service: Option<Service>,
}

/// DescribeServices request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesRequest {
    pub cluster: String,

    pub services: Vec<String>,
}

/// DescribeServices response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesResponse {
    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub failures: Vec<Failure>,
}

/// ECS service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub service_arn: Option<String>,

    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub cluster_arn: Option<String>,

    /// `ACTIVE`, `DRAINING` or `INACTIVE`
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub desired_count: i64,

    #[serde(default)]
    pub running_count: i64,

    #[serde(default)]
    pub task_definition: Option<String>,

    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

/// One deployment of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default)]
    pub id: Option<String>,

    /// `PRIMARY`, `ACTIVE` or `INACTIVE`
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub task_definition: Option<String>,

    #[serde(default)]
    pub desired_count: i64,

    #[serde(default)]
    pub running_count: i64,

    #[serde(default)]
    pub pending_count: i64,

    #[serde(default)]
    pub rollout_state: Option<String>,
}

/// A per-resource failure reported next to a successful response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    #[serde(default)]
    pub arn: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub detail: Option<String>,
}
