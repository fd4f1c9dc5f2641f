//! ECS task definition hotswapping
//!
//! A change to the container definitions of a task definition is applied by
//! registering a new revision and pointing every service that uses it at
//! that revision, then waiting for the service deployments to settle.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_model::models::ecs::{
    DeploymentConfiguration, DescribeServicesRequest, DescribeTaskDefinitionRequest,
    DescribeTaskDefinitionResponse, UpdateServiceRequest,
};
use futures::future::{try_join_all, FutureExt};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::aws::AwsClients;
use crate::errors::HotswapError;
use crate::evaluate::{EvaluateCloudFormationTemplate, Evaluated};
use crate::hotswap::common::{
    classify_changes, deep_compare_object, lower_case_first_character, ChangeCandidate,
    ChangeResult, HotswapOperation, NonHotswappableChange,
};
use crate::hotswap::keys::{task_definition_key_shape, transform_object_keys};
use crate::hotswap::registry::HotswapDetector;
use crate::hotswap::waiter::{self, deployment_to_finish_acceptors};

pub const TASK_DEFINITION_TYPE: &str = "AWS::ECS::TaskDefinition";
pub const SERVICE_TYPE: &str = "AWS::ECS::Service";

const HOTSWAPPABLE_PROPERTIES: &[&str] = &["ContainerDefinitions"];

/// Fields of a described task definition that RegisterTaskDefinition rejects
const RESPONSE_ONLY_FIELDS: &[&str] = &[
    "compatibilities",
    "taskDefinitionArn",
    "revision",
    "status",
    "requiresAttributes",
    "registeredAt",
    "registeredBy",
];

/// A task definition ready to be registered
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionChange {
    /// Template-cased properties; only the container definition patch when
    /// `hotswappable_with_merge` is set
    pub task_definition: Map<String, Value>,

    pub family: String,

    /// Whether `task_definition` must be merged onto the live definition
    pub hotswappable_with_merge: bool,
}

/// Detects hotswappable `AWS::ECS::TaskDefinition` changes
pub struct EcsServiceDetector {
    waiter_options: waiter::Options,
}

impl EcsServiceDetector {
    pub fn new(waiter_options: waiter::Options) -> Self {
        Self { waiter_options }
    }
}

impl Default for EcsServiceDetector {
    fn default() -> Self {
        Self::new(waiter::Options::default())
    }
}

#[async_trait]
impl HotswapDetector for EcsServiceDetector {
    async fn detect(
        &self,
        change: &ChangeCandidate,
        evaluate: &EvaluateCloudFormationTemplate,
    ) -> Result<Vec<ChangeResult>, HotswapError> {
        if change.resource_type != TASK_DEFINITION_TYPE {
            return Ok(Vec::new());
        }

        let logical_id = change.logical_id.as_str();
        let mut ret = Vec::new();

        let classified = classify_changes(change, HOTSWAPPABLE_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut ret);

        let references = evaluate.find_references_to(logical_id);
        let mut service_arns = Vec::new();
        for reference in references.iter().filter(|r| r.resource_type == SERVICE_TYPE) {
            match evaluate.find_physical_name_for(&reference.logical_id).await? {
                Some(arn) => service_arns.push(arn),
                None => debug!("Service {} is not deployed yet", reference.logical_id),
            }
        }

        if service_arns.is_empty() {
            ret.push(ChangeResult::NonHotswappable(NonHotswappableChange::new(
                change,
                "No ECS services reference the changed task definition",
                false,
            )));
        }
        for reference in references.iter().filter(|r| r.resource_type != SERVICE_TYPE) {
            ret.push(ChangeResult::NonHotswappable(NonHotswappableChange::new(
                change,
                format!(
                    "A resource '{}' with Type '{}' that is not an ECS Service was found referencing the changed TaskDefinition '{}'",
                    reference.logical_id, reference.resource_type, logical_id
                ),
                true,
            )));
        }

        let props_changed = classified.hotswappable_prop_names();
        if props_changed.is_empty() {
            return Ok(ret);
        }

        let Some(task_definition) = prepare_task_definition_change(evaluate, change).await? else {
            ret.push(ChangeResult::NonHotswappable(NonHotswappableChange::new(
                change,
                "Found unsupported changes to the task definition",
                false,
            )));
            return Ok(ret);
        };

        let mut resource_names: Vec<String> = service_arns
            .iter()
            .map(|arn| format!("ECS Service '{}'", service_name(arn)))
            .collect();
        resource_names.push(format!("ECS Task Definition '{}'", task_definition.family));

        let waiter_options = self.waiter_options.clone();
        ret.push(ChangeResult::Hotswappable(HotswapOperation {
            resource_type: change.resource_type.clone(),
            props_changed,
            service: "ecs-service",
            resource_names,
            apply: Box::new(move |clients| {
                apply_task_definition_change(clients, task_definition, service_arns, waiter_options)
                    .boxed()
            }),
        }));

        Ok(ret)
    }
}

/// Build the task definition to register for a candidate
///
/// Returns `None` when the family cannot be established or the container
/// definitions changed in a way that cannot be patched.
pub async fn prepare_task_definition_change(
    evaluate: &EvaluateCloudFormationTemplate,
    change: &ChangeCandidate,
) -> Result<Option<TaskDefinitionChange>, HotswapError> {
    let mut properties = change.old_properties.clone();
    match change.new_properties.get("ContainerDefinitions") {
        Some(definitions) => {
            properties.insert("ContainerDefinitions".to_string(), definitions.clone());
        }
        None => {
            properties.remove("ContainerDefinitions");
        }
    }

    let Some(family_name_or_arn) = evaluate
        .establish_resource_physical_name(&change.logical_id, properties.get("Family"))
        .await?
    else {
        debug!("No family found for task definition {}", change.logical_id);
        return Ok(None);
    };
    let Some(family) = family_from_name_or_arn(&family_name_or_arn) else {
        debug!("Unrecognized task definition ARN {}", family_name_or_arn);
        return Ok(None);
    };

    let mut body = properties;
    body.remove("Family");

    let (mut task_definition, hotswappable_with_merge) =
        match evaluate.evaluate_cfn_expression(&Value::Object(body)).await? {
            Evaluated::Resolved(Value::Object(evaluated)) => (evaluated, false),
            Evaluated::Resolved(other) => {
                return Err(HotswapError::EvaluationError(format!(
                    "Task definition {} evaluated to a non-object: {}",
                    change.logical_id, other
                )));
            }
            Evaluated::Unresolvable(reason) => {
                debug!(
                    "Task definition {} is not fully resolvable ({}), trying a merge",
                    change.logical_id, reason
                );
                let old = container_definitions(&change.old_properties);
                let new = container_definitions(&change.new_properties);
                let (Some(old), Some(new)) = (old, new) else {
                    return Ok(None);
                };
                match deep_compare_container_definitions(evaluate, old, new).await? {
                    Some(patch) => {
                        let patch = patch.into_iter().map(Value::Object).collect();
                        let mut partial = Map::new();
                        partial.insert("ContainerDefinitions".to_string(), Value::Array(patch));
                        (partial, true)
                    }
                    None => return Ok(None),
                }
            }
        };

    task_definition.insert("Family".to_string(), Value::String(family.clone()));

    Ok(Some(TaskDefinitionChange {
        task_definition,
        family,
        hotswappable_with_merge,
    }))
}

/// Per-container patch of the changed fields, or `None` when the change
/// adds or removes containers or fields, or contains an unresolvable value
///
/// Fields are compared at the top level of each container only.
pub async fn deep_compare_container_definitions(
    evaluate: &EvaluateCloudFormationTemplate,
    old_definitions: &[Value],
    new_definitions: &[Value],
) -> Result<Option<Vec<Map<String, Value>>>, HotswapError> {
    if old_definitions.len() != new_definitions.len() {
        return Ok(None);
    }

    let mut result = Vec::with_capacity(old_definitions.len());
    for (prev, next) in old_definitions.iter().zip(new_definitions) {
        let mut patch = Map::new();

        let (Some(prev), Some(next)) = (prev.as_object(), next.as_object()) else {
            if deep_compare_object(prev, next) {
                result.push(patch);
                continue;
            }
            return Ok(None);
        };

        if !prev.keys().eq(next.keys()) {
            return Ok(None);
        }

        for (key, prev_value) in prev {
            let next_value = &next[key];
            if deep_compare_object(prev_value, next_value) {
                continue;
            }
            match evaluate.evaluate_cfn_expression(next_value).await? {
                Evaluated::Resolved(value) => {
                    patch.insert(key.clone(), value);
                }
                Evaluated::Unresolvable(reason) => {
                    debug!("Container field {} cannot be hotswapped: {}", key, reason);
                    return Ok(None);
                }
            }
        }

        result.push(patch);
    }

    Ok(Some(result))
}

/// Merge a lowercased patch onto a described task definition
///
/// Container definitions are matched by index. Returns `None` when the live
/// definition has no container at a patched index.
pub fn merge_task_definitions(
    patch: &Map<String, Value>,
    target: DescribeTaskDefinitionResponse,
) -> Option<Map<String, Value>> {
    let Some(Value::Object(mut task_definition)) = target.task_definition else {
        return None;
    };

    let src = patch
        .get("containerDefinitions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let dst = task_definition
        .get_mut("containerDefinitions")
        .and_then(Value::as_array_mut)?;

    for (i, container) in src.iter().enumerate() {
        let target_container = dst.get_mut(i)?.as_object_mut()?;
        if let Some(fields) = container.as_object() {
            for (key, value) in fields {
                target_container.insert(key.clone(), value.clone());
            }
        }
    }

    for field in RESPONSE_ONLY_FIELDS {
        task_definition.remove(*field);
    }

    if let Some(tags) = target.tags.filter(|t| !t.is_empty()) {
        task_definition.insert("tags".to_string(), serde_json::to_value(tags).ok()?);
    }

    Some(task_definition)
}

async fn apply_task_definition_change(
    clients: Arc<AwsClients>,
    change: TaskDefinitionChange,
    service_arns: Vec<String>,
    waiter_options: waiter::Options,
) -> Result<(), HotswapError> {
    let ecs = clients.ecs();
    let family = change.family;

    // Step 1: register a new revision
    let mut request = transform_object_keys(
        &Value::Object(change.task_definition),
        &lower_case_first_character,
        &task_definition_key_shape(),
    );

    if change.hotswappable_with_merge {
        let live = ecs
            .describe_task_definition(DescribeTaskDefinitionRequest {
                task_definition: family.clone(),
                include: vec!["TAGS".to_string()],
            })
            .await?;
        if live.task_definition.is_none() {
            return Err(HotswapError::NotFound(format!(
                "Could not find TaskDefinition {}",
                family
            )));
        }

        let empty = Map::new();
        let patch = request.as_object().unwrap_or(&empty);
        let merged = merge_task_definitions(patch, live).ok_or_else(|| {
            HotswapError::DeployError(
                "Failed to merge the task definition. Please try deploying without hotswap first."
                    .to_string(),
            )
        })?;
        request = Value::Object(merged);
    }

    let registered = ecs.register_task_definition(request).await?;
    let revision_arn = registered
        .task_definition
        .and_then(|t| t.task_definition_arn)
        .ok_or_else(|| {
            HotswapError::DeployError(format!(
                "RegisterTaskDefinition returned no ARN for family {}",
                family
            ))
        })?;
    info!("Registered task definition {}", revision_arn);

    // Step 2: point every service at the new revision
    let mut services_per_cluster: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for arn in service_arns {
        services_per_cluster
            .entry(cluster_name(&arn).to_string())
            .or_default()
            .push(arn);
    }

    let mut updates = Vec::new();
    for (cluster, services) in &services_per_cluster {
        for service in services {
            updates.push(ecs.update_service(UpdateServiceRequest {
                service: service.clone(),
                cluster: cluster.clone(),
                task_definition: revision_arn.clone(),
                force_new_deployment: true,
                deployment_configuration: DeploymentConfiguration {
                    minimum_healthy_percent: Some(0),
                    maximum_percent: None,
                },
            }));
        }
    }
    try_join_all(updates).await?;
    debug!("Updated services in {} cluster(s)", services_per_cluster.len());

    // Step 3: wait for the deployments, one waiter per cluster
    let acceptors = deployment_to_finish_acceptors();
    let ecs = ecs.as_ref();
    let waits = services_per_cluster.iter().map(|(cluster, services)| {
        let acceptors = &acceptors;
        let waiter_options = &waiter_options;
        async move {
            waiter::wait_until(
                "DeploymentToFinish",
                waiter_options,
                acceptors,
                move || {
                    ecs.describe_services(DescribeServicesRequest {
                        cluster: cluster.clone(),
                        services: services.clone(),
                    })
                },
                tokio::time::sleep,
            )
            .await
        }
    });
    try_join_all(waits).await?;

    Ok(())
}

/// `family` from a plain name or a task definition ARN
/// (`arn:aws:ecs:<region>:<account>:task-definition/<family>:<revision>`)
fn family_from_name_or_arn(name_or_arn: &str) -> Option<String> {
    let parts: Vec<&str> = name_or_arn.split(':').collect();
    if parts.len() > 1 {
        parts
            .get(5)
            .and_then(|resource| resource.split('/').nth(1))
            .map(str::to_string)
    } else {
        Some(name_or_arn.to_string())
    }
}

fn container_definitions(properties: &Map<String, Value>) -> Option<&[Value]> {
    match properties.get("ContainerDefinitions") {
        None => Some(&[][..]),
        Some(value) => value.as_array().map(Vec::as_slice),
    }
}

/// `arn:aws:ecs:<region>:<account>:service/<cluster>/<service>`
fn cluster_name(service_arn: &str) -> &str {
    service_arn.split('/').nth(1).unwrap_or(service_arn)
}

fn service_name(service_arn: &str) -> &str {
    service_arn.split('/').nth(2).unwrap_or(service_arn)
}
