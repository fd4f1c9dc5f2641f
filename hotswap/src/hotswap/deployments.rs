//! Hotswap deployment driver
//!
//! Diffs the deployed template against the new one, descending into nested
//! stacks, and asks the registered detectors about every changed resource.
//! When the whole change set can be hotswapped the resulting operations are
//! applied.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use colored::Colorize;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::aws::AwsClients;
use crate::errors::HotswapError;
use crate::evaluate::{EvaluateCloudFormationTemplate, Evaluated, LazyListStackResources};
use crate::hotswap::common::{ChangeCandidate, ChangeResult, HotswapOperation, NonHotswappableChange};
use crate::hotswap::diff::{diff_templates, ResourceDifference};
use crate::hotswap::nested_stacks::{nested_template_of, NestedStackNames, NESTED_STACK_TYPE};
use crate::hotswap::registry::DetectorRegistry;
use crate::models::template::Template;

const ICON: &str = "✨";
const METADATA_TYPE: &str = "AWS::CDK::Metadata";

/// What to do with changes that cannot be hotswapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapMode {
    /// Give up and let a full deployment handle everything
    #[default]
    FallBack,

    /// Hotswap what can be hotswapped and skip the rest
    HotswapOnly,
}

impl FromStr for HotswapMode {
    type Err = HotswapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fall-back" | "fallback" => Ok(HotswapMode::FallBack),
            "hotswap-only" => Ok(HotswapMode::HotswapOnly),
            _ => Err(HotswapError::ConfigError(format!("Invalid hotswap mode: {}", s))),
        }
    }
}

impl fmt::Display for HotswapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotswapMode::FallBack => write!(f, "fall-back"),
            HotswapMode::HotswapOnly => write!(f, "hotswap-only"),
        }
    }
}

/// Result of a hotswap that was carried out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotswapOutcome {
    /// Nothing needed hotswapping
    pub no_op: bool,

    /// Names of the resources that were hotswapped
    pub hotswapped: Vec<String>,

    /// Changes left undeployed (hotswap-only mode)
    pub skipped: Vec<NonHotswappableChange>,
}

/// How a resource difference relates to hotswapping
#[derive(Debug)]
enum Candidacy {
    Irrelevant,
    RequiresFullDeployment(NonHotswappableChange),
    Candidate(ChangeCandidate),
}

/// Changes found in one template and its nested stacks
#[derive(Default)]
struct ClassifiedResources {
    operations: Vec<HotswapOperation>,
    rejections: Vec<NonHotswappableChange>,
}

impl ClassifiedResources {
    fn extend(&mut self, other: ClassifiedResources) {
        self.operations.extend(other.operations);
        self.rejections.extend(other.rejections);
    }
}

/// Try to deploy the evaluator's template by hotswapping
///
/// `deployed_template` and the evaluator's template carry their nested
/// stacks inlined, as produced by
/// [`read_current_template_with_nested_stacks`](crate::hotswap::nested_stacks::read_current_template_with_nested_stacks).
/// Returns `None` when a full deployment is needed instead.
pub async fn try_hotswap_deployment(
    clients: Arc<AwsClients>,
    evaluate: &EvaluateCloudFormationTemplate,
    deployed_template: &Template,
    nested_stack_names: &NestedStackNames,
    mode: HotswapMode,
    registry: &DetectorRegistry,
) -> Result<Option<HotswapOutcome>, HotswapError> {
    let ClassifiedResources {
        operations,
        rejections,
    } = classify_resource_changes(
        &clients,
        evaluate,
        deployed_template,
        nested_stack_names,
        registry,
    )
    .await?;

    match mode {
        HotswapMode::FallBack if !rejections.is_empty() => {
            for rejection in &rejections {
                info!("Falling back to a full deployment: {}", rejection);
            }
            return Ok(None);
        }
        HotswapMode::FallBack => {}
        HotswapMode::HotswapOnly => {
            for rejection in rejections.iter().filter(|r| r.hotswap_only_visible) {
                warn!("Skipping non-hotswappable change: {}", rejection);
            }
        }
    }

    let hotswapped = apply_all(clients, operations).await?;
    Ok(Some(HotswapOutcome {
        no_op: hotswapped.is_empty(),
        hotswapped,
        skipped: rejections,
    }))
}

fn classify_resource_changes<'a>(
    clients: &'a Arc<AwsClients>,
    evaluate: &'a EvaluateCloudFormationTemplate,
    deployed_template: &'a Template,
    nested_stack_names: &'a NestedStackNames,
    registry: &'a DetectorRegistry,
) -> BoxFuture<'a, Result<ClassifiedResources, HotswapError>> {
    async move {
        let differences = diff_templates(deployed_template, evaluate.template());
        debug!("{} resource(s) changed", differences.len());

        let mut classified = ClassifiedResources::default();
        for difference in &differences {
            if is_nested_stack_update(difference) {
                let nested = classify_nested_stack_changes(
                    clients,
                    evaluate,
                    difference,
                    nested_stack_names,
                    registry,
                )
                .await?;
                classified.extend(nested);
                continue;
            }

            let change = match classify_difference(difference) {
                Candidacy::Irrelevant => continue,
                Candidacy::RequiresFullDeployment(rejection) => {
                    classified.rejections.push(rejection);
                    continue;
                }
                Candidacy::Candidate(change) => change,
            };

            let detectors = registry.detectors_for(&change.resource_type);
            if detectors.is_empty() {
                classified.rejections.push(NonHotswappableChange::new(
                    &change,
                    format!("Resource type {} is not hotswappable", change.resource_type),
                    true,
                ));
                continue;
            }
            // renames always need a detector's verdict
            if !difference.is_rename() && change.property_updates().is_empty() {
                continue;
            }

            let results =
                try_join_all(detectors.iter().map(|d| d.detect(&change, evaluate))).await?;
            let results: Vec<ChangeResult> = results.into_iter().flatten().collect();
            if results.is_empty() {
                classified.rejections.push(NonHotswappableChange::new(
                    &change,
                    "No detector can hotswap this change",
                    true,
                ));
            }
            for result in results {
                match result {
                    ChangeResult::Hotswappable(operation) => classified.operations.push(operation),
                    ChangeResult::NonHotswappable(rejection) => classified.rejections.push(rejection),
                }
            }
        }

        Ok(classified)
    }
    .boxed()
}

fn is_nested_stack_update(difference: &ResourceDifference) -> bool {
    difference.old_type() == Some(NESTED_STACK_TYPE) && difference.new_type() == Some(NESTED_STACK_TYPE)
}

/// Diff the inlined templates of a changed nested stack
async fn classify_nested_stack_changes(
    clients: &Arc<AwsClients>,
    evaluate: &EvaluateCloudFormationTemplate,
    difference: &ResourceDifference,
    nested_stack_names: &NestedStackNames,
    registry: &DetectorRegistry,
) -> Result<ClassifiedResources, HotswapError> {
    let logical_id = &difference.logical_id;
    let rejection = |reason: String| ClassifiedResources {
        operations: Vec::new(),
        rejections: vec![NonHotswappableChange {
            resource_type: NESTED_STACK_TYPE.to_string(),
            logical_id: logical_id.clone(),
            rejected_property: None,
            reason,
            hotswap_only_visible: true,
        }],
    };

    let Some(nested) = nested_stack_names.get(logical_id) else {
        return Ok(rejection(format!(
            "the template of nested stack '{}' is not part of the cloud assembly",
            logical_id
        )));
    };
    let Some(stack_name) = nested.stack_name.as_deref() else {
        return Ok(rejection(format!(
            "nested stack '{}' is not deployed yet, so it cannot be hotswapped",
            logical_id
        )));
    };

    let parameters = match nested_stack_parameters(evaluate, difference).await? {
        Ok(parameters) => parameters,
        Err(reason) => {
            return Ok(rejection(format!(
                "parameters of nested stack '{}' cannot be evaluated: {}",
                logical_id, reason
            )))
        }
    };

    let nested_evaluate = evaluate.create_nested(
        stack_name,
        nested_template_of(difference.new_value.as_ref()),
        parameters,
        Arc::new(LazyListStackResources::new(
            clients.cloudformation(),
            stack_name,
        )),
    );
    let nested_deployed = nested_template_of(difference.old_value.as_ref());
    debug!("Looking for hotswappable changes in nested stack {}", stack_name);

    classify_resource_changes(
        clients,
        &nested_evaluate,
        &nested_deployed,
        &nested.children,
        registry,
    )
    .await
}

/// Evaluate the `Parameters` passed to a nested stack
///
/// The inner `Err` carries the reason a parameter cannot be known yet.
async fn nested_stack_parameters(
    evaluate: &EvaluateCloudFormationTemplate,
    difference: &ResourceDifference,
) -> Result<Result<HashMap<String, String>, String>, HotswapError> {
    let Some(parameters) = difference
        .new_value
        .as_ref()
        .and_then(|definition| definition.get("Properties"))
        .and_then(|properties| properties.get("Parameters"))
    else {
        return Ok(Ok(HashMap::new()));
    };

    let parameters = match evaluate.evaluate_cfn_expression(parameters).await? {
        Evaluated::Resolved(Value::Object(parameters)) => parameters,
        Evaluated::Resolved(other) => {
            return Err(HotswapError::TemplateError(format!(
                "Nested stack parameters must be an object, found {}",
                other
            )))
        }
        Evaluated::Unresolvable(reason) => return Ok(Err(reason)),
    };

    Ok(Ok(parameters
        .into_iter()
        .map(|(name, value)| (name, parameter_value(&value)))
        .collect()))
}

fn parameter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(parameter_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn classify_difference(difference: &ResourceDifference) -> Candidacy {
    let logical_id = difference.logical_id.clone();
    let rejection = |resource_type: Option<&str>, reason: String| {
        Candidacy::RequiresFullDeployment(NonHotswappableChange {
            resource_type: resource_type.unwrap_or_default().to_string(),
            logical_id: logical_id.clone(),
            rejected_property: None,
            reason,
            hotswap_only_visible: true,
        })
    };

    let (old_type, new_type) = match (&difference.old_value, &difference.new_value) {
        (None, _) => return rejection(difference.new_type(), "resource was added".to_string()),
        (_, None) => return rejection(difference.old_type(), "resource was removed".to_string()),
        _ => (difference.old_type(), difference.new_type()),
    };

    if old_type != new_type {
        return rejection(
            new_type,
            format!(
                "resource type changed from {} to {}",
                old_type.unwrap_or_default(),
                new_type.unwrap_or_default()
            ),
        );
    }
    let resource_type = new_type.unwrap_or_default();
    if resource_type == METADATA_TYPE {
        return Candidacy::Irrelevant;
    }

    let other_changes = difference.other_changes();
    if !other_changes.is_empty() {
        return rejection(
            new_type,
            format!("attribute(s) {} changed", other_changes.join(", ")),
        );
    }

    Candidacy::Candidate(ChangeCandidate::new(
        logical_id.clone(),
        resource_type,
        difference.old_properties(),
        difference.new_properties(),
    ))
}

async fn apply_all(
    clients: Arc<AwsClients>,
    operations: Vec<HotswapOperation>,
) -> Result<Vec<String>, HotswapError> {
    if operations.is_empty() {
        return Ok(Vec::new());
    }

    println!("\n{} hotswapping resources:", ICON);
    let applied = try_join_all(
        operations
            .into_iter()
            .map(|operation| apply_one(clients.clone(), operation)),
    )
    .await?;
    Ok(applied.into_iter().flatten().collect())
}

async fn apply_one(
    clients: Arc<AwsClients>,
    operation: HotswapOperation,
) -> Result<Vec<String>, HotswapError> {
    for name in &operation.resource_names {
        println!("   {} {}", ICON, name.bold());
    }
    info!(
        "Hotswapping {} ({}): {}",
        operation.resource_type,
        operation.service,
        operation.props_changed.join(", ")
    );

    let names = operation.resource_names;
    (operation.apply)(clients).await?;

    for name in &names {
        println!("{} {} {}", ICON, name.bold(), "hotswapped!".green());
    }
    Ok(names)
}
