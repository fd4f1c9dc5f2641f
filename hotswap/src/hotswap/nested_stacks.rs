//! Nested stack templates
//!
//! Nested stacks synthesized into the cloud assembly are read from disk and
//! their deployed counterparts fetched from CloudFormation. Both are inlined
//! under `Properties.NestedTemplate` of the parent's
//! `AWS::CloudFormation::Stack` resource, so a change inside a nested stack
//! shows up as a difference of its parent resource.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::aws::cloudformation::CloudFormationApi;
use crate::errors::HotswapError;
use crate::evaluate::{LazyListStackResources, ListStackResources};
use crate::models::template::{resource_type, Template};

pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";
pub const NESTED_TEMPLATE_PROPERTY: &str = "NestedTemplate";
const ASSET_PATH_METADATA: &str = "aws:asset:path";

/// Nested stacks of a template, keyed by logical ID
pub type NestedStackNames = BTreeMap<String, NestedStack>;

/// A nested stack of the template being deployed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NestedStack {
    /// Name of the deployed nested stack; `None` when it does not exist yet
    pub stack_name: Option<String>,

    /// Nested stacks of this one
    pub children: NestedStackNames,
}

/// The deployed template, with nested templates inlined
#[derive(Debug, Clone)]
pub struct CurrentTemplate {
    pub deployed_template: Template,
    pub nested_stack_names: NestedStackNames,
}

/// Read the deployed template of `stack_name` and inline every nested stack
///
/// `new_template` gets the generated nested templates found under
/// `assembly_dir` inlined the same way.
pub async fn read_current_template_with_nested_stacks(
    cloudformation: Arc<dyn CloudFormationApi>,
    stack_name: &str,
    new_template: &mut Value,
    assembly_dir: &Path,
) -> Result<CurrentTemplate, HotswapError> {
    let mut deployed = cloudformation.get_template(stack_name).await?;
    let nested_stack_names = inline_nested_stacks(
        &cloudformation,
        Some(stack_name),
        &mut deployed,
        new_template,
        assembly_dir,
    )
    .await?;

    Ok(CurrentTemplate {
        deployed_template: Template::new(deployed),
        nested_stack_names,
    })
}

fn inline_nested_stacks<'a>(
    cloudformation: &'a Arc<dyn CloudFormationApi>,
    parent_stack_name: Option<&'a str>,
    deployed: &'a mut Value,
    generated: &'a mut Value,
    assembly_dir: &'a Path,
) -> BoxFuture<'a, Result<NestedStackNames, HotswapError>> {
    async move {
        let mut names = NestedStackNames::new();

        for (logical_id, asset_path) in nested_stack_assets(generated) {
            let mut nested_generated = read_template_file(&assembly_dir.join(&asset_path)).await?;
            let stack_name = match parent_stack_name {
                Some(parent) => nested_stack_name(cloudformation, parent, &logical_id).await?,
                None => None,
            };
            let mut nested_deployed = match &stack_name {
                Some(name) => cloudformation.get_template(name).await?,
                None => json!({ "Resources": {} }),
            };
            debug!(
                "Nested stack {} is {}",
                logical_id,
                stack_name.as_deref().unwrap_or("not deployed")
            );

            let children = inline_nested_stacks(
                cloudformation,
                stack_name.as_deref(),
                &mut nested_deployed,
                &mut nested_generated,
                assembly_dir,
            )
            .await?;

            set_nested_template(generated, &logical_id, nested_generated);
            set_nested_template(deployed, &logical_id, nested_deployed);
            names.insert(
                logical_id,
                NestedStack {
                    stack_name,
                    children,
                },
            );
        }

        Ok(names)
    }
    .boxed()
}

/// Nested stack resources that point at a template in the assembly
fn nested_stack_assets(template: &Value) -> Vec<(String, String)> {
    let Some(resources) = template.get("Resources").and_then(Value::as_object) else {
        return Vec::new();
    };
    resources
        .iter()
        .filter(|(_, definition)| resource_type(definition) == Some(NESTED_STACK_TYPE))
        .filter_map(|(logical_id, definition)| {
            definition
                .get("Metadata")
                .and_then(|metadata| metadata.get(ASSET_PATH_METADATA))
                .and_then(Value::as_str)
                .map(|path| (logical_id.clone(), path.to_string()))
        })
        .collect()
}

async fn read_template_file(path: &Path) -> Result<Value, HotswapError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        HotswapError::TemplateError(format!("Unable to read nested template {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        HotswapError::TemplateError(format!("Nested template {} is not JSON: {}", path.display(), e))
    })
}

/// Name of the deployed nested stack behind `logical_id` of the parent
async fn nested_stack_name(
    cloudformation: &Arc<dyn CloudFormationApi>,
    parent_stack_name: &str,
    logical_id: &str,
) -> Result<Option<String>, HotswapError> {
    let resources = LazyListStackResources::new(cloudformation.clone(), parent_stack_name);
    let summaries = match resources.list_stack_resources().await {
        Ok(summaries) => summaries,
        Err(HotswapError::AwsError { message, .. })
            if message.starts_with("Stack with id") && message.ends_with("does not exist") =>
        {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };

    Ok(summaries
        .into_iter()
        .find(|summary| summary.logical_resource_id == logical_id)
        .and_then(|summary| summary.physical_resource_id)
        .and_then(|arn| stack_name_from_arn(&arn)))
}

/// `arn:aws:cloudformation:<region>:<account>:stack/<name>/<id>` to `<name>`
fn stack_name_from_arn(arn: &str) -> Option<String> {
    let start = arn.find('/')?;
    let end = arn.rfind('/')?;
    (end > start + 1).then(|| arn[start + 1..end].to_string())
}

fn set_nested_template(template: &mut Value, logical_id: &str, nested: Value) {
    let Some(resource) = template
        .get_mut("Resources")
        .and_then(|resources| resources.get_mut(logical_id))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    let properties = resource
        .entry("Properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(properties) = properties.as_object_mut() {
        properties.insert(NESTED_TEMPLATE_PROPERTY.to_string(), nested);
    }
}

/// The inlined nested template of a resource definition
pub fn nested_template_of(definition: Option<&Value>) -> Template {
    let nested = definition
        .and_then(|d| d.get("Properties"))
        .and_then(|p| p.get(NESTED_TEMPLATE_PROPERTY))
        .cloned()
        .unwrap_or_else(|| json!({}));
    Template::new(nested)
}
