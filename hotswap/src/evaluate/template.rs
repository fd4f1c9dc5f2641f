//! CloudFormation expression evaluation against a deployed stack

use std::collections::HashMap;
use std::sync::Arc;

use aws_model::models::cloudformation::StackResourceSummary;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::HotswapError;
use crate::evaluate::stack_resources::ListStackResources;
use crate::evaluate::Evaluated;
use crate::models::template::{resource_type, ResourceReference, Template};

/// Inputs for [`EvaluateCloudFormationTemplate`]
pub struct EvaluateOptions {
    /// The template about to be deployed
    pub template: Template,

    /// Stack parameter values
    pub parameters: HashMap<String, String>,

    pub account: String,
    pub region: String,
    pub partition: String,
    pub url_suffix: String,
    pub stack_name: String,

    /// Resources of the currently deployed stack
    pub stack_resources: Arc<dyn ListStackResources>,
}

/// Resolves intrinsic functions of a template against the deployed stack
pub struct EvaluateCloudFormationTemplate {
    template: Template,
    context: HashMap<String, String>,
    account: String,
    region: String,
    partition: String,
    stack_resources: Arc<dyn ListStackResources>,
}

/// Why an expression could not be turned into a value
enum EvalError {
    Unresolvable(String),
    Fatal(HotswapError),
}

impl From<HotswapError> for EvalError {
    fn from(err: HotswapError) -> Self {
        EvalError::Fatal(err)
    }
}

type EvalResult = Result<Value, EvalError>;

fn malformed(function: &str, detail: &str) -> EvalError {
    EvalError::Fatal(HotswapError::EvaluationError(format!(
        "Malformed {}: {}",
        function, detail
    )))
}

impl EvaluateCloudFormationTemplate {
    pub fn new(options: EvaluateOptions) -> Self {
        let mut context = HashMap::from([
            ("AWS::AccountId".to_string(), options.account.clone()),
            ("AWS::Region".to_string(), options.region.clone()),
            ("AWS::Partition".to_string(), options.partition.clone()),
            ("AWS::URLSuffix".to_string(), options.url_suffix),
            ("AWS::StackName".to_string(), options.stack_name),
        ]);
        context.extend(options.parameters);

        Self {
            template: options.template,
            context,
            account: options.account,
            region: options.region,
            partition: options.partition,
            stack_resources: options.stack_resources,
        }
    }

    /// The template being evaluated
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Evaluator for a nested stack of this one
    ///
    /// Account, region and partition carry over; the pseudo parameter
    /// `AWS::StackName` and the parameters are those of the nested stack.
    pub fn create_nested(
        &self,
        stack_name: &str,
        template: Template,
        parameters: HashMap<String, String>,
        stack_resources: Arc<dyn ListStackResources>,
    ) -> Self {
        Self::new(EvaluateOptions {
            template,
            parameters,
            account: self.account.clone(),
            region: self.region.clone(),
            partition: self.partition.clone(),
            url_suffix: self
                .context
                .get("AWS::URLSuffix")
                .cloned()
                .unwrap_or_default(),
            stack_name: stack_name.to_string(),
            stack_resources,
        })
    }

    /// All other resources whose definition mentions `logical_id`
    pub fn find_references_to(&self, logical_id: &str) -> Vec<ResourceReference> {
        self.template
            .resources()
            .filter(|(id, definition)| id.as_str() != logical_id && references(logical_id, definition))
            .map(|(id, definition)| ResourceReference {
                logical_id: id.clone(),
                resource_type: resource_type(definition).unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Physical ID of a resource in the deployed stack
    pub async fn find_physical_name_for(&self, logical_id: &str) -> Result<Option<String>, HotswapError> {
        let resources = self.stack_resources.list_stack_resources().await?;
        Ok(resources
            .into_iter()
            .find(|r| r.logical_resource_id == logical_id)
            .and_then(|r| r.physical_resource_id))
    }

    /// Physical name of a resource
    ///
    /// Uses the name declared in the template when it can be evaluated, and
    /// the deployed physical ID otherwise.
    pub async fn establish_resource_physical_name(
        &self,
        logical_id: &str,
        physical_name_in_template: Option<&Value>,
    ) -> Result<Option<String>, HotswapError> {
        if let Some(expression) = physical_name_in_template.filter(|v| !v.is_null()) {
            match self.evaluate_cfn_expression(expression).await? {
                Evaluated::Resolved(Value::String(name)) => return Ok(Some(name)),
                Evaluated::Resolved(Value::Null) => {}
                Evaluated::Resolved(other) => return Ok(Some(other.to_string())),
                Evaluated::Unresolvable(reason) => {
                    debug!(
                        "Declared name of {} cannot be evaluated ({}), using the deployed one",
                        logical_id, reason
                    );
                }
            }
        }
        self.find_physical_name_for(logical_id).await
    }

    /// Evaluate a CloudFormation expression
    ///
    /// Returns [`Evaluated::Unresolvable`] when the expression contains
    /// something that cannot be known before deployment; other failures are
    /// errors.
    pub async fn evaluate_cfn_expression(&self, expression: &Value) -> Result<Evaluated, HotswapError> {
        match self.evaluate(expression).await {
            Ok(value) => Ok(Evaluated::Resolved(value)),
            Err(EvalError::Unresolvable(reason)) => Ok(Evaluated::Unresolvable(reason)),
            Err(EvalError::Fatal(err)) => Err(err),
        }
    }

    fn evaluate<'a>(&'a self, expression: &'a Value) -> BoxFuture<'a, EvalResult> {
        async move {
            match expression {
                Value::Array(items) => {
                    let mut evaluated = Vec::with_capacity(items.len());
                    for item in items {
                        evaluated.push(self.evaluate(item).await?);
                    }
                    Ok(Value::Array(evaluated))
                }
                Value::Object(map) => {
                    if let Some((name, args)) = parse_intrinsic(map) {
                        return self.evaluate_intrinsic(name, args).await;
                    }
                    let mut evaluated = Map::with_capacity(map.len());
                    for (key, value) in map {
                        evaluated.insert(key.clone(), self.evaluate(value).await?);
                    }
                    Ok(Value::Object(evaluated))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    async fn evaluate_intrinsic(&self, name: &str, args: &Value) -> EvalResult {
        match name {
            "Ref" => {
                let logical_id = args.as_str().ok_or_else(|| malformed("Ref", "expected a string"))?;
                match self.find_ref_target(logical_id).await? {
                    Some(target) => Ok(Value::String(target)),
                    None => Err(EvalError::Unresolvable(format!(
                        "Reference target '{}' was not found",
                        logical_id
                    ))),
                }
            }
            "Fn::GetAtt" => {
                let (logical_id, attribute) = match args {
                    Value::String(s) => s
                        .split_once('.')
                        .map(|(id, attr)| (id.to_string(), attr.to_string()))
                        .ok_or_else(|| malformed("Fn::GetAtt", "expected 'LogicalId.Attribute'"))?,
                    Value::Array(parts) if parts.len() == 2 => {
                        let id = parts[0].as_str().ok_or_else(|| malformed("Fn::GetAtt", "logical ID"))?;
                        let attr = match self.evaluate(&parts[1]).await? {
                            Value::String(attr) => attr,
                            _ => return Err(malformed("Fn::GetAtt", "attribute name")),
                        };
                        (id.to_string(), attr)
                    }
                    _ => return Err(malformed("Fn::GetAtt", "expected two arguments")),
                };
                match self.find_get_att_target(&logical_id, Some(&attribute)).await? {
                    Some(value) => Ok(Value::String(value)),
                    None => Err(EvalError::Unresolvable(format!(
                        "Trying to evaluate Fn::GetAtt of '{}.{}' but not in context!",
                        logical_id, attribute
                    ))),
                }
            }
            "Fn::Join" => {
                let (separator, list) = two_args(name, args)?;
                let separator = separator.as_str().ok_or_else(|| malformed(name, "separator"))?;
                let items = match self.evaluate(list).await? {
                    Value::Array(items) => items,
                    _ => return Err(malformed(name, "expected a list")),
                };
                let parts = items.iter().map(scalar_to_string).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(separator)))
            }
            "Fn::Split" => {
                let (separator, source) = two_args(name, args)?;
                let separator = separator.as_str().ok_or_else(|| malformed(name, "separator"))?;
                let source = match self.evaluate(source).await? {
                    Value::String(source) => source,
                    _ => return Err(malformed(name, "expected a string")),
                };
                Ok(Value::Array(
                    source
                        .split(separator)
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
            "Fn::Select" => {
                let (index, list) = two_args(name, args)?;
                let index = match self.evaluate(index).await? {
                    Value::Number(n) => n.as_u64().map(|n| n as usize),
                    Value::String(s) => s.parse::<usize>().ok(),
                    _ => None,
                }
                .ok_or_else(|| malformed(name, "index"))?;
                match self.evaluate(list).await? {
                    Value::Array(mut items) if index < items.len() => Ok(items.swap_remove(index)),
                    Value::Array(_) => Err(malformed(name, "index out of bounds")),
                    _ => Err(malformed(name, "expected a list")),
                }
            }
            "Fn::Sub" => {
                let (template, variables) = match args {
                    Value::String(template) => (template.as_str(), Map::new()),
                    Value::Array(parts) if parts.len() == 2 => {
                        let template = parts[0].as_str().ok_or_else(|| malformed(name, "template"))?;
                        let variables = match self.evaluate(&parts[1]).await? {
                            Value::Object(vars) => vars,
                            _ => return Err(malformed(name, "variables")),
                        };
                        (template, variables)
                    }
                    _ => return Err(malformed(name, "expected a string or two arguments")),
                };
                self.substitute(template, &variables).await.map(Value::String)
            }
            other => Err(EvalError::Unresolvable(format!(
                "CloudFormation function {} is not supported",
                other
            ))),
        }
    }

    async fn substitute(&self, template: &str, variables: &Map<String, Value>) -> Result<String, EvalError> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                output.push_str(&rest[start..]);
                return Ok(output);
            };
            let key = &after[..end];
            rest = &after[end + 1..];

            if let Some(literal) = key.strip_prefix('!') {
                output.push_str("${");
                output.push_str(literal);
                output.push('}');
                continue;
            }

            let value = if let Some(value) = variables.get(key) {
                Some(scalar_to_string(value)?)
            } else if let Some(value) = self.context.get(key) {
                Some(value.clone())
            } else if let Some((logical_id, attribute)) = key.split_once('.') {
                self.find_get_att_target(logical_id, Some(attribute)).await?
            } else {
                self.find_ref_target(key).await?
            };

            match value {
                Some(value) => output.push_str(&value),
                None => {
                    return Err(EvalError::Unresolvable(format!(
                        "Fn::Sub target '{}' was not found",
                        key
                    )))
                }
            }
        }

        output.push_str(rest);
        Ok(output)
    }

    async fn find_ref_target(&self, logical_id: &str) -> Result<Option<String>, HotswapError> {
        // parameters and pseudo parameters first, then the deployed resources
        if let Some(value) = self.context.get(logical_id) {
            return Ok(Some(value.clone()));
        }
        self.find_get_att_target(logical_id, None).await
    }

    async fn find_get_att_target(
        &self,
        logical_id: &str,
        attribute: Option<&str>,
    ) -> Result<Option<String>, HotswapError> {
        let resources = self.stack_resources.list_stack_resources().await?;
        Ok(resources
            .iter()
            .find(|r| r.logical_resource_id == logical_id)
            .and_then(|r| self.format_resource_attribute(r, attribute)))
    }

    fn format_resource_attribute(&self, resource: &StackResourceSummary, attribute: Option<&str>) -> Option<String> {
        let physical_id = resource.physical_resource_id.clone()?;

        // no attribute means a Ref, which is the physical ID
        let Some(attribute) = attribute else {
            return Some(physical_id);
        };

        let Some(format) = arn_format_for(&resource.resource_type, attribute) else {
            return Some(physical_id);
        };

        let mut type_parts = resource.resource_type.split("::").skip(1);
        let service = type_parts.next().unwrap_or_default().to_lowercase();
        let resource_kind = type_parts.next().unwrap_or_default().to_lowercase();

        Some(format(&ArnParts {
            partition: &self.partition,
            service: &service,
            region: &self.region,
            account: &self.account,
            resource_type: &resource_kind,
            resource_name: &physical_id,
        }))
    }
}

fn parse_intrinsic(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    map.iter()
        .next()
        .filter(|(key, _)| key.starts_with("Fn::") || key.as_str() == "Ref")
        .map(|(key, args)| (key.as_str(), args))
}

fn two_args<'a>(function: &str, args: &'a Value) -> Result<(&'a Value, &'a Value), EvalError> {
    match args {
        Value::Array(parts) if parts.len() == 2 => Ok((&parts[0], &parts[1])),
        _ => Err(malformed(function, "expected two arguments")),
    }
}

fn scalar_to_string(value: &Value) -> Result<String, EvalError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(EvalError::Fatal(HotswapError::EvaluationError(format!(
            "Expected a scalar value, found {}",
            value
        )))),
    }
}

/// Whether any string anywhere in `element` equals `logical_id`
fn references(logical_id: &str, element: &Value) -> bool {
    match element {
        Value::String(s) => s == logical_id,
        Value::Array(items) => items.iter().any(|item| references(logical_id, item)),
        Value::Object(map) => map.values().any(|value| references(logical_id, value)),
        _ => false,
    }
}

struct ArnParts<'a> {
    partition: &'a str,
    service: &'a str,
    region: &'a str,
    account: &'a str,
    resource_type: &'a str,
    resource_name: &'a str,
}

type ArnFormat = fn(&ArnParts<'_>) -> String;

fn arn_format_for(resource_type: &str, attribute: &str) -> Option<ArnFormat> {
    match (resource_type, attribute) {
        ("AWS::IAM::Role" | "AWS::IAM::User" | "AWS::IAM::Group", "Arn") => Some(iam_arn),
        ("AWS::S3::Bucket", "Arn") => Some(s3_arn),
        ("AWS::Lambda::Function", "Arn") => Some(std_colon_resource_arn),
        _ => None,
    }
}

// IAM ARNs have no region
fn iam_arn(parts: &ArnParts<'_>) -> String {
    format!(
        "arn:{}:{}::{}:{}/{}",
        parts.partition, parts.service, parts.account, parts.resource_type, parts.resource_name
    )
}

// S3 ARNs have no account, region or resource type
fn s3_arn(parts: &ArnParts<'_>) -> String {
    format!("arn:{}:{}:::{}", parts.partition, parts.service, parts.resource_name)
}

fn std_colon_resource_arn(parts: &ArnParts<'_>) -> String {
    format!(
        "arn:{}:{}:{}:{}:{}:{}",
        parts.partition, parts.service, parts.region, parts.account, parts.resource_type, parts.resource_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(logical_id: &str, resource_type: &str, physical_id: &str) -> StackResourceSummary {
        StackResourceSummary {
            logical_resource_id: logical_id.to_string(),
            physical_resource_id: Some(physical_id.to_string()),
            resource_type: resource_type.to_string(),
            resource_status: None,
        }
    }

    fn evaluator(template: Value, resources: Vec<StackResourceSummary>) -> EvaluateCloudFormationTemplate {
        EvaluateCloudFormationTemplate::new(EvaluateOptions {
            template: Template::new(template),
            parameters: HashMap::from([("Stage".to_string(), "dev".to_string())]),
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            partition: "aws".to_string(),
            url_suffix: "amazonaws.com".to_string(),
            stack_name: "my-stack".to_string(),
            stack_resources: Arc::new(resources),
        })
    }

    async fn resolve(evaluator: &EvaluateCloudFormationTemplate, expression: Value) -> Value {
        match evaluator.evaluate_cfn_expression(&expression).await.unwrap() {
            Evaluated::Resolved(value) => value,
            Evaluated::Unresolvable(reason) => panic!("unexpectedly unresolvable: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_plain_values_pass_through() {
        let eval = evaluator(json!({}), vec![]);
        let expression = json!({ "Image": "nginx", "Cpu": 256, "Essential": true, "Links": ["a", null] });
        assert_eq!(resolve(&eval, expression.clone()).await, expression);
    }

    #[tokio::test]
    async fn test_ref_parameters_and_resources() {
        let eval = evaluator(json!({}), vec![summary("Bucket", "AWS::S3::Bucket", "my-bucket")]);

        assert_eq!(resolve(&eval, json!({ "Ref": "AWS::Region" })).await, "us-east-1");
        assert_eq!(resolve(&eval, json!({ "Ref": "Stage" })).await, "dev");
        assert_eq!(resolve(&eval, json!({ "Ref": "Bucket" })).await, "my-bucket");

        let missing = eval.evaluate_cfn_expression(&json!({ "Ref": "Nope" })).await.unwrap();
        assert!(matches!(missing, Evaluated::Unresolvable(_)));
    }

    #[tokio::test]
    async fn test_get_att_formats_arns() {
        let eval = evaluator(
            json!({}),
            vec![
                summary("Bucket", "AWS::S3::Bucket", "my-bucket"),
                summary("Role", "AWS::IAM::Role", "my-role"),
                summary("Fn", "AWS::Lambda::Function", "my-fn"),
                summary("Queue", "AWS::SQS::Queue", "https://sqs/queue"),
            ],
        );

        assert_eq!(
            resolve(&eval, json!({ "Fn::GetAtt": ["Bucket", "Arn"] })).await,
            "arn:aws:s3:::my-bucket"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::GetAtt": "Role.Arn" })).await,
            "arn:aws:iam::123456789012:role/my-role"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::GetAtt": ["Fn", "Arn"] })).await,
            "arn:aws:lambda:us-east-1:123456789012:function:my-fn"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::GetAtt": ["Queue", "QueueName"] })).await,
            "https://sqs/queue"
        );
    }

    #[tokio::test]
    async fn test_join_split_select() {
        let eval = evaluator(json!({}), vec![]);

        assert_eq!(
            resolve(&eval, json!({ "Fn::Join": ["-", ["a", { "Ref": "Stage" }, 3]] })).await,
            "a-dev-3"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::Split": [",", "x,y,z"] })).await,
            json!(["x", "y", "z"])
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::Select": [1, { "Fn::Split": [",", "x,y,z"] }] })).await,
            "y"
        );
    }

    #[tokio::test]
    async fn test_sub() {
        let eval = evaluator(json!({}), vec![summary("Role", "AWS::IAM::Role", "my-role")]);

        assert_eq!(
            resolve(&eval, json!({ "Fn::Sub": "arn:${AWS::Partition}:x:${AWS::Region}:${AWS::AccountId}" })).await,
            "arn:aws:x:us-east-1:123456789012"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::Sub": ["${Name}-${Stage}-${!Literal}", { "Name": "svc" }] })).await,
            "svc-dev-${Literal}"
        );
        assert_eq!(
            resolve(&eval, json!({ "Fn::Sub": "${Role.Arn}" })).await,
            "arn:aws:iam::123456789012:role/my-role"
        );

        let missing = eval
            .evaluate_cfn_expression(&json!({ "Fn::Sub": "${Unknown}" }))
            .await
            .unwrap();
        assert!(matches!(missing, Evaluated::Unresolvable(_)));
    }

    #[tokio::test]
    async fn test_unsupported_function_is_unresolvable() {
        let eval = evaluator(json!({}), vec![]);
        let result = eval
            .evaluate_cfn_expression(&json!({ "Image": { "Fn::ImportValue": "Shared-Image" } }))
            .await
            .unwrap();
        match result {
            Evaluated::Unresolvable(reason) => assert!(reason.contains("Fn::ImportValue")),
            Evaluated::Resolved(v) => panic!("expected unresolvable, got {}", v),
        }
    }

    #[tokio::test]
    async fn test_malformed_intrinsic_is_fatal() {
        let eval = evaluator(json!({}), vec![]);
        let result = eval.evaluate_cfn_expression(&json!({ "Fn::Join": "oops" })).await;
        assert!(matches!(result, Err(HotswapError::EvaluationError(_))));
    }

    #[test]
    fn test_find_references_to() {
        let eval = evaluator(
            json!({
                "Resources": {
                    "TaskDef": { "Type": "AWS::ECS::TaskDefinition" },
                    "Service": { "Type": "AWS::ECS::Service", "Properties": { "TaskDefinition": { "Ref": "TaskDef" } } },
                    "Rule": { "Type": "AWS::Events::Rule", "Properties": { "Targets": [{ "Arn": { "Fn::GetAtt": ["TaskDef", "Arn"] } }] } },
                    "Queue": { "Type": "AWS::SQS::Queue" }
                }
            }),
            vec![],
        );

        let mut refs = eval.find_references_to("TaskDef");
        refs.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
        assert_eq!(
            refs,
            vec![
                ResourceReference { logical_id: "Rule".to_string(), resource_type: "AWS::Events::Rule".to_string() },
                ResourceReference { logical_id: "Service".to_string(), resource_type: "AWS::ECS::Service".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_establish_resource_physical_name() {
        let eval = evaluator(
            json!({}),
            vec![summary("TaskDef", "AWS::ECS::TaskDefinition", "arn:aws:ecs:us-east-1:123:task-definition/fam:2")],
        );

        let declared = eval
            .establish_resource_physical_name("TaskDef", Some(&json!({ "Fn::Join": ["-", ["app", { "Ref": "Stage" }]] })))
            .await
            .unwrap();
        assert_eq!(declared.as_deref(), Some("app-dev"));

        let unresolvable = eval
            .establish_resource_physical_name("TaskDef", Some(&json!({ "Fn::ImportValue": "x" })))
            .await
            .unwrap();
        assert_eq!(unresolvable.as_deref(), Some("arn:aws:ecs:us-east-1:123:task-definition/fam:2"));

        let undeclared = eval.establish_resource_physical_name("Other", None).await.unwrap();
        assert!(undeclared.is_none());
    }

    #[tokio::test]
    async fn test_nested_evaluator_uses_its_own_stack() {
        let parent = evaluator(json!({}), vec![summary("Bucket", "AWS::S3::Bucket", "parent-bucket")]);
        let nested = parent.create_nested(
            "parent-Child-ABC",
            Template::new(json!({ "Resources": {} })),
            HashMap::from([("Image".to_string(), "nginx:2".to_string())]),
            Arc::new(vec![summary("Queue", "AWS::SQS::Queue", "child-queue")]),
        );

        assert_eq!(resolve(&nested, json!({ "Ref": "AWS::StackName" })).await, "parent-Child-ABC");
        assert_eq!(resolve(&nested, json!({ "Ref": "AWS::URLSuffix" })).await, "amazonaws.com");
        assert_eq!(resolve(&nested, json!({ "Ref": "Image" })).await, "nginx:2");
        assert_eq!(resolve(&nested, json!({ "Ref": "Queue" })).await, "child-queue");

        let parent_only = nested.evaluate_cfn_expression(&json!({ "Ref": "Bucket" })).await.unwrap();
        assert!(matches!(parent_only, Evaluated::Unresolvable(_)));
        let parent_param = nested.evaluate_cfn_expression(&json!({ "Ref": "Stage" })).await.unwrap();
        assert!(matches!(parent_param, Evaluated::Unresolvable(_)));
    }
}
