//! CloudFormation template models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A CloudFormation template document
///
/// Templates are kept as raw JSON; only the `Resources` section is
/// interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(Value);

impl Template {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    /// All resources declared by the template, keyed by logical ID
    pub fn resources(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .get("Resources")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|resources| resources.iter())
    }

    /// A single resource definition
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.0.get("Resources").and_then(|r| r.get(logical_id))
    }
}

/// `Type` of a resource definition
pub fn resource_type(definition: &Value) -> Option<&str> {
    definition.get("Type").and_then(Value::as_str)
}

/// `Properties` of a resource definition
pub fn resource_properties(definition: &Value) -> Option<&Map<String, Value>> {
    definition.get("Properties").and_then(Value::as_object)
}

/// A template resource that references another resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    #[serde(rename = "LogicalId")]
    pub logical_id: String,

    #[serde(rename = "Type")]
    pub resource_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_resources() {
        let template = Template::new(json!({
            "Resources": {
                "TaskDef": { "Type": "AWS::ECS::TaskDefinition", "Properties": { "Cpu": "256" } },
                "Queue": { "Type": "AWS::SQS::Queue" }
            }
        }));

        assert_eq!(template.resources().count(), 2);
        let task_def = template.resource("TaskDef").unwrap();
        assert_eq!(resource_type(task_def), Some("AWS::ECS::TaskDefinition"));
        assert_eq!(resource_properties(task_def).unwrap()["Cpu"], "256");
        assert!(resource_properties(template.resource("Queue").unwrap()).is_none());
    }

    #[test]
    fn test_template_without_resources() {
        let template = Template::new(json!({ "Outputs": {} }));
        assert_eq!(template.resources().count(), 0);
        assert!(template.resource("Anything").is_none());
    }
}
