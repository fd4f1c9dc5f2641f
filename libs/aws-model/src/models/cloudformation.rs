//! CloudFormation API models

use serde::{Deserialize, Serialize};

/// One resource of a deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackResourceSummary {
    pub logical_resource_id: String,

    #[serde(default)]
    pub physical_resource_id: Option<String>,

    pub resource_type: String,

    #[serde(default)]
    pub resource_status: Option<String>,
}

/// One page of stack resources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListStackResourcesResult {
    #[serde(default)]
    pub stack_resource_summaries: Option<Vec<StackResourceSummary>>,

    #[serde(default)]
    pub next_token: Option<String>,
}
