//! Template evaluation

pub mod stack_resources;
pub mod template;

use serde_json::Value;

pub use stack_resources::{LazyListStackResources, ListStackResources};
pub use template::{EvaluateCloudFormationTemplate, EvaluateOptions};

/// Outcome of evaluating a CloudFormation expression
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    /// The expression has a concrete value
    Resolved(Value),

    /// The expression contains something only known after deployment
    /// (an output of another stack, an unsupported function, a resource
    /// that does not exist yet)
    Unresolvable(String),
}
