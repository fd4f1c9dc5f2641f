//! Hotswap engine

pub mod common;
pub mod deployments;
pub mod diff;
pub mod ecs_services;
pub mod keys;
pub mod nested_stacks;
pub mod registry;
pub mod waiter;

pub use deployments::{try_hotswap_deployment, HotswapMode, HotswapOutcome};
pub use nested_stacks::{read_current_template_with_nested_stacks, CurrentTemplate, NestedStack, NestedStackNames};
pub use registry::{DetectorRegistry, HotswapDetector};
