//! AWS control-plane wire models
//!
//! Request and response shapes for the handful of ECS and CloudFormation
//! operations the hotswap engine issues.

pub mod models;
