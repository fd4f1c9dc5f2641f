//! CloudFormation hotswap engine
//!
//! Applies template changes to ECS task definitions and services through
//! direct control-plane calls instead of a full stack deployment.

pub mod aws;
pub mod errors;
pub mod evaluate;
pub mod hotswap;
pub mod logs;
pub mod models;
pub mod settings;
pub mod utils;
