//! API models

pub mod cloudformation;
pub mod ecs;
