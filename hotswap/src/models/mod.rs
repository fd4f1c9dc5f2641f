//! Data models

pub mod template;
