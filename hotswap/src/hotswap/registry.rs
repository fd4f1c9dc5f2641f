//! Detector registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::HotswapError;
use crate::evaluate::EvaluateCloudFormationTemplate;
use crate::hotswap::common::{ChangeCandidate, ChangeResult};
use crate::hotswap::ecs_services::{EcsServiceDetector, TASK_DEFINITION_TYPE};
use crate::hotswap::waiter;

/// Decides whether a changed resource can be hotswapped
#[async_trait]
pub trait HotswapDetector: Send + Sync {
    /// Verdicts for one candidate; empty when the detector does not apply
    async fn detect(
        &self,
        change: &ChangeCandidate,
        evaluate: &EvaluateCloudFormationTemplate,
    ) -> Result<Vec<ChangeResult>, HotswapError>;
}

/// Maps a resource type to the detectors that handle it
#[derive(Default, Clone)]
pub struct DetectorRegistry {
    detectors: HashMap<String, Vec<Arc<dyn HotswapDetector>>>,
}

impl DetectorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in detector
    pub fn with_builtin_detectors(waiter_options: waiter::Options) -> Self {
        let mut registry = Self::new();
        registry.register(
            TASK_DEFINITION_TYPE,
            Arc::new(EcsServiceDetector::new(waiter_options)),
        );
        registry
    }

    /// Add a detector for a resource type
    pub fn register(&mut self, resource_type: impl Into<String>, detector: Arc<dyn HotswapDetector>) {
        self.detectors
            .entry(resource_type.into())
            .or_default()
            .push(detector);
    }

    /// Detectors for a resource type, if any
    pub fn detectors_for(&self, resource_type: &str) -> &[Arc<dyn HotswapDetector>] {
        self.detectors
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
