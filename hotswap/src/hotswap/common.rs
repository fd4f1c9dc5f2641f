//! Types shared by every hotswap detector

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::aws::AwsClients;
use crate::errors::HotswapError;

/// Old and new value of one top-level property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropDiff {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// A changed resource that a detector may be able to hotswap
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCandidate {
    pub logical_id: String,
    pub resource_type: String,
    pub old_properties: Map<String, Value>,
    pub new_properties: Map<String, Value>,
    property_updates: BTreeMap<String, PropDiff>,
}

impl ChangeCandidate {
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        old_properties: Map<String, Value>,
        new_properties: Map<String, Value>,
    ) -> Self {
        let mut property_updates = BTreeMap::new();
        for name in old_properties.keys().chain(new_properties.keys()) {
            if property_updates.contains_key(name) {
                continue;
            }
            let old_value = old_properties.get(name);
            let new_value = new_properties.get(name);
            if old_value != new_value {
                property_updates.insert(
                    name.clone(),
                    PropDiff {
                        old_value: old_value.cloned(),
                        new_value: new_value.cloned(),
                    },
                );
            }
        }

        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            old_properties,
            new_properties,
            property_updates,
        }
    }

    /// Top-level properties whose value differs between old and new
    pub fn property_updates(&self) -> &BTreeMap<String, PropDiff> {
        &self.property_updates
    }
}

/// Property changes split by whether they can be hotswapped
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedChanges {
    logical_id: String,
    resource_type: String,
    pub hotswappable_props: BTreeMap<String, PropDiff>,
    pub non_hotswappable_props: BTreeMap<String, PropDiff>,
}

/// Split the candidate's changed properties against an allow-list
pub fn classify_changes(change: &ChangeCandidate, hotswappable_prop_names: &[&str]) -> ClassifiedChanges {
    let mut hotswappable_props = BTreeMap::new();
    let mut non_hotswappable_props = BTreeMap::new();

    for (name, diff) in change.property_updates() {
        if hotswappable_prop_names.contains(&name.as_str()) {
            hotswappable_props.insert(name.clone(), diff.clone());
        } else {
            non_hotswappable_props.insert(name.clone(), diff.clone());
        }
    }

    ClassifiedChanges {
        logical_id: change.logical_id.clone(),
        resource_type: change.resource_type.clone(),
        hotswappable_props,
        non_hotswappable_props,
    }
}

impl ClassifiedChanges {
    /// Names of the hotswappable properties that changed
    pub fn hotswappable_prop_names(&self) -> Vec<String> {
        self.hotswappable_props.keys().cloned().collect()
    }

    /// Add one rejection per property that cannot be hotswapped
    pub fn report_non_hotswappable_property_changes(&self, ret: &mut Vec<ChangeResult>) {
        for name in self.non_hotswappable_props.keys() {
            // tag changes alone never need a full deployment to be noticed
            let is_tags = name == "Tags";
            ret.push(ChangeResult::NonHotswappable(NonHotswappableChange {
                resource_type: self.resource_type.clone(),
                logical_id: self.logical_id.clone(),
                rejected_property: Some(name.clone()),
                reason: if is_tags {
                    "Tags are not hotswappable".to_string()
                } else {
                    format!("Property '{}' is not hotswappable", name)
                },
                hotswap_only_visible: !is_tags,
            }));
        }
    }
}

/// A change that requires a full CloudFormation deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonHotswappableChange {
    pub resource_type: String,
    pub logical_id: String,
    pub rejected_property: Option<String>,
    pub reason: String,

    /// Whether the rejection is worth showing when non-hotswappable changes
    /// are being skipped rather than deployed
    pub hotswap_only_visible: bool,
}

impl NonHotswappableChange {
    pub fn new(change: &ChangeCandidate, reason: impl Into<String>, hotswap_only_visible: bool) -> Self {
        Self {
            resource_type: change.resource_type.clone(),
            logical_id: change.logical_id.clone(),
            rejected_property: None,
            reason: reason.into(),
            hotswap_only_visible,
        }
    }
}

impl fmt::Display for NonHotswappableChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rejected_property {
            Some(prop) => write!(
                f,
                "{} '{}' ({}): {}",
                self.resource_type, self.logical_id, prop, self.reason
            ),
            None => write!(f, "{} '{}': {}", self.resource_type, self.logical_id, self.reason),
        }
    }
}

/// Deferred update issued against the control plane
pub type ApplyFn =
    Box<dyn FnOnce(Arc<AwsClients>) -> BoxFuture<'static, Result<(), HotswapError>> + Send>;

/// A change that can be applied by direct control-plane calls
pub struct HotswapOperation {
    pub resource_type: String,
    pub props_changed: Vec<String>,

    /// Short service tag, e.g. `ecs-service`
    pub service: &'static str,

    /// Human readable names of everything the operation touches
    pub resource_names: Vec<String>,

    pub apply: ApplyFn,
}

impl fmt::Debug for HotswapOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotswapOperation")
            .field("resource_type", &self.resource_type)
            .field("props_changed", &self.props_changed)
            .field("service", &self.service)
            .field("resource_names", &self.resource_names)
            .finish_non_exhaustive()
    }
}

/// One detector verdict
#[derive(Debug)]
pub enum ChangeResult {
    Hotswappable(HotswapOperation),
    NonHotswappable(NonHotswappableChange),
}

impl ChangeResult {
    pub fn is_hotswappable(&self) -> bool {
        matches!(self, ChangeResult::Hotswappable(_))
    }
}

/// Structural equality; a non-object only equals an identical non-object
pub fn deep_compare_object(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter().all(|(key, lv)| r.get(key).is_some_and(|rv| deep_compare_object(lv, rv)))
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(lv, rv)| deep_compare_object(lv, rv))
        }
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
        (l, r) => l == r,
    }
}

/// `ContainerDefinitions` -> `containerDefinitions`
pub fn lower_case_first_character(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
