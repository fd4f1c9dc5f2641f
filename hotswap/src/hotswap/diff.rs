//! Resource-level template diff

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::models::template::{resource_properties, resource_type, Template};

/// How one resource differs between the deployed and the new template
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDifference {
    pub logical_id: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,

    /// Deployed logical ID when the resource was renamed
    pub renamed_from: Option<String>,
}

impl ResourceDifference {
    pub fn new(logical_id: impl Into<String>, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        Self {
            logical_id: logical_id.into(),
            old_value,
            new_value,
            renamed_from: None,
        }
    }

    pub fn is_rename(&self) -> bool {
        self.renamed_from.is_some()
    }

    pub fn is_addition(&self) -> bool {
        self.old_value.is_none() && self.new_value.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.old_value.is_some() && self.new_value.is_none()
    }

    pub fn old_type(&self) -> Option<&str> {
        self.old_value.as_ref().and_then(resource_type)
    }

    pub fn new_type(&self) -> Option<&str> {
        self.new_value.as_ref().and_then(resource_type)
    }

    pub fn old_properties(&self) -> Map<String, Value> {
        properties_of(self.old_value.as_ref())
    }

    pub fn new_properties(&self) -> Map<String, Value> {
        properties_of(self.new_value.as_ref())
    }

    /// Top-level attributes other than `Type`, `Properties` and `Metadata`
    /// that changed (`DependsOn`, `Condition`, `DeletionPolicy`, ...)
    pub fn other_changes(&self) -> Vec<String> {
        let empty = Map::new();
        let old = self.old_value.as_ref().and_then(Value::as_object).unwrap_or(&empty);
        let new = self.new_value.as_ref().and_then(Value::as_object).unwrap_or(&empty);

        let mut changed: Vec<String> = old
            .keys()
            .chain(new.keys().filter(|k| !old.contains_key(*k)))
            .filter(|k| !matches!(k.as_str(), "Type" | "Properties" | "Metadata"))
            .filter(|k| old.get(*k) != new.get(*k))
            .cloned()
            .collect();
        changed.sort();
        changed
    }
}

fn properties_of(definition: Option<&Value>) -> Map<String, Value> {
    definition
        .and_then(resource_properties)
        .cloned()
        .unwrap_or_default()
}

/// Resources that differ between two templates
///
/// An addition whose type and properties equal those of a removal is a
/// logical ID rename; the pair collapses into one difference keyed by the
/// new ID.
pub fn diff_templates(deployed: &Template, new: &Template) -> Vec<ResourceDifference> {
    let mut removals: BTreeMap<String, ResourceDifference> = BTreeMap::new();
    let mut others: BTreeMap<String, ResourceDifference> = BTreeMap::new();

    for (logical_id, old_value) in deployed.resources() {
        match new.resource(logical_id) {
            None => {
                removals.insert(
                    logical_id.clone(),
                    ResourceDifference::new(logical_id, Some(old_value.clone()), None),
                );
            }
            Some(new_value) if new_value != old_value => {
                others.insert(
                    logical_id.clone(),
                    ResourceDifference::new(
                        logical_id,
                        Some(old_value.clone()),
                        Some(new_value.clone()),
                    ),
                );
            }
            Some(_) => {}
        }
    }

    for (logical_id, new_value) in new.resources() {
        if deployed.resource(logical_id).is_none() {
            others.insert(
                logical_id.clone(),
                ResourceDifference::new(logical_id, None, Some(new_value.clone())),
            );
        }
    }

    for addition in others.values_mut().filter(|d| d.is_addition()) {
        let renamed_from = removals
            .iter()
            .find(|(_, removal)| same_resource(removal, addition))
            .map(|(id, _)| id.clone());
        if let Some(removal) = renamed_from.and_then(|id| removals.remove(&id)) {
            addition.old_value = removal.old_value;
            addition.renamed_from = Some(removal.logical_id);
        }
    }

    removals.into_values().chain(others.into_values()).collect()
}

fn same_resource(removal: &ResourceDifference, addition: &ResourceDifference) -> bool {
    removal.old_type() == addition.new_type() && removal.old_properties() == addition.new_properties()
}
