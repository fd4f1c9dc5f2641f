//! Template-to-API key transformation

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Shape of a payload, marking the maps whose keys are user data
///
/// A `Schema` node maps property names to the shape of their values; any
/// property it does not mention is a plain schema property. An `Opaque` node
/// is a map with arbitrary user keys (Docker labels, driver options) that
/// must be copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyShape {
    #[default]
    Plain,
    Schema(BTreeMap<String, KeyShape>),
    Opaque,
}

static PLAIN: KeyShape = KeyShape::Plain;

impl KeyShape {
    /// Build a schema node from `(name, shape)` pairs
    pub fn schema<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, KeyShape)>,
        S: Into<String>,
    {
        KeyShape::Schema(
            children
                .into_iter()
                .map(|(name, shape)| (name.into(), shape))
                .collect(),
        )
    }

    fn child(&self, key: &str) -> &KeyShape {
        match self {
            KeyShape::Schema(children) => children.get(key).unwrap_or(&PLAIN),
            KeyShape::Plain | KeyShape::Opaque => &PLAIN,
        }
    }
}

/// Rewrite every object key with `transform`, except inside opaque maps
///
/// Arrays pass their shape to each element. The key of an opaque map is
/// itself a schema key and is transformed; its contents are not.
pub fn transform_object_keys<F>(value: &Value, transform: &F, shape: &KeyShape) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| transform_object_keys(item, transform, shape))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let child_shape = shape.child(key);
                let transformed = match child_shape {
                    KeyShape::Opaque => child.clone(),
                    _ => transform_object_keys(child, transform, child_shape),
                };
                out.insert(transform(key), transformed);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Opaque maps of an `AWS::ECS::TaskDefinition` registration request
pub fn task_definition_key_shape() -> KeyShape {
    KeyShape::schema([
        (
            "ContainerDefinitions",
            KeyShape::schema([
                ("DockerLabels", KeyShape::Opaque),
                (
                    "FirelensConfiguration",
                    KeyShape::schema([("Options", KeyShape::Opaque)]),
                ),
                (
                    "LogConfiguration",
                    KeyShape::schema([("Options", KeyShape::Opaque)]),
                ),
            ]),
        ),
        (
            "Volumes",
            KeyShape::schema([(
                "DockerVolumeConfiguration",
                KeyShape::schema([
                    ("DriverOpts", KeyShape::Opaque),
                    ("Labels", KeyShape::Opaque),
                ]),
            )]),
        ),
    ])
}
