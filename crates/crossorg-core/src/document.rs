//! Exported configuration documents
//!
//! An exported document is a JSON object with a `resource` section
//! (`resource.<type>.<label>` -> attribute tree) and an optional `output`
//! section. Documents are cloned per target and never mutated in place by
//! the resolver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Top-level key holding resources
pub const RESOURCE_SECTION: &str = "resource";

/// Top-level key holding outputs
pub const OUTPUT_SECTION: &str = "output";

/// Errors building or addressing a document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Root is not a JSON object
    #[error("exported document root must be an object, got {0}")]
    NotAnObject(&'static str),

    /// JSON encode/decode failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource type has zero or several labels
    #[error("expected exactly one '{resource_type}' resource in export, found {found}")]
    AmbiguousResource {
        resource_type: String,
        found: usize,
    },

    /// Text-level rewrite could not be performed
    #[error("failed to rewrite document: {0}")]
    Rewrite(String),

    /// Malformed `type.label` address
    #[error("invalid resource path: '{0}'")]
    InvalidPath(String),
}

/// Fully qualified resource address: `<type>.<label>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    /// Resource type
    pub resource_type: String,
    /// Resource label inside the document
    pub label: String,
}

impl ResourcePath {
    /// Create path from parts
    #[inline]
    #[must_use]
    pub fn new(resource_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            label: label.into(),
        }
    }

    /// Expression for the resource's id attribute
    #[must_use]
    pub fn id_expression(&self) -> String {
        format!("${{{self}.id}}")
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.label)
    }
}

impl FromStr for ResourcePath {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((ty, label)) if !ty.is_empty() && !label.is_empty() => Ok(Self::new(ty, label)),
            _ => Err(DocumentError::InvalidPath(s.to_string())),
        }
    }
}

/// Configuration exported from the source org
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ExportedConfig(Map<String, Value>);

impl ExportedConfig {
    /// Wrap a JSON value, requiring an object root
    ///
    /// # Errors
    /// `DocumentError::NotAnObject` for any other root.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DocumentError::NotAnObject(json_kind(&other))),
        }
    }

    /// Parse from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    /// Parse from a JSON string
    pub fn from_json_str(s: &str) -> Result<Self, DocumentError> {
        Self::from_value(serde_json::from_str(s)?)
    }

    /// Serialize to compact JSON
    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Serialize to indented JSON bytes
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(serde_json::to_vec_pretty(&self.0)?)
    }

    /// Top-level sections
    #[inline]
    #[must_use]
    pub fn sections(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Labels declared for a resource type
    #[must_use]
    pub fn resource_labels(&self, resource_type: &str) -> Vec<&str> {
        self.0
            .get(RESOURCE_SECTION)
            .and_then(|r| r.get(resource_type))
            .and_then(Value::as_object)
            .map(|labels| labels.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Locate the single resource of `resource_type`
    ///
    /// # Errors
    /// `DocumentError::AmbiguousResource` unless exactly one label exists.
    pub fn resource_path(&self, resource_type: &str) -> Result<ResourcePath, DocumentError> {
        match self.resource_labels(resource_type).as_slice() {
            [label] => Ok(ResourcePath::new(resource_type, *label)),
            labels => Err(DocumentError::AmbiguousResource {
                resource_type: resource_type.to_string(),
                found: labels.len(),
            }),
        }
    }

    /// Attribute tree of an addressed resource
    #[must_use]
    pub fn resource_attributes(&self, path: &ResourcePath) -> Option<&Value> {
        self.0
            .get(RESOURCE_SECTION)?
            .get(&path.resource_type)?
            .get(&path.label)
    }

    /// Output section, if any
    #[inline]
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.0.get(OUTPUT_SECTION)
    }

    /// Detach the output section
    pub fn take_output(&mut self) -> Option<Value> {
        self.0.remove(OUTPUT_SECTION)
    }

    /// Put back a previously detached output section
    pub fn restore_output(&mut self, output: Option<Value>) {
        if let Some(output) = output {
            self.0.insert(OUTPUT_SECTION.to_string(), output);
        }
    }

    /// Insert one output declaration, keeping any others
    ///
    /// A non-object output section is replaced. Returns the declaration
    /// previously stored under `key`.
    pub fn insert_output(&mut self, key: impl Into<String>, declaration: Value) -> Option<Value> {
        let mut outputs = match self.0.remove(OUTPUT_SECTION) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let previous = outputs.insert(key.into(), declaration);
        self.0
            .insert(OUTPUT_SECTION.to_string(), Value::Object(outputs));
        previous
    }
}

impl TryFrom<Value> for ExportedConfig {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<ExportedConfig> for Value {
    fn from(config: ExportedConfig) -> Self {
        Value::Object(config.0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ExportedConfig {
        ExportedConfig::from_value(json!({
            "resource": {
                "routing_queue": {
                    "support": { "name": "Support", "skill_id": "x" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_single_resource_path() {
        let path = sample().resource_path("routing_queue").unwrap();
        assert_eq!(path.to_string(), "routing_queue.support");
        assert_eq!(path.id_expression(), "${routing_queue.support.id}");
    }

    #[test]
    fn missing_type_is_ambiguous_zero() {
        let err = sample().resource_path("routing_skill").unwrap_err();
        assert!(matches!(err, DocumentError::AmbiguousResource { found: 0, .. }));
    }

    #[test]
    fn several_labels_are_rejected() {
        let config = ExportedConfig::from_value(json!({
            "resource": { "routing_queue": { "a": {}, "b": {} } }
        }))
        .unwrap();
        let err = config.resource_path("routing_queue").unwrap_err();
        assert!(matches!(err, DocumentError::AmbiguousResource { found: 2, .. }));
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(matches!(
            ExportedConfig::from_value(json!([1, 2])),
            Err(DocumentError::NotAnObject("array"))
        ));
        assert!(ExportedConfig::from_json_str("\"x\"").is_err());
    }

    #[test]
    fn output_take_and_restore() {
        let mut config = sample();
        config.insert_output("k", json!({"value": "v"}));

        let output = config.take_output();
        assert!(config.output().is_none());

        config.restore_output(output);
        assert_eq!(config.output().unwrap()["k"]["value"], "v");
    }

    #[test]
    fn resource_path_from_str() {
        let path: ResourcePath = "routing_queue.support".parse().unwrap();
        assert_eq!(path, ResourcePath::new("routing_queue", "support"));
        assert!("routing_queue".parse::<ResourcePath>().is_err());
        assert!(".x".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn deserializes_through_serde() {
        let config: ExportedConfig = serde_json::from_str(r#"{"resource":{}}"#).unwrap();
        assert!(config.sections().contains_key("resource"));
        assert!(serde_json::from_str::<ExportedConfig>("3").is_err());
    }
}
