//! On-disk snapshot format.

use dmx_core::{ChildDef, DataKind, TopicId, TypeDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub topic_types: Vec<TopicTypeRecord>,
    #[serde(default)]
    pub topics: Vec<TopicRecord>,
    #[serde(default)]
    pub associations: Vec<AssociationRecord>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicTypeRecord {
    pub uri: String,
    pub data_type: DataKind,
    #[serde(default)]
    pub children: Vec<ChildDef>,
}

impl TopicTypeRecord {
    pub fn into_definition(self) -> TypeDefinition {
        TypeDefinition {
            uri: self.uri,
            data_kind: self.data_type,
            children: self.children,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRecord {
    pub id: TopicId,
    pub type_uri: String,
    #[serde(default)]
    pub value: Value,
    /// Values of the topic's direct children (composites only).
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<TopicId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub id: TopicId,
    pub type_uri: String,
    pub parent: TopicId,
    pub child: TopicId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: TopicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Comparison text of a stored value. `null` is the empty value.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
