//! Schema classification: what a topic type declares about its children.

use crate::error::LookupError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Simple,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Exclusive ownership: a child has at most one composition parent.
    Composition,
    /// Shared reference: a child may be linked from many parents.
    Aggregation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDef {
    pub type_uri: String,
    pub relation: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub uri: String,
    pub data_kind: DataKind,
    #[serde(default)]
    pub children: Vec<ChildDef>,
}

impl TypeDefinition {
    pub fn simple(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            data_kind: DataKind::Simple,
            children: Vec::new(),
        }
    }

    pub fn composite(uri: impl Into<String>, children: Vec<ChildDef>) -> Self {
        Self {
            uri: uri.into(),
            data_kind: DataKind::Composite,
            children,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.data_kind == DataKind::Composite
    }

    fn children_of(&self, relation: RelationKind) -> Vec<String> {
        self.children
            .iter()
            .filter(|c| c.relation == relation)
            .map(|c| c.type_uri.clone())
            .collect()
    }

    pub fn composition_children(&self) -> Vec<String> {
        self.children_of(RelationKind::Composition)
    }

    pub fn aggregation_children(&self) -> Vec<String> {
        self.children_of(RelationKind::Aggregation)
    }

    /// How `child_type_uri` hangs off this type, if it is a declared child.
    pub fn relation_of(&self, child_type_uri: &str) -> Option<RelationKind> {
        self.children
            .iter()
            .find(|c| c.type_uri == child_type_uri)
            .map(|c| c.relation)
    }
}

impl ChildDef {
    pub fn composition(type_uri: impl Into<String>) -> Self {
        Self {
            type_uri: type_uri.into(),
            relation: RelationKind::Composition,
        }
    }

    pub fn aggregation(type_uri: impl Into<String>) -> Self {
        Self {
            type_uri: type_uri.into(),
            relation: RelationKind::Aggregation,
        }
    }
}

/// Answers "what is this topic type made of".
///
/// Any error is fatal for the resolution run that asked.
pub trait SchemaClassifier {
    fn classify(&self, type_uri: &str) -> Result<TypeDefinition, LookupError>;
}
