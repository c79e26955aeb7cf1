//! Read-side lookups against the topic-graph store.

use crate::error::LookupError;
use serde::{Deserialize, Serialize};

/// Store-assigned topic identifier.
pub type TopicId = u64;

/// A topic already present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingTopic {
    pub id: TopicId,
    /// The topic's value; for composites this is the label built from its children.
    pub value: String,
    /// Values of the topic's direct children, when the store reports them.
    #[serde(default)]
    pub children: Vec<String>,
}

impl ExistingTopic {
    pub fn new(id: TopicId, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }
}

/// Who made a topic and where it lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicProvenance {
    pub creator: Option<String>,
    pub modifier: Option<String>,
    pub workspace_id: Option<TopicId>,
    pub workspace_owner: Option<String>,
}

/// All existing topics of a type, in the store's index order.
///
/// The same value may appear under several ids.
pub trait TopicIndex {
    fn find_by_type(&self, type_uri: &str) -> Result<Vec<ExistingTopic>, LookupError>;
}

/// Reports whether a topic already plays the child role of some composition.
pub trait ConflictDetector {
    fn has_composition_link(&self, topic_id: TopicId) -> Result<bool, LookupError>;

    fn provenance(&self, _topic_id: TopicId) -> Result<Option<TopicProvenance>, LookupError> {
        Ok(None)
    }
}
