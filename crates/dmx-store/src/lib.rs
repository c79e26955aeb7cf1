//! Snapshot-backed topic store
//!
//! Serves the three lookups the resolution engine needs from an exported JSON
//! snapshot of a topic-graph store:
//!
//! ```text
//! snapshot.json ──► SnapshotStore ──┬── SchemaClassifier  (topic_types)
//!                                   ├── TopicIndex        (topics, by type)
//!                                   └── ConflictDetector  (associations, workspaces)
//! ```
//!
//! The snapshot is validated once at load time; lookups afterwards are pure
//! reads.

pub mod snapshot;


use dmx_core::{
    ConflictDetector, ExistingTopic, LookupError, SchemaClassifier, TopicId, TopicIndex,
    TopicProvenance, TypeDefinition,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

pub use snapshot::{AssociationRecord, Snapshot, TopicRecord, TopicTypeRecord, WorkspaceRecord};

/// Association type that marks exclusive parent/child ownership.
pub const COMPOSITION_ASSOC: &str = "dm4.core.composition";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("topic type `{0}` is defined more than once")]
    DuplicateType(String),

    #[error("topic id {0} is used more than once")]
    DuplicateTopic(TopicId),

    #[error("association {association} refers to missing topic {topic}")]
    DanglingAssociation { association: TopicId, topic: TopicId },

    #[error("topic {0} has a non-scalar value")]
    NonScalarValue(TopicId),
}

// ============================================================================
// Store
// ============================================================================

/// A stored topic with its value flattened to comparison text.
#[derive(Debug, Clone)]
struct StoredTopic {
    record: TopicRecord,
    value: String,
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    types: HashMap<String, TypeDefinition>,
    topics: BTreeMap<TopicId, StoredTopic>,
    by_type: HashMap<String, Vec<TopicId>>,
    associations: Vec<AssociationRecord>,
    composed: HashSet<TopicId>,
    workspaces: HashMap<TopicId, WorkspaceRecord>,
}

impl SnapshotStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::from_json_str(&text)?;
        debug!(path = %path.display(), topics = store.topics.len(), "loaded snapshot");
        Ok(store)
    }

    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        Self::from_snapshot(serde_json::from_str(text)?)
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut store = SnapshotStore::default();

        for record in snapshot.topic_types {
            let definition = record.into_definition();
            if store.types.contains_key(&definition.uri) {
                return Err(StoreError::DuplicateType(definition.uri));
            }
            store.types.insert(definition.uri.clone(), definition);
        }

        for record in snapshot.topics {
            let id = record.id;
            if store.topics.contains_key(&id) {
                return Err(StoreError::DuplicateTopic(id));
            }
            let value =
                snapshot::scalar_text(&record.value).ok_or(StoreError::NonScalarValue(id))?;
            if !store.types.contains_key(&record.type_uri) {
                warn!(topic_id = id, type_uri = %record.type_uri, "topic has an undeclared type");
            }
            store.by_type.entry(record.type_uri.clone()).or_default().push(id);
            store.topics.insert(id, StoredTopic { record, value });
        }
        for ids in store.by_type.values_mut() {
            ids.sort_unstable();
        }

        for association in snapshot.associations {
            for topic in [association.parent, association.child] {
                if !store.topics.contains_key(&topic) {
                    return Err(StoreError::DanglingAssociation {
                        association: association.id,
                        topic,
                    });
                }
            }
            if association.type_uri == COMPOSITION_ASSOC {
                store.composed.insert(association.child);
            }
            store.associations.push(association);
        }

        store.workspaces = snapshot
            .workspaces
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        Ok(store)
    }

    pub fn type_definition(&self, type_uri: &str) -> Option<&TypeDefinition> {
        self.types.get(type_uri)
    }

    /// Topics of a type in ascending id order; empty for unknown types.
    pub fn topics_of_type(&self, type_uri: &str) -> Vec<ExistingTopic> {
        self.by_type
            .get(type_uri)
            .into_iter()
            .flatten()
            .filter_map(|id| self.topics.get(id))
            .map(|t| {
                ExistingTopic::new(t.record.id, t.value.clone())
                    .with_children(t.record.children.clone())
            })
            .collect()
    }

    /// Associations that have `topic_id` on either end.
    pub fn related(&self, topic_id: TopicId) -> Result<Vec<&AssociationRecord>, LookupError> {
        if !self.topics.contains_key(&topic_id) {
            return Err(LookupError::UnknownTopic(topic_id));
        }
        Ok(self
            .associations
            .iter()
            .filter(|a| a.parent == topic_id || a.child == topic_id)
            .collect())
    }

    pub fn topic(&self, topic_id: TopicId) -> Option<&TopicRecord> {
        self.topics.get(&topic_id).map(|t| &t.record)
    }

    /// The topic's value as comparison text.
    pub fn value_of(&self, topic_id: TopicId) -> Option<&str> {
        self.topics.get(&topic_id).map(|t| t.value.as_str())
    }
}

impl SchemaClassifier for SnapshotStore {
    fn classify(&self, type_uri: &str) -> Result<TypeDefinition, LookupError> {
        self.types
            .get(type_uri)
            .cloned()
            .ok_or_else(|| LookupError::UnknownType(type_uri.to_string()))
    }
}

impl TopicIndex for SnapshotStore {
    fn find_by_type(&self, type_uri: &str) -> Result<Vec<ExistingTopic>, LookupError> {
        if !self.types.contains_key(type_uri) {
            return Err(LookupError::UnknownType(type_uri.to_string()));
        }
        Ok(self.topics_of_type(type_uri))
    }
}

impl ConflictDetector for SnapshotStore {
    fn has_composition_link(&self, topic_id: TopicId) -> Result<bool, LookupError> {
        if !self.topics.contains_key(&topic_id) {
            return Err(LookupError::UnknownTopic(topic_id));
        }
        Ok(self.composed.contains(&topic_id))
    }

    fn provenance(&self, topic_id: TopicId) -> Result<Option<TopicProvenance>, LookupError> {
        let topic = self
            .topics
            .get(&topic_id)
            .ok_or(LookupError::UnknownTopic(topic_id))?;
        let record = &topic.record;
        let workspace_owner = record
            .workspace_id
            .and_then(|id| self.workspaces.get(&id))
            .and_then(|w| w.owner.clone());
        Ok(Some(TopicProvenance {
            creator: record.creator.clone(),
            modifier: record.modifier.clone(),
            workspace_id: record.workspace_id,
            workspace_owner,
        }))
    }
}
