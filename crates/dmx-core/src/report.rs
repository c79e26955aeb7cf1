//! What a resolution run found and did.

use crate::store::{TopicId, TopicProvenance};
use serde::{Deserialize, Serialize};

/// Non-fatal findings. Resolution always continues past these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A reuse candidate is already composed elsewhere; it was not reused.
    CompositionConflict {
        type_uri: String,
        topic_id: TopicId,
        value: String,
    },
    /// Several existing topics qualified for one slot.
    AmbiguousMatch {
        type_uri: String,
        candidates: Vec<TopicId>,
        chosen: Option<TopicId>,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::CompositionConflict {
                type_uri,
                topic_id,
                value,
            } => write!(
                f,
                "topic {topic_id} ({type_uri} = {value:?}) is already composed elsewhere"
            ),
            Warning::AmbiguousMatch {
                type_uri,
                candidates,
                chosen,
            } => match chosen {
                Some(id) => write!(
                    f,
                    "{} existing {type_uri} topics match {candidates:?}; using {id}",
                    candidates.len()
                ),
                None => write!(
                    f,
                    "{} existing {type_uri} topics match {candidates:?}; none chosen",
                    candidates.len()
                ),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub id: TopicId,
    pub composed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<TopicProvenance>,
}

/// Outcome of looking up one scalar leaf in the topic index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCheck {
    pub type_uri: String,
    pub value: String,
    /// Every existing topic with an equal value, in index order.
    pub candidates: Vec<CandidateInfo>,
    /// The candidate to reference, if any.
    pub chosen: Option<TopicId>,
}

impl LeafCheck {
    pub fn reusable(&self) -> impl Iterator<Item = TopicId> + '_ {
        self.candidates.iter().filter(|c| !c.composed).map(|c| c.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionKind {
    /// A scalar child replaced by a reference.
    Leaf,
    /// A whole composite collapsed to a reference.
    Composite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub path: String,
    pub type_uri: String,
    pub reference: String,
    pub kind: SubstitutionKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub leaf_checks: Vec<LeafCheck>,
    pub substitutions: Vec<Substitution>,
    pub warnings: Vec<Warning>,
}

impl ResolutionReport {
    pub(crate) fn warn(&mut self, warning: Warning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Warning> {
        self.warnings
            .iter()
            .filter(|w| matches!(w, Warning::CompositionConflict { .. }))
    }

    pub fn has_conflict_for(&self, topic_id: TopicId) -> bool {
        self.warnings.iter().any(|w| {
            matches!(w, Warning::CompositionConflict { topic_id: id, .. } if *id == topic_id)
        })
    }
}
