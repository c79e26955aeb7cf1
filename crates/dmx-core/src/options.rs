use serde::{Deserialize, Serialize};

/// Which candidate wins when more than one existing topic qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First qualifying candidate in index order.
    First,
    /// Last qualifying candidate in index order.
    Last,
    /// Leave the payload untouched and record an ambiguity warning.
    Reject,
}

impl TieBreak {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    /// Pick one of `candidates` (index order), or `None` when nothing
    /// qualifies or the policy refuses to choose.
    pub fn choose<T: Copy>(self, candidates: &[T]) -> Option<T> {
        match (self, candidates) {
            (_, []) => None,
            (_, [only]) => Some(*only),
            (Self::First, [first, ..]) => Some(*first),
            (Self::Last, [.., last]) => Some(*last),
            (Self::Reject, _) => None,
        }
    }
}

/// Knobs for a resolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Policy for leaves with several reusable topics of equal value.
    #[serde(default = "default_leaf_tie_break")]
    pub leaf_tie_break: TieBreak,
    /// Policy for composites with several exact child-set matches.
    #[serde(default = "default_aggregate_tie_break")]
    pub aggregate_tie_break: TieBreak,
    /// Fetch creator/modifier/workspace of leaf candidates.
    #[serde(default = "default_true")]
    pub inspect_provenance: bool,
}

fn default_leaf_tie_break() -> TieBreak {
    TieBreak::First
}

fn default_aggregate_tie_break() -> TieBreak {
    TieBreak::Last
}

fn default_true() -> bool {
    true
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            leaf_tie_break: default_leaf_tie_break(),
            aggregate_tie_break: default_aggregate_tie_break(),
            inspect_provenance: true,
        }
    }
}
