//! DMX composite-reference resolution
//!
//! Before a newly composed topic is uploaded to the topic-graph store, its
//! payload is reconciled against what the store already holds, so that
//! aggregated children point at existing topics instead of duplicating them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       RESOLUTION PIPELINE                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  payload ──► Pass 1: classify ──► Pass 2: leaf check                 │
//! │                  │                     │                             │
//! │                  ▼                     ▼                             │
//! │           SchemaClassifier      TopicIndex + ConflictDetector        │
//! │                                                                      │
//! │          ──► Pass 3: reconcile aggregates (post-order)               │
//! │          ──► Pass 4: apply references ──► rewritten payload          │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Composition** children are owned by their parent and always created
//!   fresh; the engine never replaces them.
//! - **Aggregation** children are shared; wherever an existing topic with the
//!   same value (or the same full set of child values) exists and is not
//!   already composed elsewhere, the payload gets a `ref_id:<id>` instead.
//!
//! The three lookups are traits ([`SchemaClassifier`], [`TopicIndex`],
//! [`ConflictDetector`]) so the engine stays independent of transport.

pub mod engine;
pub mod error;
pub mod options;
pub mod payload;
pub mod report;
pub mod schema;
pub mod store;

mod context;

#[cfg(test)]
mod tests;

pub use engine::{Resolution, Resolver};
pub use error::{LookupError, ResolveError};
pub use options::{ResolveOptions, TieBreak};
pub use payload::{parse_payload, Mapping, PayloadNode, Scalar};
pub use report::{
    CandidateInfo, LeafCheck, ResolutionReport, Substitution, SubstitutionKind, Warning,
};
pub use schema::{ChildDef, DataKind, RelationKind, SchemaClassifier, TypeDefinition};
pub use store::{ConflictDetector, ExistingTopic, TopicId, TopicIndex, TopicProvenance};
