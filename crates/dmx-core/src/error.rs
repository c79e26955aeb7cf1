use crate::store::TopicId;

/// Failure reported by one of the lookup collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("unknown topic type `{0}`")]
    UnknownType(String),
    #[error("unknown topic {0}")]
    UnknownTopic(TopicId),
    #[error("lookup transport failed: {0}")]
    Transport(String),
}

/// Fatal outcome of a resolution run.
///
/// Composition conflicts and ambiguous matches are not errors; they end up as
/// [`crate::Warning`]s in the report.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("schema lookup failed for `{type_uri}`: {source}")]
    SchemaLookup {
        type_uri: String,
        #[source]
        source: LookupError,
    },

    #[error("topic index lookup failed for `{type_uri}`: {source}")]
    IndexLookup {
        type_uri: String,
        #[source]
        source: LookupError,
    },

    #[error("composition lookup failed for topic {topic_id}: {source}")]
    ConflictLookup {
        topic_id: TopicId,
        #[source]
        source: LookupError,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
