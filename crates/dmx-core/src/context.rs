use crate::report::{LeafCheck, ResolutionReport};
use crate::schema::TypeDefinition;
use crate::store::{ExistingTopic, TopicId};
use std::collections::{BTreeMap, HashMap};

/// State owned by exactly one `resolve` call.
#[derive(Debug, Default)]
pub(crate) struct ResolutionContext {
    // Lookup memos.
    pub definitions: HashMap<String, TypeDefinition>,
    pub existing: HashMap<String, Vec<ExistingTopic>>,
    pub composed: HashMap<TopicId, bool>,
    pub leaf_checks: HashMap<(String, String), usize>,

    /// Composite types whose children are all aggregations, with those children.
    pub aggregation_only: BTreeMap<String, Vec<String>>,
    /// Composite types with at least one aggregation child, with those children.
    pub mixed_or_aggregate: BTreeMap<String, Vec<String>>,
    /// Latest whole-composite match per type.
    pub references: BTreeMap<String, String>,
    /// Whole-composite match per occurrence, in post-order; `None` where an
    /// occurrence found no usable match.
    pub occurrences: BTreeMap<String, Vec<Option<String>>>,

    pub report: ResolutionReport,
}

impl ResolutionContext {
    /// Record a freshly classified type in the aggregation maps.
    pub fn register(&mut self, type_uri: &str, definition: &TypeDefinition) {
        if !definition.is_composite() {
            return;
        }
        let aggregation = definition.aggregation_children();
        if aggregation.is_empty() {
            return;
        }
        if definition.composition_children().is_empty() {
            self.aggregation_only
                .insert(type_uri.to_string(), aggregation.clone());
        }
        self.mixed_or_aggregate
            .insert(type_uri.to_string(), aggregation);
    }

    pub fn leaf_check(&self, type_uri: &str, value: &str) -> Option<&LeafCheck> {
        self.leaf_checks
            .get(&(type_uri.to_string(), value.to_string()))
            .and_then(|&i| self.report.leaf_checks.get(i))
    }

    pub fn record_leaf_check(&mut self, check: LeafCheck) {
        let key = (check.type_uri.clone(), check.value.clone());
        self.leaf_checks.insert(key, self.report.leaf_checks.len());
        self.report.leaf_checks.push(check);
    }
}
