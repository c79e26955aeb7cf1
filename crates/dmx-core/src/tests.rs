//! Engine tests against an in-memory store

use super::*;
use serde_json::{json, Value};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct FakeStore {
    types: HashMap<String, TypeDefinition>,
    topics: HashMap<String, Vec<ExistingTopic>>,
    composed: HashSet<TopicId>,
    provenance: HashMap<TopicId, TopicProvenance>,
    failing_index: bool,
    failing_conflicts: bool,
    index_calls: Cell<usize>,
}

impl FakeStore {
    fn with_type(mut self, definition: TypeDefinition) -> Self {
        self.types.insert(definition.uri.clone(), definition);
        self
    }

    fn with_topic(mut self, type_uri: &str, topic: ExistingTopic) -> Self {
        self.topics.entry(type_uri.to_string()).or_default().push(topic);
        self
    }

    fn composed(mut self, id: TopicId) -> Self {
        self.composed.insert(id);
        self
    }
}

impl SchemaClassifier for FakeStore {
    fn classify(&self, type_uri: &str) -> Result<TypeDefinition, LookupError> {
        self.types
            .get(type_uri)
            .cloned()
            .ok_or_else(|| LookupError::UnknownType(type_uri.to_string()))
    }
}

impl TopicIndex for FakeStore {
    fn find_by_type(&self, type_uri: &str) -> Result<Vec<ExistingTopic>, LookupError> {
        self.index_calls.set(self.index_calls.get() + 1);
        if self.failing_index {
            return Err(LookupError::Transport("connection refused".to_string()));
        }
        Ok(self.topics.get(type_uri).cloned().unwrap_or_default())
    }
}

impl ConflictDetector for FakeStore {
    fn has_composition_link(&self, topic_id: TopicId) -> Result<bool, LookupError> {
        if self.failing_conflicts {
            return Err(LookupError::UnknownTopic(topic_id));
        }
        Ok(self.composed.contains(&topic_id))
    }

    fn provenance(&self, topic_id: TopicId) -> Result<Option<TopicProvenance>, LookupError> {
        Ok(self.provenance.get(&topic_id).cloned())
    }
}

/// phone: composite with a single aggregated label.
fn phone_store() -> FakeStore {
    FakeStore::default()
        .with_type(TypeDefinition::composite(
            "phone",
            vec![ChildDef::aggregation("phone_label")],
        ))
        .with_type(TypeDefinition::simple("phone_label"))
        .with_topic("phone", ExistingTopic::new(42, "555-0100"))
}

/// person (first_name composed, city and address aggregated) and
/// address (street and city aggregated).
fn contacts_store() -> FakeStore {
    FakeStore::default()
        .with_type(TypeDefinition::composite(
            "person",
            vec![
                ChildDef::composition("first_name"),
                ChildDef::aggregation("city"),
                ChildDef::aggregation("address"),
            ],
        ))
        .with_type(TypeDefinition::composite(
            "address",
            vec![ChildDef::aggregation("street"), ChildDef::aggregation("city")],
        ))
        .with_type(TypeDefinition::simple("first_name"))
        .with_type(TypeDefinition::simple("city"))
        .with_type(TypeDefinition::simple("street"))
        .with_topic("first_name", ExistingTopic::new(3, "Ada"))
        .with_topic("city", ExistingTopic::new(7, "Berlin"))
}

fn run(store: &FakeStore, payload: Value) -> Resolution {
    run_with(store, ResolveOptions::default(), payload)
}

fn run_with(store: &FakeStore, options: ResolveOptions, payload: Value) -> Resolution {
    Resolver::new(store, store, store)
        .with_options(options)
        .resolve_with_report(PayloadNode::from(payload))
        .unwrap()
}

// ============================================================================
// Whole-composite matches
// ============================================================================

#[test]
fn test_aggregate_only_composite_collapses_to_reference() {
    let store = phone_store();
    let out = run(&store, json!({ "phone": { "value": "555-0100" } }));

    assert_eq!(out.payload.to_json(), json!({ "phone": "ref_id:42" }));
    assert!(out.report.warnings.is_empty());
    assert_eq!(out.report.substitutions.len(), 1);
    assert_eq!(out.report.substitutions[0].path, "/phone");
    assert_eq!(out.report.substitutions[0].kind, SubstitutionKind::Composite);
}

#[test]
fn test_composed_composite_is_left_alone() {
    let store = phone_store().composed(42);
    let input = json!({ "phone": { "value": "555-0100" } });
    let out = run(&store, input.clone());

    assert_eq!(out.payload.to_json(), input);
    assert!(out.report.has_conflict_for(42));
    assert_eq!(out.report.conflicts().count(), 1);
    assert!(out.report.substitutions.is_empty());
}

#[test]
fn test_composite_matches_on_exact_child_set() {
    let store = contacts_store()
        .with_topic(
            "address",
            ExistingTopic::new(20, "Main St Berlin").with_children(["Main St", "Berlin"]),
        )
        .with_topic(
            "address",
            ExistingTopic::new(21, "Main St Berlin Mitte")
                .with_children(["Main St", "Berlin", "Mitte"]),
        );
    let out = run(
        &store,
        json!({
            "type_uri": "person",
            "childs": {
                "first_name": "Ada",
                "address": { "childs": { "street": "Main St", "city": "Berlin" } }
            }
        }),
    );

    assert_eq!(
        out.payload.to_json(),
        json!({
            "type_uri": "person",
            "childs": { "first_name": "Ada", "address": "ref_id:20" }
        })
    );
}

#[test]
fn test_composite_without_match_keeps_leaf_substitutions() {
    let store = contacts_store();
    let out = run(
        &store,
        json!({
            "type_uri": "person",
            "childs": {
                "address": { "childs": { "street": "Elm Road", "city": "Berlin" } }
            }
        }),
    );

    assert_eq!(
        out.payload.pointer("/childs/address/childs/city"),
        Some(&PayloadNode::text("ref_id:7"))
    );
    assert_eq!(
        out.payload.pointer("/childs/address/childs/street"),
        Some(&PayloadNode::text("Elm Road"))
    );
}

#[test]
fn test_each_occurrence_gets_its_own_match() {
    let store = contacts_store()
        .with_topic(
            "address",
            ExistingTopic::new(20, "Main St Berlin").with_children(["Main St", "Berlin"]),
        )
        .with_topic(
            "address",
            ExistingTopic::new(21, "Elm Road Paris").with_children(["Elm Road", "Paris"]),
        );
    let out = run(
        &store,
        json!({
            "type_uri": "person",
            "childs": {
                "address": [
                    { "childs": { "street": "Main St", "city": "Berlin" }, "assoc": { "value": "home" } },
                    { "childs": { "street": "Nowhere", "city": "Oslo" } },
                    { "childs": { "street": "Elm Road", "city": "Paris" } }
                ]
            }
        }),
    );

    assert_eq!(
        out.payload.pointer("/childs/address").map(PayloadNode::to_json),
        Some(json!([
            { "value": "ref_id:20", "assoc": { "value": "home" } },
            { "childs": { "street": "Nowhere", "city": "Oslo" } },
            { "value": "ref_id:21" }
        ]))
    );
}

#[test]
fn test_label_only_topic_needs_exact_value() {
    let store = phone_store();
    for value in ["555", "0", "555-0100 ext. 2"] {
        let input = json!({ "phone": { "value": value } });
        let out = run(&store, input.clone());
        assert_eq!(out.payload.to_json(), input, "value {value:?}");
        assert!(out.report.substitutions.is_empty());
    }
}

#[test]
fn test_empty_values_never_match() {
    let store = phone_store().with_topic("phone", ExistingTopic::new(43, ""));
    let input = json!({ "phone": { "value": "" } });
    let out = run(&store, input.clone());

    assert_eq!(out.payload.to_json(), input);
    assert!(out.report.warnings.is_empty());
}

#[test]
fn test_repeated_component_values_must_match_in_number() {
    let store = contacts_store().with_topic(
        "address",
        ExistingTopic::new(20, "Berlin").with_children(["Berlin"]),
    );
    let input = json!({
        "type_uri": "person",
        "address": { "street": "Berlin", "city#old": "Berlin", "city": "Berlin" }
    });
    let out = run(&store, input);

    assert!(out
        .report
        .substitutions
        .iter()
        .all(|s| s.kind == SubstitutionKind::Leaf));
    assert!(out.payload.pointer("/address/street").is_some());
}

#[test]
fn test_collapsed_entry_keeps_association_and_type() {
    let store = contacts_store().with_topic(
        "address",
        ExistingTopic::new(20, "Main St Berlin").with_children(["Main St", "Berlin"]),
    );
    let out = run(
        &store,
        json!({
            "type_uri": "person",
            "address": [{
                "type_uri": "address",
                "street": "Main St",
                "childs": { "city": "Berlin" },
                "assoc": { "childs": { "street": "label" } }
            }]
        }),
    );

    assert_eq!(
        out.payload.pointer("/address/0").map(PayloadNode::to_json),
        Some(json!({
            "type_uri": "address",
            "value": "ref_id:20",
            "assoc": { "childs": { "street": "label" } }
        }))
    );
}

#[test]
fn test_ambiguous_composite_uses_last_match_by_default() {
    let store = phone_store().with_topic("phone", ExistingTopic::new(43, "555-0100"));
    let out = run(&store, json!({ "phone": { "value": "555-0100" } }));

    assert_eq!(out.payload.to_json(), json!({ "phone": "ref_id:43" }));
    assert_eq!(
        out.report.warnings,
        vec![Warning::AmbiguousMatch {
            type_uri: "phone".to_string(),
            candidates: vec![42, 43],
            chosen: Some(43),
        }]
    );
}

#[test]
fn test_ambiguous_composite_can_be_rejected() {
    let store = phone_store().with_topic("phone", ExistingTopic::new(43, "555-0100"));
    let options = ResolveOptions {
        aggregate_tie_break: TieBreak::Reject,
        ..ResolveOptions::default()
    };
    let input = json!({ "phone": { "value": "555-0100" } });
    let out = run_with(&store, options, input.clone());

    assert_eq!(out.payload.to_json(), input);
    assert!(matches!(
        out.report.warnings.as_slice(),
        [Warning::AmbiguousMatch { chosen: None, .. }]
    ));
}

#[test]
fn test_composed_candidate_does_not_shadow_free_one() {
    let store = phone_store()
        .with_topic("phone", ExistingTopic::new(43, "555-0100"))
        .composed(43);
    let out = run(&store, json!({ "phone": { "value": "555-0100" } }));

    assert_eq!(out.payload.to_json(), json!({ "phone": "ref_id:42" }));
    assert!(out.report.has_conflict_for(43));
}

// ============================================================================
// Leaf substitution
// ============================================================================

#[test]
fn test_aggregated_leaf_becomes_reference() {
    let store = contacts_store();
    let out = run(
        &store,
        json!({ "type_uri": "person", "childs": { "first_name": "Ada", "city": "Berlin" } }),
    );

    assert_eq!(
        out.payload.to_json(),
        json!({ "type_uri": "person", "childs": { "first_name": "Ada", "city": "ref_id:7" } })
    );
    let sub = &out.report.substitutions[0];
    assert_eq!(sub.path, "/childs/city");
    assert_eq!(sub.reference, "ref_id:7");
    assert_eq!(sub.kind, SubstitutionKind::Leaf);
}

#[test]
fn test_composed_leaf_is_recorded_as_conflict() {
    let store = contacts_store().composed(7);
    let input = json!({ "type_uri": "person", "childs": { "city": "Berlin" } });
    let out = run(&store, input.clone());

    assert_eq!(out.payload.to_json(), input);
    assert_eq!(
        out.report.warnings,
        vec![Warning::CompositionConflict {
            type_uri: "city".to_string(),
            topic_id: 7,
            value: "Berlin".to_string(),
        }]
    );
}

#[test]
fn test_simple_topic_mapping_value_is_substituted() {
    let store = contacts_store();
    let out = run(
        &store,
        json!({ "type_uri": "person", "childs": { "city": { "value": "Berlin" } } }),
    );

    assert_eq!(
        out.payload.pointer("/childs/city/value"),
        Some(&PayloadNode::text("ref_id:7"))
    );
}

#[test]
fn test_qualified_slot_key_uses_base_type() {
    let store = contacts_store();
    let out = run(
        &store,
        json!({ "type_uri": "person", "city#home": ["Berlin", "Hamburg"] }),
    );

    assert_eq!(
        out.payload.pointer("/city#home").map(PayloadNode::to_json),
        Some(json!(["ref_id:7", "Hamburg"]))
    );
}

#[test]
fn test_ambiguous_leaf_uses_first_match() {
    let store = contacts_store().with_topic("city", ExistingTopic::new(9, "Berlin"));
    let out = run(&store, json!({ "type_uri": "person", "city": "Berlin" }));

    assert_eq!(out.payload.pointer("/city"), Some(&PayloadNode::text("ref_id:7")));
    let check = &out.report.leaf_checks[0];
    assert_eq!(check.reusable().collect::<Vec<_>>(), vec![7, 9]);
    assert_eq!(check.chosen, Some(7));
}

#[test]
fn test_existing_references_are_left_untouched() {
    let store = contacts_store();
    let input = json!({
        "type_uri": "person",
        "childs": { "city": "ref_id:99", "address": "ref_uri:home.address" }
    });
    let out = run(&store, input.clone());

    assert_eq!(out.payload.to_json(), input);
    assert!(out.report.leaf_checks.is_empty());
}

#[test]
fn test_leaf_lookups_are_memoized() {
    let store = contacts_store();
    run(
        &store,
        json!({
            "type_uri": "person",
            "city": "Berlin",
            "address": [
                { "city": "Berlin", "street": "a" },
                { "city": "Berlin", "street": "b" }
            ]
        }),
    );

    // city, street and address, once each.
    assert_eq!(store.index_calls.get(), 3);
}

// ============================================================================
// Composition children
// ============================================================================

#[test]
fn test_composition_child_is_never_replaced() {
    let store = FakeStore::default()
        .with_type(TypeDefinition::composite(
            "invoice",
            vec![ChildDef::composition("address")],
        ))
        .with_type(TypeDefinition::composite(
            "address",
            vec![ChildDef::aggregation("street"), ChildDef::aggregation("city")],
        ))
        .with_type(TypeDefinition::simple("street"))
        .with_type(TypeDefinition::simple("city"))
        .with_topic("city", ExistingTopic::new(7, "Berlin"))
        .with_topic(
            "address",
            ExistingTopic::new(20, "Main St Berlin").with_children(["Main St", "Berlin"]),
        );
    let out = run(
        &store,
        json!({
            "type_uri": "invoice",
            "address": { "street": "Main St", "city": "Berlin" }
        }),
    );

    // The owned address stays; its shared leaves may still be linked.
    assert_eq!(
        out.payload.pointer("/address").map(PayloadNode::to_json),
        Some(json!({ "street": "Main St", "city": "ref_id:7" }))
    );
    assert!(out
        .report
        .substitutions
        .iter()
        .all(|s| s.kind == SubstitutionKind::Leaf));
}

#[test]
fn test_composition_leaf_with_equal_value_is_kept() {
    let store = contacts_store();
    let input = json!({ "type_uri": "person", "first_name": "Ada" });
    let out = run(&store, input.clone());

    assert_eq!(out.payload.to_json(), input);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_second_pass_changes_nothing() {
    let store = contacts_store().with_topic(
        "address",
        ExistingTopic::new(20, "Main St Berlin").with_children(["Main St", "Berlin"]),
    );
    let once = run(
        &store,
        json!({
            "type_uri": "person",
            "first_name": "Ada",
            "city": "Berlin",
            "address": [
                { "street": "Main St", "city": "Berlin" },
                { "street": "Elm Road", "city": "Berlin" }
            ]
        }),
    );
    let twice = run(&store, once.payload.to_json());

    assert_eq!(twice.payload, once.payload);
    assert!(twice.report.substitutions.is_empty());
}

// ============================================================================
// Provenance and options
// ============================================================================

#[test]
fn test_provenance_is_attached_to_candidates() {
    let mut store = contacts_store();
    store.provenance.insert(
        7,
        TopicProvenance {
            creator: Some("alice".to_string()),
            workspace_id: Some(1),
            ..TopicProvenance::default()
        },
    );

    let out = run(&store, json!({ "type_uri": "person", "city": "Berlin" }));
    let candidate = &out.report.leaf_checks[0].candidates[0];
    assert_eq!(
        candidate.provenance.as_ref().and_then(|p| p.creator.as_deref()),
        Some("alice")
    );

    let options = ResolveOptions {
        inspect_provenance: false,
        ..ResolveOptions::default()
    };
    let out = run_with(&store, options, json!({ "type_uri": "person", "city": "Berlin" }));
    assert!(out.report.leaf_checks[0].candidates[0].provenance.is_none());
}

#[test]
fn test_tie_break_parsing() {
    assert_eq!(TieBreak::parse("First"), Some(TieBreak::First));
    assert_eq!(TieBreak::parse(" last "), Some(TieBreak::Last));
    assert_eq!(TieBreak::parse("reject"), Some(TieBreak::Reject));
    assert_eq!(TieBreak::parse("random"), None);
    assert_eq!(TieBreak::Last.choose(&[1, 2, 3]), Some(3));
    assert_eq!(TieBreak::Reject.choose(&[1]), Some(1));
    assert_eq!(TieBreak::Reject.choose(&[1, 2]), None);
}

// ============================================================================
// Fatal lookups
// ============================================================================

#[test]
fn test_unknown_type_aborts() {
    let store = contacts_store();
    let err = Resolver::new(&store, &store, &store)
        .resolve(PayloadNode::from(json!({ "type_uri": "person", "planet": "Mars" })))
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::SchemaLookup { ref type_uri, source: LookupError::UnknownType(_) } if type_uri == "planet"
    ));
}

#[test]
fn test_index_failure_aborts() {
    let mut store = contacts_store();
    store.failing_index = true;
    let err = Resolver::new(&store, &store, &store)
        .resolve(PayloadNode::from(json!({ "type_uri": "person", "city": "Berlin" })))
        .unwrap_err();

    assert!(matches!(err, ResolveError::IndexLookup { .. }));
}

#[test]
fn test_conflict_lookup_failure_aborts() {
    let mut store = contacts_store();
    store.failing_conflicts = true;
    let err = Resolver::new(&store, &store, &store)
        .resolve(PayloadNode::from(json!({ "type_uri": "person", "city": "Berlin" })))
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::ConflictLookup { topic_id: 7, .. }
    ));
}
