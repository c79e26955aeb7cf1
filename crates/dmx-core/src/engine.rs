//! Composite-reference resolution engine.
//!
//! Four passes over one payload tree:
//!
//! 1. **Classify** (top-down): every child slot and every declared type is
//!    classified; composite types with aggregation children are recorded.
//! 2. **Leaf check**: every plain scalar leaf is looked up in the topic index;
//!    equal-valued topics are reuse candidates unless already composed.
//! 3. **Reconcile** (post-order): aggregation leaves are replaced by
//!    references, and each occurrence of an aggregation-only composite is
//!    matched against existing composites by its full set of child values.
//! 4. **Apply**: matched composite occurrences collapse to their reference.
//!
//! All state lives in a [`ResolutionContext`] created per call.

use crate::context::ResolutionContext;
use crate::error::ResolveError;
use crate::options::ResolveOptions;
use crate::payload::{
    base_type_uri, declared_type, fields, fields_mut, is_structural_key, join_path, ref_id,
    topic_type, Mapping, PayloadNode, Scalar, ASSOC_KEY, CHILDS_KEY, VALUE_KEY,
};
use crate::report::{
    CandidateInfo, LeafCheck, ResolutionReport, Substitution, SubstitutionKind, Warning,
};
use crate::schema::{DataKind, RelationKind, SchemaClassifier};
use crate::store::{ConflictDetector, ExistingTopic, TopicId, TopicIndex};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Rewritten payload plus everything the run found along the way.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub payload: PayloadNode,
    pub report: ResolutionReport,
}

pub struct Resolver<'a> {
    schema: &'a dyn SchemaClassifier,
    index: &'a dyn TopicIndex,
    conflicts: &'a dyn ConflictDetector,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(
        schema: &'a dyn SchemaClassifier,
        index: &'a dyn TopicIndex,
        conflicts: &'a dyn ConflictDetector,
    ) -> Self {
        Self {
            schema,
            index,
            conflicts,
            options: ResolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Rewrite `payload` so reusable aggregated children become references.
    pub fn resolve(&self, payload: PayloadNode) -> Result<PayloadNode, ResolveError> {
        Ok(self.resolve_with_report(payload)?.payload)
    }

    pub fn resolve_with_report(&self, payload: PayloadNode) -> Result<Resolution, ResolveError> {
        let mut payload = payload;
        let mut ctx = ResolutionContext::default();

        self.survey(&mut ctx, &payload, None)?;
        debug!(
            aggregation_only = ?ctx.aggregation_only.keys().collect::<Vec<_>>(),
            mixed_or_aggregate = ?ctx.mixed_or_aggregate.keys().collect::<Vec<_>>(),
            "classification finished"
        );

        self.reconcile(&mut ctx, &mut payload, None, None, "")?;

        if !ctx.references.is_empty() {
            let mut counters = HashMap::new();
            self.apply(&mut ctx, &mut payload, None, &mut counters, "");
        }

        info!(
            substitutions = ctx.report.substitutions.len(),
            warnings = ctx.report.warnings.len(),
            "resolution finished"
        );
        Ok(Resolution {
            payload,
            report: ctx.report,
        })
    }

    // ------------------------------------------------------------------
    // Lookups (memoized per run)
    // ------------------------------------------------------------------

    fn classify(&self, ctx: &mut ResolutionContext, type_uri: &str) -> Result<DataKind, ResolveError> {
        if let Some(definition) = ctx.definitions.get(type_uri) {
            return Ok(definition.data_kind);
        }
        let definition =
            self.schema
                .classify(type_uri)
                .map_err(|source| ResolveError::SchemaLookup {
                    type_uri: type_uri.to_string(),
                    source,
                })?;
        debug!(
            type_uri,
            kind = ?definition.data_kind,
            children = definition.children.len(),
            "classified topic type"
        );
        ctx.register(type_uri, &definition);
        let kind = definition.data_kind;
        ctx.definitions.insert(type_uri.to_string(), definition);
        Ok(kind)
    }

    fn existing(
        &self,
        ctx: &mut ResolutionContext,
        type_uri: &str,
    ) -> Result<Vec<ExistingTopic>, ResolveError> {
        if let Some(topics) = ctx.existing.get(type_uri) {
            return Ok(topics.clone());
        }
        let topics = self
            .index
            .find_by_type(type_uri)
            .map_err(|source| ResolveError::IndexLookup {
                type_uri: type_uri.to_string(),
                source,
            })?;
        debug!(type_uri, count = topics.len(), "fetched existing topics");
        ctx.existing.insert(type_uri.to_string(), topics.clone());
        Ok(topics)
    }

    fn is_composed(&self, ctx: &mut ResolutionContext, topic_id: TopicId) -> Result<bool, ResolveError> {
        if let Some(&composed) = ctx.composed.get(&topic_id) {
            return Ok(composed);
        }
        let composed = self
            .conflicts
            .has_composition_link(topic_id)
            .map_err(|source| ResolveError::ConflictLookup { topic_id, source })?;
        ctx.composed.insert(topic_id, composed);
        Ok(composed)
    }

    /// Pass 2 for one `(type, value)` leaf. Returns the candidate to reference.
    fn check_leaf(
        &self,
        ctx: &mut ResolutionContext,
        type_uri: &str,
        value: &str,
    ) -> Result<Option<TopicId>, ResolveError> {
        if let Some(check) = ctx.leaf_check(type_uri, value) {
            return Ok(check.chosen);
        }

        let matching: Vec<TopicId> = self
            .existing(ctx, type_uri)?
            .into_iter()
            .filter(|topic| topic.value == value)
            .map(|topic| topic.id)
            .collect();

        let mut candidates = Vec::with_capacity(matching.len());
        for id in matching {
            let composed = self.is_composed(ctx, id)?;
            let provenance = if self.options.inspect_provenance {
                self.conflicts
                    .provenance(id)
                    .map_err(|source| ResolveError::ConflictLookup {
                        topic_id: id,
                        source,
                    })?
            } else {
                None
            };
            if let Some(p) = &provenance {
                debug!(
                    topic_id = id,
                    creator = ?p.creator,
                    modifier = ?p.modifier,
                    workspace_id = ?p.workspace_id,
                    workspace_owner = ?p.workspace_owner,
                    "leaf candidate provenance"
                );
            }
            if composed {
                warn!(type_uri, topic_id = id, value, "topic already composed elsewhere; not reusing it");
                ctx.report.warn(Warning::CompositionConflict {
                    type_uri: type_uri.to_string(),
                    topic_id: id,
                    value: value.to_string(),
                });
            }
            candidates.push(CandidateInfo {
                id,
                composed,
                provenance,
            });
        }

        let reusable: Vec<TopicId> = candidates
            .iter()
            .filter(|c| !c.composed)
            .map(|c| c.id)
            .collect();
        let chosen = self.options.leaf_tie_break.choose(&reusable);
        if reusable.len() > 1 {
            info!(type_uri, value, candidates = ?reusable, chosen = ?chosen, "several existing topics share this value");
            if chosen.is_none() {
                ctx.report.warn(Warning::AmbiguousMatch {
                    type_uri: type_uri.to_string(),
                    candidates: reusable.clone(),
                    chosen,
                });
            }
        }
        debug!(type_uri, value, found = candidates.len(), "leaf duplicate check");

        ctx.record_leaf_check(LeafCheck {
            type_uri: type_uri.to_string(),
            value: value.to_string(),
            candidates,
            chosen,
        });
        Ok(chosen)
    }

    // ------------------------------------------------------------------
    // Pass 1 + 2: classify and leaf-check
    // ------------------------------------------------------------------

    fn survey(
        &self,
        ctx: &mut ResolutionContext,
        node: &PayloadNode,
        slot: Option<&str>,
    ) -> Result<(), ResolveError> {
        match node {
            PayloadNode::Mapping(map) => self.survey_topic(ctx, map, slot),
            PayloadNode::Sequence(items) => {
                for item in items {
                    self.survey(ctx, item, slot)?;
                }
                Ok(())
            }
            PayloadNode::Scalar(scalar) => {
                let slot = slot.filter(|s| !is_structural_key(s));
                if let (Some(slot), Some(value)) = (slot, scalar.plain_text()) {
                    self.check_leaf(ctx, base_type_uri(slot), &value)?;
                }
                Ok(())
            }
        }
    }

    fn survey_topic(
        &self,
        ctx: &mut ResolutionContext,
        map: &Mapping,
        slot: Option<&str>,
    ) -> Result<(), ResolveError> {
        if let Some(type_uri) = topic_type(map, slot) {
            // A simple topic written as `{"value": ...}` pairs its type with
            // that value.
            if self.classify(ctx, type_uri)? == DataKind::Simple {
                let value = map
                    .get(VALUE_KEY)
                    .and_then(PayloadNode::as_scalar)
                    .and_then(Scalar::plain_text);
                if let Some(value) = value {
                    self.check_leaf(ctx, type_uri, &value)?;
                }
            }
        }

        for (key, child) in fields(map) {
            self.classify(ctx, base_type_uri(key))?;
            self.survey(ctx, child, Some(key))?;
        }
        if let Some(assoc) = map.get(ASSOC_KEY) {
            self.survey(ctx, assoc, Some(ASSOC_KEY))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pass 3: reconcile aggregates
    // ------------------------------------------------------------------

    fn reconcile(
        &self,
        ctx: &mut ResolutionContext,
        node: &mut PayloadNode,
        slot: Option<&str>,
        owner: Option<&str>,
        path: &str,
    ) -> Result<(), ResolveError> {
        match node {
            PayloadNode::Mapping(map) => self.reconcile_topic(ctx, map, slot, owner, path),
            PayloadNode::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.reconcile(ctx, item, slot, owner, &format!("{path}/{i}"))?;
                }
                Ok(())
            }
            PayloadNode::Scalar(_) => Ok(()),
        }
    }

    fn reconcile_topic(
        &self,
        ctx: &mut ResolutionContext,
        map: &mut Mapping,
        slot: Option<&str>,
        owner: Option<&str>,
        path: &str,
    ) -> Result<(), ResolveError> {
        let own_type = topic_type(map, slot).map(str::to_string);

        for (in_childs, key, child) in fields_mut(map) {
            let child_path = join_path(path, in_childs, key);
            self.reconcile(ctx, child, Some(key), own_type.as_deref(), &child_path)?;
        }
        if let Some(assoc) = map.get_mut(ASSOC_KEY) {
            self.reconcile(ctx, assoc, Some(ASSOC_KEY), None, &format!("{path}/{ASSOC_KEY}"))?;
        }

        let Some(type_uri) = own_type else {
            return Ok(());
        };

        let whole = ctx.aggregation_only.get(&type_uri).cloned();
        let components = whole
            .as_deref()
            .and_then(|children| composite_components(map, children));

        if let Some(children) = ctx.mixed_or_aggregate.get(&type_uri).cloned() {
            for (in_childs, key, child) in fields_mut(map) {
                let child_type = base_type_uri(key);
                if children.iter().any(|c| c == child_type) {
                    let child_path = join_path(path, in_childs, key);
                    self.substitute_leaf(ctx, child_type, child, &child_path)?;
                }
            }
        }

        if whole.is_none() || !is_occurrence_slot(slot) {
            return Ok(());
        }
        let in_composition_slot = match (owner, slot) {
            (Some(owner), Some(slot)) => ctx
                .definitions
                .get(owner)
                .and_then(|d| d.relation_of(base_type_uri(slot)))
                == Some(RelationKind::Composition),
            _ => false,
        };
        let reference = match components {
            Some(components) if !in_composition_slot => {
                self.match_composite(ctx, &type_uri, &components)?
            }
            _ => None,
        };
        if let Some(reference) = &reference {
            ctx.references.insert(type_uri.clone(), reference.clone());
        }
        ctx.occurrences.entry(type_uri).or_default().push(reference);
        Ok(())
    }

    /// Replace plain values in an aggregation slot with references.
    fn substitute_leaf(
        &self,
        ctx: &mut ResolutionContext,
        type_uri: &str,
        node: &mut PayloadNode,
        path: &str,
    ) -> Result<(), ResolveError> {
        match node {
            PayloadNode::Scalar(scalar) => {
                let Some(value) = scalar.plain_text().map(Cow::into_owned) else {
                    return Ok(());
                };
                if let Some(id) = self.check_leaf(ctx, type_uri, &value)? {
                    info!(path, type_uri, value = %value, topic_id = id, "reusing existing topic");
                    ctx.report.substitutions.push(Substitution {
                        path: path.to_string(),
                        type_uri: type_uri.to_string(),
                        reference: ref_id(id),
                        kind: SubstitutionKind::Leaf,
                    });
                    *scalar = Scalar::reference(id);
                }
            }
            PayloadNode::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    if !matches!(item, PayloadNode::Sequence(_)) {
                        self.substitute_leaf(ctx, type_uri, item, &format!("{path}/{i}"))?;
                    }
                }
            }
            PayloadNode::Mapping(map) => {
                let is_simple = ctx
                    .definitions
                    .get(type_uri)
                    .is_some_and(|d| !d.is_composite());
                let same_type = declared_type(map).map_or(true, |t| t == type_uri);
                if is_simple && same_type {
                    if let Some(value) = map.get_mut(VALUE_KEY) {
                        if matches!(value, PayloadNode::Scalar(_)) {
                            self.substitute_leaf(ctx, type_uri, value, &format!("{path}/{VALUE_KEY}"))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pass 3c: find an existing composite whose children are exactly `components`.
    fn match_composite(
        &self,
        ctx: &mut ResolutionContext,
        type_uri: &str,
        components: &[String],
    ) -> Result<Option<String>, ResolveError> {
        let mut exact = Vec::new();
        for topic in self.existing(ctx, type_uri)? {
            if !covers(&topic, components) {
                continue;
            }
            if self.is_composed(ctx, topic.id)? {
                warn!(type_uri, topic_id = topic.id, "matching composite already composed elsewhere; not reusing it");
                ctx.report.warn(Warning::CompositionConflict {
                    type_uri: type_uri.to_string(),
                    topic_id: topic.id,
                    value: topic.value.clone(),
                });
                continue;
            }
            exact.push(topic.id);
        }

        let chosen = self.options.aggregate_tie_break.choose(&exact);
        if exact.len() > 1 {
            warn!(type_uri, candidates = ?exact, chosen = ?chosen, "several existing composites match");
            ctx.report.warn(Warning::AmbiguousMatch {
                type_uri: type_uri.to_string(),
                candidates: exact.clone(),
                chosen,
            });
        }
        if let Some(id) = chosen {
            info!(type_uri, components = ?components, topic_id = id, "composite already exists");
        }
        Ok(chosen.map(ref_id))
    }

    // ------------------------------------------------------------------
    // Pass 4: apply composite references
    // ------------------------------------------------------------------

    fn apply(
        &self,
        ctx: &mut ResolutionContext,
        node: &mut PayloadNode,
        slot: Option<&str>,
        counters: &mut HashMap<String, usize>,
        path: &str,
    ) {
        let replacement = match node {
            PayloadNode::Mapping(map) => {
                self.apply_topic(ctx, map, counters, path);
                next_occurrence(ctx, map, slot, counters)
            }
            PayloadNode::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    let item_path = format!("{path}/{i}");
                    let collapsed = match &mut *item {
                        PayloadNode::Mapping(map) => {
                            self.apply_topic(ctx, map, counters, &item_path);
                            next_occurrence(ctx, map, slot, counters)
                        }
                        other => {
                            self.apply(ctx, other, slot, counters, &item_path);
                            None
                        }
                    };
                    // Repeated composites keep their entry and its association;
                    // only the child values give way to the reference.
                    if let (Some((type_uri, reference)), PayloadNode::Mapping(map)) =
                        (collapsed, &mut *item)
                    {
                        record_collapse(ctx, &item_path, type_uri, &reference);
                        map.retain(|key, _| is_structural_key(key) && key != CHILDS_KEY);
                        map.insert(VALUE_KEY.to_string(), PayloadNode::reference(reference));
                    }
                }
                None
            }
            PayloadNode::Scalar(_) => None,
        };

        if let Some((type_uri, reference)) = replacement {
            record_collapse(ctx, path, type_uri, &reference);
            *node = PayloadNode::reference(reference);
        }
    }

    fn apply_topic(
        &self,
        ctx: &mut ResolutionContext,
        map: &mut Mapping,
        counters: &mut HashMap<String, usize>,
        path: &str,
    ) {
        for (in_childs, key, child) in fields_mut(map) {
            let child_path = join_path(path, in_childs, key);
            self.apply(ctx, child, Some(key), counters, &child_path);
        }
        if let Some(assoc) = map.get_mut(ASSOC_KEY) {
            self.apply(ctx, assoc, Some(ASSOC_KEY), counters, &format!("{path}/{ASSOC_KEY}"));
        }
    }
}

fn is_occurrence_slot(slot: Option<&str>) -> bool {
    slot.is_some_and(|s| !is_structural_key(s))
}

/// Values a whole-composite match has to account for.
///
/// `None` when there is nothing to match on, or when a child slot already
/// holds a reference (the composite is then only partially new).
fn composite_components(map: &Mapping, children: &[String]) -> Option<Vec<String>> {
    let mut components = Vec::new();
    let mut has_child_slot = false;
    for (key, node) in fields(map) {
        if !children.iter().any(|c| c == base_type_uri(key)) {
            continue;
        }
        has_child_slot = true;
        if let PayloadNode::Scalar(scalar) = node {
            if scalar.is_reference() {
                return None;
            }
            match scalar.text() {
                Some(text) if !text.is_empty() => components.push(text.into_owned()),
                _ => {}
            }
        }
    }
    if !has_child_slot {
        let value = map
            .get(VALUE_KEY)
            .and_then(PayloadNode::as_scalar)
            .and_then(Scalar::plain_text);
        match value {
            Some(value) if !value.is_empty() => components.push(value.into_owned()),
            _ => {}
        }
    }
    if components.is_empty() {
        None
    } else {
        Some(components)
    }
}

/// Whether `topic` has exactly the child values in `components`, in any
/// order and with the same multiplicities.
///
/// A topic reported without children counts as having its label as the one
/// child value.
fn covers(topic: &ExistingTopic, components: &[String]) -> bool {
    let mut wanted: Vec<&str> = components.iter().map(String::as_str).collect();
    let mut have: Vec<&str> = if topic.children.is_empty() {
        vec![topic.value.as_str()]
    } else {
        topic.children.iter().map(String::as_str).collect()
    };
    wanted.sort_unstable();
    have.sort_unstable();
    wanted == have
}

/// Pass 4 bookkeeping for one composite occurrence; returns its type and
/// reference when it collapses.
fn next_occurrence(
    ctx: &ResolutionContext,
    map: &Mapping,
    slot: Option<&str>,
    counters: &mut HashMap<String, usize>,
) -> Option<(String, String)> {
    if !is_occurrence_slot(slot) {
        return None;
    }
    let type_uri = topic_type(map, slot)?;
    if !ctx.aggregation_only.contains_key(type_uri) {
        return None;
    }
    let counter = counters.entry(type_uri.to_string()).or_insert(0);
    let index = *counter;
    *counter += 1;
    if !ctx.references.contains_key(type_uri) {
        return None;
    }
    let reference = ctx.occurrences.get(type_uri)?.get(index)?.clone()?;
    Some((type_uri.to_string(), reference))
}

fn record_collapse(ctx: &mut ResolutionContext, path: &str, type_uri: String, reference: &str) {
    info!(path, type_uri = %type_uri, reference, "collapsing composite to existing topic");
    ctx.report.substitutions.push(Substitution {
        path: path.to_string(),
        type_uri,
        reference: reference.to_string(),
        kind: SubstitutionKind::Composite,
    });
}
