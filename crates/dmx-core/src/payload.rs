//! Payload tree for a topic that is about to be created.
//!
//! The wire form is plain JSON in the topic-graph store's topic model:
//!
//! ```text
//! {
//!   "type_uri": "dm4.contacts.person",
//!   "childs": {
//!     "dm4.contacts.person_name": { "childs": { "dm4.contacts.first_name": "Ada" } },
//!     "dm4.contacts.phone_number#dm4.contacts.phone_entry": [ { "value": "555-0100" } ]
//!   }
//! }
//! ```
//!
//! Mappings are kept key-sorted, which is also the order every pass walks them.

use crate::error::ResolveError;
use crate::store::TopicId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const VALUE_KEY: &str = "value";
pub const TYPE_KEY: &str = "type";
pub const TYPE_URI_KEY: &str = "type_uri";
pub const CHILDS_KEY: &str = "childs";
pub const ASSOC_KEY: &str = "assoc";
pub const ID_KEY: &str = "id";
pub const URI_KEY: &str = "uri";

pub const REF_ID_PREFIX: &str = "ref_id:";
pub const REF_URI_PREFIX: &str = "ref_uri:";

/// Keys that describe the topic itself rather than naming a child slot.
pub fn is_structural_key(key: &str) -> bool {
    matches!(
        key,
        VALUE_KEY | TYPE_KEY | TYPE_URI_KEY | CHILDS_KEY | ASSOC_KEY | ID_KEY | URI_KEY
    )
}

/// Strip a `#relation` qualifier from a child slot key.
pub fn base_type_uri(key: &str) -> &str {
    match key.split_once('#') {
        Some((type_uri, _)) => type_uri,
        None => key,
    }
}

pub type Mapping = BTreeMap<String, PayloadNode>;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

/// `ref_id:<id>` marker for an existing topic.
pub fn ref_id(topic_id: TopicId) -> String {
    format!("{REF_ID_PREFIX}{topic_id}")
}

impl Scalar {
    pub fn reference(topic_id: TopicId) -> Self {
        Scalar::Text(ref_id(topic_id))
    }

    /// `ref_id:` / `ref_uri:` markers point at existing topics.
    pub fn is_reference(&self) -> bool {
        match self {
            Scalar::Text(s) => s.starts_with(REF_ID_PREFIX) || s.starts_with(REF_URI_PREFIX),
            _ => false,
        }
    }

    /// Text used to compare against stored topic values. `Null` has none.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(b) => Some(Cow::Owned(b.to_string())),
            Scalar::Number(n) => Some(Cow::Owned(n.to_string())),
            Scalar::Text(s) => Some(Cow::Borrowed(s.as_str())),
        }
    }

    /// Comparison text for a plain (non-reference, non-null) value.
    pub fn plain_text(&self) -> Option<Cow<'_, str>> {
        if self.is_reference() {
            None
        } else {
            self.text()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum PayloadNode {
    Scalar(Scalar),
    Mapping(Mapping),
    Sequence(Vec<PayloadNode>),
}

impl PayloadNode {
    pub fn text(s: impl Into<String>) -> Self {
        PayloadNode::Scalar(Scalar::Text(s.into()))
    }

    pub fn reference(reference: impl Into<String>) -> Self {
        Self::text(reference)
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            PayloadNode::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            PayloadNode::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Follow a `/`-separated path of mapping keys and sequence indices.
    pub fn pointer(&self, path: &str) -> Option<&PayloadNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match node {
                PayloadNode::Mapping(map) => map.get(segment),
                PayloadNode::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                PayloadNode::Scalar(_) => None,
            })
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }

    /// Indented JSON with sorted keys.
    pub fn to_pretty_json(&self) -> Result<String, ResolveError> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }
}

impl From<Value> for PayloadNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PayloadNode::Scalar(Scalar::Null),
            Value::Bool(b) => PayloadNode::Scalar(Scalar::Bool(b)),
            Value::Number(n) => PayloadNode::Scalar(Scalar::Number(n)),
            Value::String(s) => PayloadNode::Scalar(Scalar::Text(s)),
            Value::Array(items) => {
                PayloadNode::Sequence(items.into_iter().map(PayloadNode::from).collect())
            }
            Value::Object(obj) => PayloadNode::Mapping(
                obj.into_iter()
                    .map(|(k, v)| (k, PayloadNode::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<PayloadNode> for Value {
    fn from(node: PayloadNode) -> Self {
        match node {
            PayloadNode::Scalar(Scalar::Null) => Value::Null,
            PayloadNode::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            PayloadNode::Scalar(Scalar::Number(n)) => Value::Number(n),
            PayloadNode::Scalar(Scalar::Text(s)) => Value::String(s),
            PayloadNode::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            PayloadNode::Mapping(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Parse a topic payload. The root must be a non-empty mapping.
pub fn parse_payload(text: &str) -> Result<PayloadNode, ResolveError> {
    let value: Value = serde_json::from_str(text)?;
    match PayloadNode::from(value) {
        PayloadNode::Mapping(map) if map.is_empty() => Err(ResolveError::InvalidPayload(
            "payload has no data".to_string(),
        )),
        node @ PayloadNode::Mapping(_) => Ok(node),
        _ => Err(ResolveError::InvalidPayload(
            "payload root must be a JSON object describing one topic".to_string(),
        )),
    }
}

/// A topic's child slots: its own non-structural entries plus the entries of
/// its `childs` container.
pub(crate) fn fields<'a>(map: &'a Mapping) -> impl Iterator<Item = (&'a str, &'a PayloadNode)> + 'a {
    map.iter().flat_map(
        |(key, node)| -> Box<dyn Iterator<Item = (&'a str, &'a PayloadNode)> + 'a> {
            if key == CHILDS_KEY {
                if let PayloadNode::Mapping(inner) = node {
                    return Box::new(inner.iter().map(|(k, v)| (k.as_str(), v)));
                }
            }
            if is_structural_key(key) {
                return Box::new(std::iter::empty());
            }
            Box::new(std::iter::once((key.as_str(), node)))
        },
    )
}

/// Mutable counterpart of [`fields`]; the flag is set for slots found inside
/// the `childs` container.
pub(crate) fn fields_mut<'a>(
    map: &'a mut Mapping,
) -> impl Iterator<Item = (bool, &'a str, &'a mut PayloadNode)> + 'a {
    map.iter_mut().flat_map(
        |(key, node)| -> Box<dyn Iterator<Item = (bool, &'a str, &'a mut PayloadNode)> + 'a> {
            if key == CHILDS_KEY {
                if let PayloadNode::Mapping(inner) = node {
                    return Box::new(inner.iter_mut().map(|(k, v)| (true, k.as_str(), v)));
                }
                return Box::new(std::iter::empty());
            }
            if is_structural_key(key) {
                return Box::new(std::iter::empty());
            }
            Box::new(std::iter::once((false, key.as_str(), node)))
        },
    )
}

/// The type a topic mapping declares itself (`type_uri` / `type`), if any.
pub(crate) fn declared_type(map: &Mapping) -> Option<&str> {
    [TYPE_URI_KEY, TYPE_KEY].iter().find_map(|key| match map.get(*key) {
        Some(PayloadNode::Scalar(Scalar::Text(s))) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    })
}

/// The type of a topic mapping sitting in `slot`: its declared type, or the
/// slot's base type when the slot names a child.
pub(crate) fn topic_type<'a>(map: &'a Mapping, slot: Option<&'a str>) -> Option<&'a str> {
    declared_type(map).or_else(|| {
        slot.filter(|s| !is_structural_key(s))
            .map(base_type_uri)
    })
}

pub(crate) fn join_path(path: &str, in_childs: bool, key: &str) -> String {
    if in_childs {
        format!("{path}/{CHILDS_KEY}/{key}")
    } else {
        format!("{path}/{key}")
    }
}
