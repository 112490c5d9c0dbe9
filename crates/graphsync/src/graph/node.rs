//! Parsed response objects

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Identity of a node within one scan pass
///
/// The same object id seen under two different parents is two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub id: String,
    pub parent_id: Option<String>,
}

impl NodeKey {
    pub fn new(id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            parent_id,
        }
    }
}

/// Reconciliation marks set on a node during a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// The node was not eligible to become an entity; its children are skipped too
    pub creation_skipped: bool,
    /// An entity was created from this node
    pub created: bool,
    /// The matching entity changed
    pub updated: bool,
    /// Treat the matching entity as changed even if no watched field moved
    pub forced_update: bool,
}

/// One response object carrying both `__typename` and `id`
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub element_type: String,
    pub payload: Map<String, Value>,
    pub parent: Option<NodeKey>,
    pub flags: NodeFlags,
}

impl Node {
    /// Build a node from a response object, or `None` for a plain container
    ///
    /// Nested connections are dropped from the payload; their objects become
    /// nodes of their own.
    pub fn from_payload(object: &Map<String, Value>, parent: Option<&NodeKey>) -> Option<Node> {
        let element_type = object.get("__typename")?.as_str()?;
        let id = object.get("id")?.as_str()?;
        let payload = object
            .iter()
            .filter(|(_, value)| !is_connection(value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Node {
            id: id.to_string(),
            element_type: element_type.to_string(),
            payload,
            parent: parent.cloned(),
            flags: NodeFlags::default(),
        })
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(
            self.id.clone(),
            self.parent.as_ref().map(|p| p.id.clone()),
        )
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.id.as_str())
    }

    pub fn value_at(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.payload.get(*first)?;
        for key in rest {
            value = value.get(*key)?;
        }
        Some(value)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.payload.get(key)?.as_str()
    }

    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.value_at(path)?.as_str()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key)?.as_bool()
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key)?.as_i64()
    }

    /// An RFC 3339 timestamp field
    pub fn date(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.str(key)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn is_connection(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("edges"))
}
