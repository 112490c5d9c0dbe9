//! One GraphQL round trip: a root element plus how to scope and scan it

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::graph::{AlreadyParsed, Node, NodeKey};
use crate::query::{BatchGroup, Element, Group, recommended_limit};

/// Called for every node as it is discovered, before its children are scanned
///
/// Returning [`AlreadyParsed`] stops the current page: the node's children
/// are skipped and no further page is requested.
pub type PerNode = Arc<dyn Fn(&Node) -> std::result::Result<(), AlreadyParsed> + Send + Sync>;

const RATE_LIMIT_FIELD: &str = "rateLimit { limit cost remaining resetAt nodeCount }";

/// An object from an earlier pass that a query is scoped under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub key: NodeKey,
    pub element_type: String,
}

impl ParentRef {
    pub fn new(id: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            key: NodeKey::new(id, None),
            element_type: element_type.into(),
        }
    }

    pub fn of(node: &Node) -> Self {
        Self {
            key: node.key(),
            element_type: node.element_type.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Query {
    name: String,
    root: Element,
    parent: Option<ParentRef>,
    allows_empty_response: bool,
    per_node: Option<PerNode>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("root", &self.root.name())
            .field("parent", &self.parent)
            .field("allows_empty_response", &self.allows_empty_response)
            .finish()
    }
}

impl Query {
    pub fn new(name: impl Into<String>, root: impl Into<Element>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            parent: None,
            allows_empty_response: false,
            per_node: None,
        }
    }

    /// Render the root under `node(id:)` for an object from an earlier pass
    pub fn scoped_to(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Accept a response without the root element instead of failing
    pub fn allowing_empty_response(mut self) -> Self {
        self.allows_empty_response = true;
        self
    }

    pub fn with_per_node(mut self, per_node: Option<PerNode>) -> Self {
        self.per_node = per_node;
        self
    }

    /// Same query with a different root, as used for next pages and remainders
    pub fn follow_up(&self, root: Element) -> Query {
        Query {
            name: self.name.clone(),
            root,
            parent: self.parent.clone(),
            allows_empty_response: self.allows_empty_response,
            per_node: self.per_node.clone(),
        }
    }

    /// Partition `ids` into batch queries, each within `max_cost`
    ///
    /// Produces `ceil(ids.len() / limit)` queries whose id pages do not
    /// overlap, where the limit comes from the template's estimated cost.
    pub fn batching(
        name: &str,
        ids: &[String],
        max_cost: u64,
        per_node: Option<PerNode>,
        fields: Vec<Element>,
    ) -> Vec<Query> {
        let template = Group::new("items", fields);
        let cost = Element::Group(template.clone()).node_cost();
        let limit = recommended_limit(cost, max_cost);
        ids.chunks(limit)
            .map(|chunk| {
                let batch = BatchGroup::new(template.clone(), chunk.to_vec(), limit);
                Query::new(name, batch).with_per_node(per_node.clone())
            })
            .collect()
    }

    /// A single batch query that requests its remaining ids as it goes
    ///
    /// Each response spawns the query for the next page of ids, so only one
    /// page is in flight at a time.
    pub fn batch_chain(
        name: &str,
        ids: &[String],
        max_cost: u64,
        per_node: Option<PerNode>,
        fields: Vec<Element>,
    ) -> Option<Query> {
        if ids.is_empty() {
            return None;
        }
        let template = Group::new("items", fields);
        let cost = Element::Group(template.clone()).node_cost();
        let limit = recommended_limit(cost, max_cost);
        let batch = BatchGroup::new(template, ids.to_vec(), limit);
        Some(Query::new(name, batch).with_per_node(per_node))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    pub fn allows_empty_response(&self) -> bool {
        self.allows_empty_response
    }

    pub fn per_node(&self) -> Option<&PerNode> {
        self.per_node.as_ref()
    }

    pub fn log_prefix(&self) -> String {
        format!("(GQL '{}') ", self.name)
    }

    pub fn expected_node_cost(&self) -> u64 {
        self.root.node_cost()
    }

    fn root_text(&self) -> String {
        match &self.parent {
            Some(parent) => format!(
                "node(id: \"{}\") {{ ... on {} {{ {} }} }}",
                parent.key.id,
                parent.element_type,
                self.root.query_text()
            ),
            None => self.root.query_text(),
        }
    }

    /// Full request text: hoisted fragments, then the root and rate limit
    pub fn query_text(&self) -> String {
        let mut seen = HashSet::new();
        let declarations: Vec<String> = self
            .root
            .fragments()
            .into_iter()
            .filter(|f| seen.insert(f.name().to_string()))
            .map(|f| f.declaration())
            .collect();

        let body = format!("{{ {} {RATE_LIMIT_FIELD} }}", self.root_text());
        if declarations.is_empty() {
            body
        } else {
            format!("{} {body}", declarations.join(" "))
        }
    }

    /// Find this query's data in a response
    ///
    /// `Ok(None)` means the root is absent and the query allows that.
    pub(crate) fn locate_root_data<'a>(&self, response: &'a Value) -> Result<Option<&'a Value>> {
        let all_data = response.get("data").filter(|d| d.is_object());
        let data = match &self.parent {
            Some(_) => all_data.and_then(|d| d.get("node")).filter(|d| d.is_object()),
            None => all_data,
        };

        let Some(data) = data else {
            return Err(server_error(response, &self.log_prefix()));
        };

        if matches!(self.root, Element::Fragment(_)) {
            return Ok(Some(data));
        }

        match data.get(self.root.response_key()) {
            Some(value) if !value.is_null() => Ok(Some(value)),
            _ if self.allows_empty_response => Ok(None),
            _ => Err(SyncError::MalformedResponse(format!(
                "{}No data in JSON",
                self.log_prefix()
            ))),
        }
    }
}

/// Error for a response without usable `data`
fn server_error(response: &Value, prefix: &str) -> SyncError {
    if let Some(errors) = response.get("errors").and_then(Value::as_array) {
        let message = errors
            .first()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unspecified server error: {response}"));
        return SyncError::graph_server(message);
    }
    if let Some(message) = response.get("message").and_then(Value::as_str) {
        return SyncError::graph_server(format!("{prefix}{message}"));
    }
    SyncError::MalformedResponse(format!("{prefix}Response has neither data nor errors"))
}
