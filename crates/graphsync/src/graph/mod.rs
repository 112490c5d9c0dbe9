//! Deduplicated graph of the objects a scan pass discovered
//!
//! Nodes live in an arena indexed by [`NodeKey`]; parent links are keys,
//! not references, and a graph lives for one pass. Concurrent query tasks
//! each fill their own graph, which are merged once the tasks have joined.

mod node;
pub(crate) mod scan;

use std::collections::HashMap;

pub use node::{Node, NodeFlags, NodeKey};

/// Signal that a node was already handled this pass, or that the caller
/// wants the current page to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("node already parsed")]
pub struct AlreadyParsed;

/// Arena of nodes in discovery order
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeKey, usize>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.index.contains_key(key)
    }

    /// Record a node, refusing a second node with the same key
    pub fn insert(&mut self, node: Node) -> Result<(), AlreadyParsed> {
        let key = node.key();
        if self.index.contains_key(&key) {
            return Err(AlreadyParsed);
        }
        self.index.insert(key, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Node> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, key: &NodeKey) -> Option<&mut Node> {
        self.index.get(key).map(|&i| &mut self.nodes[i])
    }

    /// The node's parent, when the parent was discovered in this pass
    ///
    /// Parent-scoped queries hang their nodes under an object from an
    /// earlier pass, which is not in the graph.
    pub fn parent(&self, node: &Node) -> Option<&Node> {
        node.parent.as_ref().and_then(|key| self.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Keys of all nodes with the given `__typename`, in discovery order
    pub fn keys_of_type(&self, element_type: &str) -> Vec<NodeKey> {
        self.nodes
            .iter()
            .filter(|n| n.element_type == element_type)
            .map(Node::key)
            .collect()
    }

    pub fn of_type<'a>(&'a self, element_type: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.element_type == element_type)
    }

    /// Merge another task's graph into this one
    ///
    /// The first copy of a key wins. Returns how many duplicates were dropped.
    pub fn absorb(&mut self, other: NodeGraph) -> usize {
        let mut dropped = 0;
        for node in other.nodes {
            if self.insert(node).is_err() {
                dropped += 1;
            }
        }
        dropped
    }
}
