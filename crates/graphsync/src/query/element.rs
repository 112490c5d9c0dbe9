//! The element sum type shared by every node of a query tree

use std::sync::atomic::{AtomicU64, Ordering};

use super::cost::CostModel;
use super::{BatchGroup, Fragment, Group};

/// Stable identity of a query element
///
/// Clones made for follow-up queries (a group with a cursor, a pruned shell)
/// keep the identity of the element they were made from, so a shell can be
/// matched against the original tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(u64);

impl ElementId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A plain scalar field
#[derive(Debug, Clone)]
pub struct Field {
    id: ElementId,
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ElementId::fresh(),
            name: name.into(),
        }
    }

    /// The `id` field, present on every object that becomes a node
    pub fn id() -> Self {
        Self::new("id")
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One element of a query tree
#[derive(Debug, Clone)]
pub enum Element {
    Field(Field),
    Fragment(Fragment),
    Group(Group),
    Batch(BatchGroup),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Field(f) => f.id,
            Element::Fragment(f) => f.id(),
            Element::Group(g) => g.id(),
            Element::Batch(b) => b.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Element::Field(f) => f.name(),
            Element::Fragment(f) => f.name(),
            Element::Group(g) => g.name(),
            Element::Batch(b) => b.name(),
        }
    }

    /// Key under which this element's data appears in a response object
    pub fn response_key(&self) -> String {
        match self {
            Element::Batch(b) => b.alias(),
            other => other.name().to_string(),
        }
    }

    /// Text of this element as it appears inside a selection set
    pub fn query_text(&self) -> String {
        match self {
            Element::Field(f) => f.name.clone(),
            Element::Fragment(f) => f.query_text(),
            Element::Group(g) => g.query_text(),
            Element::Batch(b) => b.query_text(),
        }
    }

    /// Fragments this element needs declared, transitively, in first-use order
    ///
    /// May contain repeats; the query deduplicates by name when hoisting.
    pub fn fragments(&self) -> Vec<Fragment> {
        match self {
            Element::Field(_) => Vec::new(),
            Element::Fragment(f) => f.fragments(),
            Element::Group(g) => g.fragments(),
            Element::Batch(b) => b.fragments(),
        }
    }

    /// Estimated node cost using the default worst-case model
    pub fn node_cost(&self) -> u64 {
        self.node_cost_with(&super::cost::WorstCase::default())
    }

    pub fn node_cost_with(&self, model: &dyn CostModel) -> u64 {
        match self {
            Element::Field(_) => 0,
            Element::Fragment(f) => f.node_cost_with(model),
            Element::Group(g) => g.node_cost_with(model),
            Element::Batch(b) => b.node_cost_with(model),
        }
    }

    /// Copy of this element pruned down to the path that leads to `target`
    ///
    /// Returns `None` when `target` is not reachable from here. When the
    /// element is `target` itself (by identity), `target` is returned, which
    /// is how a cursor-carrying clone replaces the original in the shell.
    /// `batch_root` narrows a batch to the single id whose subtree holds
    /// the target.
    pub fn as_shell(&self, target: &Element, batch_root: Option<&str>) -> Option<Element> {
        if self.id() == target.id() {
            return Some(target.clone());
        }
        match self {
            Element::Field(_) => None,
            Element::Fragment(f) => f.as_shell(target).map(Element::Fragment),
            Element::Group(g) => g.as_shell(target).map(Element::Group),
            Element::Batch(b) => b.as_shell(target, batch_root).map(Element::Batch),
        }
    }

    pub(crate) fn is_id_field(&self) -> bool {
        matches!(self, Element::Field(f) if f.name == "id")
    }
}

/// Prune a list of child elements for a shell, keeping the `id` field so
/// objects along the path still resolve to nodes
pub(crate) fn shell_children(elements: &[Element], target: &Element) -> Option<Vec<Element>> {
    let mut kept: Vec<Element> = elements
        .iter()
        .filter_map(|e| e.as_shell(target, None))
        .collect();
    if kept.is_empty() {
        return None;
    }
    if !kept.iter().any(Element::is_id_field)
        && let Some(id_field) = elements.iter().find(|e| e.is_id_field())
    {
        kept.insert(0, id_field.clone());
    }
    Some(kept)
}

impl From<Field> for Element {
    fn from(f: Field) -> Self {
        Element::Field(f)
    }
}

impl From<Fragment> for Element {
    fn from(f: Fragment) -> Self {
        Element::Fragment(f)
    }
}

impl From<Group> for Element {
    fn from(g: Group) -> Self {
        Element::Group(g)
    }
}

impl From<BatchGroup> for Element {
    fn from(b: BatchGroup) -> Self {
        Element::Batch(b)
    }
}

impl From<&str> for Element {
    fn from(name: &str) -> Self {
        Element::Field(Field::new(name))
    }
}

/// Build a `Vec<Element>` from anything convertible into an element
///
/// ```ignore
/// let fields = elements![Field::id(), "login", "avatarUrl"];
/// ```
#[macro_export]
macro_rules! elements {
    ($($e:expr),* $(,)?) => {
        vec![$($crate::query::Element::from($e)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_renders_its_name() {
        let field: Element = Field::new("login").into();
        assert_eq!(field.query_text(), "login");
        assert!(field.fragments().is_empty());
        assert_eq!(field.node_cost(), 0);
    }

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = Field::new("a");
        let b = Field::new("a");
        assert_ne!(Element::from(a).id(), Element::from(b).id());
    }

    #[test]
    fn test_field_shell_only_matches_itself() {
        let field: Element = Field::new("title").into();
        let other: Element = Field::new("title").into();
        assert!(field.as_shell(&other, None).is_none());
        assert!(field.as_shell(&field, None).is_some());
    }
}
