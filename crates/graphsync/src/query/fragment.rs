//! Named, type-scoped field subsets

use super::cost::CostModel;
use super::element::{shell_children, ElementId};
use super::Element;

/// A fragment declared once at the top of the query and spread by name
#[derive(Debug, Clone)]
pub struct Fragment {
    id: ElementId,
    name: String,
    on_type: String,
    elements: Vec<Element>,
}

impl Fragment {
    /// Fragment named after its type, e.g. `pullrequestFragment`
    pub fn on(on_type: impl Into<String>, elements: Vec<Element>) -> Self {
        let on_type = on_type.into();
        let name = format!("{}Fragment", on_type.to_lowercase());
        Self::named(name, on_type, elements)
    }

    /// Fragment with an explicit name, for when one type needs two selections
    pub fn named(name: impl Into<String>, on_type: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            id: ElementId::fresh(),
            name: name.into(),
            on_type: on_type.into(),
            elements,
        }
    }

    fn cloning(&self, elements: Vec<Element>) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            on_type: self.on_type.clone(),
            elements,
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_type(&self) -> &str {
        &self.on_type
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// The spread used inside a selection set
    pub fn query_text(&self) -> String {
        format!("... {}", self.name)
    }

    /// The hoisted declaration text
    pub fn declaration(&self) -> String {
        let body: Vec<String> = self.elements.iter().map(Element::query_text).collect();
        format!(
            "fragment {} on {} {{ __typename {} }}",
            self.name,
            self.on_type,
            body.join(" ")
        )
    }

    pub fn fragments(&self) -> Vec<Fragment> {
        let mut res = vec![self.clone()];
        for element in &self.elements {
            res.extend(element.fragments());
        }
        res
    }

    pub fn node_cost_with(&self, model: &dyn CostModel) -> u64 {
        self.elements.iter().map(|e| e.node_cost_with(model)).sum()
    }

    pub(crate) fn as_shell(&self, target: &Element) -> Option<Fragment> {
        shell_children(&self.elements, target).map(|kept| self.cloning(kept))
    }
}
