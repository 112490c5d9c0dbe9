//! Fields that yield nested objects or connections

use super::cost::CostModel;
use super::element::{shell_children, ElementId};
use super::{Element, Fragment};

/// How a group's connection is paged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// Plain nested object or list
    None,
    /// `first: count`; with `paging` the cursor and `pageInfo` are requested
    First { count: u32, paging: bool },
    /// `last: count`, never followed up
    Last(u32),
    /// As many pages of 100 as the server has
    Max,
}

impl Paging {
    /// `first: count` with cursor following enabled
    pub fn first(count: u32) -> Self {
        Paging::First {
            count,
            paging: true,
        }
    }

    fn requests_cursor(&self) -> bool {
        matches!(self, Paging::Max | Paging::First { paging: true, .. })
    }
}

/// An extra argument rendered into the group's parentheses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    /// Values starting with `[` or `{` are rendered raw, others quoted
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn render(&self) -> String {
        if self.value.starts_with('[') || self.value.starts_with('{') {
            format!("{}: {}", self.name, self.value)
        } else {
            format!("{}: \"{}\"", self.name, self.value)
        }
    }
}

/// A field yielding a nested object, list or connection
#[derive(Debug, Clone)]
pub struct Group {
    id: ElementId,
    name: String,
    fields: Vec<Element>,
    paging: Paging,
    params: Vec<Param>,
    last_cursor: Option<String>,
}

impl Group {
    pub fn new(name: impl Into<String>, fields: Vec<Element>) -> Self {
        Self {
            id: ElementId::fresh(),
            name: name.into(),
            fields,
            paging: Paging::None,
            params: Vec::new(),
            last_cursor: None,
        }
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    /// Same group (same identity) asking for the page after `cursor`
    pub fn with_cursor(&self, cursor: impl Into<String>) -> Self {
        Self {
            last_cursor: Some(cursor.into()),
            ..self.clone()
        }
    }

    fn with_fields(&self, fields: Vec<Element>) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            fields,
            paging: self.paging,
            params: self.params.clone(),
            last_cursor: self.last_cursor.clone(),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Element] {
        &self.fields
    }

    pub fn paging(&self) -> Paging {
        self.paging
    }

    pub fn last_cursor(&self) -> Option<&str> {
        self.last_cursor.as_deref()
    }

    pub fn node_cost_with(&self, model: &dyn CostModel) -> u64 {
        let field_cost: u64 = self.fields.iter().map(|f| f.node_cost_with(model)).sum();
        match model.page_multiplier(&self.paging) {
            None => field_cost,
            Some(count) => count + field_cost * count,
        }
    }

    pub fn query_text(&self) -> String {
        let mut arguments = Vec::new();
        match self.paging {
            Paging::None => {}
            Paging::Last(count) => arguments.push(format!("last: {count}")),
            Paging::Max => arguments.push("first: 100".to_string()),
            Paging::First { count, .. } => arguments.push(format!("first: {count}")),
        }
        if self.paging.requests_cursor()
            && let Some(cursor) = &self.last_cursor
        {
            arguments.push(format!("after: \"{cursor}\""));
        }
        arguments.extend(self.params.iter().map(Param::render));

        let mut text = self.name.clone();
        if !arguments.is_empty() {
            text.push('(');
            text.push_str(&arguments.join(", "));
            text.push(')');
        }

        let field_text: Vec<String> = self.fields.iter().map(Element::query_text).collect();
        let fields = format!("__typename {}", field_text.join(" "));

        match self.paging {
            Paging::None => text.push_str(&format!(" {{ {fields} }}")),
            Paging::Max | Paging::First { paging: true, .. } => text.push_str(&format!(
                " {{ edges {{ node {{ {fields} }} cursor }} pageInfo {{ hasNextPage }} }}"
            )),
            Paging::First { paging: false, .. } | Paging::Last(_) => {
                text.push_str(&format!(" {{ edges {{ node {{ {fields} }} }} }}"))
            }
        }
        text
    }

    pub fn fragments(&self) -> Vec<Fragment> {
        self.fields.iter().flat_map(Element::fragments).collect()
    }

    pub(crate) fn as_shell(&self, target: &Element) -> Option<Group> {
        shell_children(&self.fields, target).map(|kept| self.with_fields(kept))
    }
}
