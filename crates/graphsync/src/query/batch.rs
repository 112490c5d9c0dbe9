//! A template group replicated over a list of ids via `nodes(ids:)`

use std::sync::atomic::{AtomicU64, Ordering};

use super::cost::{CostModel, MAX_BATCH_IDS};
use super::element::ElementId;
use super::{Element, Fragment, Group};

/// Fetches many unrelated objects in one request
///
/// Only the first `page_size` ids are requested; the rest are carried so the
/// scan can spawn a follow-up batch for them under a fresh alias.
#[derive(Debug, Clone)]
pub struct BatchGroup {
    id: ElementId,
    suffix: u64,
    template: Group,
    ids: Vec<String>,
    page_size: usize,
}

impl BatchGroup {
    pub fn new(template: Group, ids: Vec<String>, page_size: usize) -> Self {
        Self {
            id: ElementId::fresh(),
            suffix: 0,
            template,
            ids,
            page_size: page_size.clamp(1, MAX_BATCH_IDS),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        "nodes"
    }

    /// Response key for this batch's page
    pub fn alias(&self) -> String {
        if self.suffix == 0 {
            "nodes".to_string()
        } else {
            format!("nodes{}", self.suffix)
        }
    }

    pub fn template(&self) -> &Group {
        &self.template
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Ids requested by this batch's query
    pub fn page(&self) -> &[String] {
        &self.ids[..self.page_size.min(self.ids.len())]
    }

    /// Ids left for later batches
    pub fn remaining(&self) -> &[String] {
        &self.ids[self.page_size.min(self.ids.len())..]
    }

    /// A batch over the ids this one did not request, or `None` when exhausted
    pub fn remainder(&self) -> Option<BatchGroup> {
        static NEXT_SUFFIX: AtomicU64 = AtomicU64::new(1);
        let rest = self.remaining();
        if rest.is_empty() {
            return None;
        }
        Some(Self {
            id: ElementId::fresh(),
            suffix: NEXT_SUFFIX.fetch_add(1, Ordering::Relaxed),
            template: self.template.clone(),
            ids: rest.to_vec(),
            page_size: self.page_size,
        })
    }

    pub fn query_text(&self) -> String {
        let ids: Vec<String> = self.page().iter().map(|id| format!("\"{id}\"")).collect();
        let fields: Vec<String> = self.template.fields().iter().map(Element::query_text).collect();
        let call = format!(
            "nodes(ids: [{}]) {{ __typename {} }}",
            ids.join(","),
            fields.join(" ")
        );
        if self.suffix == 0 {
            call
        } else {
            format!("{}: {call}", self.alias())
        }
    }

    pub fn fragments(&self) -> Vec<Fragment> {
        self.template.fragments()
    }

    pub fn node_cost_with(&self, model: &dyn CostModel) -> u64 {
        let count = self.page().len() as u64;
        count + count * self.template.node_cost_with(model)
    }

    /// Narrow to the single batch item holding `target`
    pub(crate) fn as_shell(&self, target: &Element, batch_root: Option<&str>) -> Option<BatchGroup> {
        let root = batch_root?;
        let template = self.template.as_shell(target)?;
        Some(Self {
            id: self.id,
            suffix: self.suffix,
            template,
            ids: vec![root.to_string()],
            page_size: 1,
        })
    }
}
