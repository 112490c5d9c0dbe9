//! Declarative query trees
//!
//! A query is described as a tree of [`Element`]s. Every element renders its
//! own text and reports the fragments it needs hoisted to the top of the
//! request. Groups and batches carry a stable identity so follow-up queries
//! can be cut down to a "shell" holding only the branch that needs more data.

mod batch;
pub mod catalog;
pub mod cost;
mod element;
mod fragment;
mod group;

pub use batch::BatchGroup;
pub use cost::{CostModel, WorstCase, recommended_limit};
pub use element::{Element, ElementId, Field};
pub(crate) use element::shell_children;
pub use fragment::Fragment;
pub use group::{Group, Paging, Param};
