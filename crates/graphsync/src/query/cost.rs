//! Node cost estimation
//!
//! The GraphQL server charges by the number of nodes a query may return.
//! A paged group with an exact count is charged exactly; `.max` paging has
//! no known bound up front, so the estimate falls back to a model.

use super::Paging;

/// Largest number of ids the server accepts in one `nodes(ids:)` call
pub const MAX_BATCH_IDS: usize = 100;

/// Strategy for turning a paging mode into a node multiplier
pub trait CostModel: Send + Sync {
    /// Multiplier for a paged group, `None` for an unpaged one
    fn page_multiplier(&self, paging: &Paging) -> Option<u64>;
}

/// Exact counts for `first`/`last`, a fixed worst case for `max`
#[derive(Debug, Clone, Copy)]
pub struct WorstCase {
    pub max_multiplier: u64,
}

impl Default for WorstCase {
    fn default() -> Self {
        Self { max_multiplier: 100 }
    }
}

impl CostModel for WorstCase {
    fn page_multiplier(&self, paging: &Paging) -> Option<u64> {
        match paging {
            Paging::None => None,
            Paging::First { count, .. } | Paging::Last(count) => Some(u64::from(*count)),
            Paging::Max => Some(self.max_multiplier),
        }
    }
}

/// How many batch items fit in `max_cost` given one item's estimated cost
pub fn recommended_limit(item_cost: u64, max_cost: u64) -> usize {
    if item_cost == 0 {
        return MAX_BATCH_IDS;
    }
    let fits = (max_cost / item_cost) as usize;
    fits.clamp(1, MAX_BATCH_IDS)
}
