//! GraphQL client: queries, transport, retry and follow-up execution

mod cancel;
mod executor;
mod query;
mod stats;
mod transport;

pub use cancel::{CancelHandle, CancelToken};
pub use executor::{BoxFuture, Executor, ExecutorSettings, RunOutput};
pub use query::{ParentRef, PerNode, Query};
pub use stats::{ApiStats, migrated_ids};
pub use transport::{GraphRequest, HttpResponse, Transport, UreqTransport};
