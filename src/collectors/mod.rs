//! Collectors translating control-plane data into metric families.
//!
//! Every collector is built for one scrape, owns one API surface and returns
//! all of its declared families, empty ones included. Only the failure of a
//! collector's primary call (or a contract violation) is returned as an
//! error; failures scoped to a single node, storage or guest are logged and
//! the entity is left out.

pub mod cluster;
pub mod guest_agent;
pub mod node;
pub mod state;
pub mod storage;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::api::ApiError;
use crate::family::MetricFamily;

pub use cluster::{
    BackupInfoCollector, ClusterInfoCollector, ClusterNodeCollector, ClusterResourceCollector,
    StatusCollector, VersionCollector,
};
pub use guest_agent::GuestAgentFilesystemCollector;
pub use node::{NodeConfigCollector, NodeReplicationCollector, SubscriptionCollector};
pub use storage::StorageContentCollector;

/// Errors that abort a collector.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("got unexpected status entry type '{0}'")]
    UnexpectedStatusEntry(String),
}

/// Future returned by [`Collector::collect`].
pub type CollectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<MetricFamily>, CollectError>> + Send + 'a>>;

/// One source of metric families.
pub trait Collector: Send + Sync {
    /// Short name used in logs, matches the `--collector.<name>` toggle.
    fn name(&self) -> &'static str;

    fn collect(&self) -> CollectFuture<'_>;
}
