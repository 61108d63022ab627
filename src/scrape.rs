//! One collection cycle against one target.
//!
//! A [`Scrape`] owns the API session and everything that may be shared
//! between the collectors of a single scrape: the memoized bulk listings and
//! the guest configuration cache. Nothing in here outlives the scrape.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::api::{ApiError, ApiMetrics, InstrumentedApi, PveApi, PveClient, SessionConfig};
use crate::collectors::{
    BackupInfoCollector, ClusterInfoCollector, ClusterNodeCollector, ClusterResourceCollector,
    CollectError, Collector, GuestAgentFilesystemCollector, NodeConfigCollector,
    NodeReplicationCollector, StatusCollector, StorageContentCollector, SubscriptionCollector,
    VersionCollector,
};
use crate::family::{encode_text, MetricFamily};
use crate::options::{CollectorOptions, GuestAgentOptions};
use crate::resources::{
    parse_records, parse_status, ResourceKind, ResourceRecord, StatusEntry,
};

/// Errors that fail a whole scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("cannot open session: {0}")]
    Session(#[source] ApiError),

    #[error("collector '{collector}' failed: {source}")]
    Collect {
        collector: &'static str,
        #[source]
        source: CollectError,
    },

    #[error("cannot encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

/// A guest configuration as returned by `nodes/<n>/<type>/<vmid>/config`.
pub type GuestConfig = Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GuestKey {
    kind: ResourceKind,
    node: String,
    vmid: String,
}

/// Per-scrape guest configuration cache.
///
/// Each key is filled at most once. Concurrent lookups of the same guest wait
/// for the first fetch instead of issuing their own.
#[derive(Default)]
pub struct GuestConfigCache {
    entries: DashMap<GuestKey, Arc<OnceCell<Arc<GuestConfig>>>, ahash::RandomState>,
}

impl GuestConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(
        &self,
        api: &dyn PveApi,
        kind: ResourceKind,
        node: &str,
        vmid: &str,
    ) -> Result<Arc<GuestConfig>, ApiError> {
        let key = GuestKey {
            kind,
            node: node.to_string(),
            vmid: vmid.to_string(),
        };
        // Clone the cell out so no map shard stays locked across the fetch.
        let cell = self.entries.entry(key).or_default().clone();

        let config = cell
            .get_or_try_init(|| async {
                let path = format!("nodes/{}/{}/{}/config", node, kind.as_str(), vmid);
                api.get(&path).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared context of one scrape.
pub struct Scrape {
    api: Arc<dyn PveApi>,
    resources: OnceCell<Vec<ResourceRecord>>,
    status: OnceCell<Vec<StatusEntry>>,
    guest_configs: Arc<GuestConfigCache>,
}

impl Scrape {
    pub fn new(api: Arc<dyn PveApi>) -> Self {
        Self {
            api,
            resources: OnceCell::new(),
            status: OnceCell::new(),
            guest_configs: Arc::new(GuestConfigCache::new()),
        }
    }

    pub fn api(&self) -> &dyn PveApi {
        self.api.as_ref()
    }

    /// Owned handle on the session for spawned tasks.
    pub fn api_handle(&self) -> Arc<dyn PveApi> {
        Arc::clone(&self.api)
    }

    pub fn guest_configs(&self) -> &Arc<GuestConfigCache> {
        &self.guest_configs
    }

    /// `cluster/resources`, fetched once per scrape.
    pub async fn resources(&self) -> Result<&[ResourceRecord], ApiError> {
        let records = self
            .resources
            .get_or_try_init(|| async {
                let path = "cluster/resources";
                let data = self.api.get(path).await?;
                parse_records(data).map_err(|e| ApiError::decode(path, e))
            })
            .await?;
        Ok(records)
    }

    /// `cluster/status`, fetched once per scrape.
    pub async fn status(&self) -> Result<&[StatusEntry], ApiError> {
        let entries = self
            .status
            .get_or_try_init(|| async {
                let path = "cluster/status";
                let data = self.api.get(path).await?;
                parse_status(data).map_err(|e| ApiError::decode(path, e))
            })
            .await?;
        Ok(entries)
    }

    /// Names of all nodes in the resource list, in listing order.
    pub async fn node_names(&self) -> Result<Vec<String>, ApiError> {
        let names = self
            .resources()
            .await?
            .iter()
            .filter_map(|record| match record {
                ResourceRecord::Node(node) => node.node_name().map(str::to_string),
                _ => None,
            })
            .collect();
        Ok(names)
    }
}

/// The two scopes a scrape request can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeScope {
    pub cluster: bool,
    pub node: bool,
}

impl Default for ScrapeScope {
    fn default() -> Self {
        Self {
            cluster: true,
            node: true,
        }
    }
}

/// Builds the collector set for one scrape, in output order.
pub fn select_collectors(
    scrape: &Arc<Scrape>,
    scope: ScrapeScope,
    options: &CollectorOptions,
    guest_agent: &GuestAgentOptions,
) -> Vec<Box<dyn Collector>> {
    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();
    let s = || Arc::clone(scrape);

    if scope.cluster {
        if options.status {
            collectors.push(Box::new(StatusCollector::new(s())));
        }
        if options.resources {
            collectors.push(Box::new(ClusterResourceCollector::new(s())));
        }
        if options.node {
            collectors.push(Box::new(ClusterNodeCollector::new(s())));
        }
        if options.cluster {
            collectors.push(Box::new(ClusterInfoCollector::new(s())));
        }
        if options.version {
            collectors.push(Box::new(VersionCollector::new(s())));
        }
        if options.backup_info {
            collectors.push(Box::new(BackupInfoCollector::new(s())));
        }
    }

    if scope.node {
        if options.qga_fs {
            collectors.push(Box::new(GuestAgentFilesystemCollector::new(
                s(),
                *guest_agent,
            )));
        }
        if options.subscription {
            collectors.push(Box::new(SubscriptionCollector::new(s())));
        }
        if options.config {
            collectors.push(Box::new(NodeConfigCollector::new(s())));
        }
        if options.replication {
            collectors.push(Box::new(NodeReplicationCollector::new(s())));
        }
        if options.storage {
            collectors.push(Box::new(StorageContentCollector::new(s())));
        }
    }

    collectors
}

/// Runs the selected collectors one after another and concatenates their output.
pub async fn collect_families(
    api: Arc<dyn PveApi>,
    scope: ScrapeScope,
    options: &CollectorOptions,
    guest_agent: &GuestAgentOptions,
) -> Result<Vec<MetricFamily>, ScrapeError> {
    let scrape = Arc::new(Scrape::new(api));
    let collectors = select_collectors(&scrape, scope, options, guest_agent);

    let mut families = Vec::new();
    for collector in &collectors {
        let start = Instant::now();
        let mut produced = collector
            .collect()
            .await
            .map_err(|source| ScrapeError::Collect {
                collector: collector.name(),
                source,
            })?;
        debug!(
            "Collector {} produced {} families in {:?}",
            collector.name(),
            produced.len(),
            start.elapsed()
        );
        families.append(&mut produced);
    }
    Ok(families)
}

/// Collects all enabled families from an open session and renders them as text.
pub async fn collect_pve(
    api: Arc<dyn PveApi>,
    scope: ScrapeScope,
    options: &CollectorOptions,
    guest_agent: &GuestAgentOptions,
) -> Result<String, ScrapeError> {
    let families = collect_families(api, scope, options, guest_agent).await?;
    Ok(encode_text(&families)?)
}

/// Opens a session to `target` and runs one scrape.
///
/// Failing to open the session (unreachable target, rejected credentials)
/// fails the scrape.
pub async fn scrape_target(
    target: &str,
    session: &SessionConfig,
    scope: ScrapeScope,
    options: &CollectorOptions,
    guest_agent: &GuestAgentOptions,
    api_metrics: Option<&ApiMetrics>,
) -> Result<String, ScrapeError> {
    let client = PveClient::connect(target, session)
        .await
        .map_err(ScrapeError::Session)?;

    let api: Arc<dyn PveApi> = match api_metrics {
        Some(metrics) => Arc::new(InstrumentedApi::new(client, metrics.clone())),
        None => Arc::new(client),
    };

    let start = Instant::now();
    let text = collect_pve(api, scope, options, guest_agent).await?;
    info!(
        "Scraped {} (cluster={}, node={}) in {:?}",
        target,
        scope.cluster,
        scope.node,
        start.elapsed()
    );
    Ok(text)
}
