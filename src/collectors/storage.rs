//! Volume listings of available storages.

use std::sync::Arc;

use serde::Deserialize;
use tracing::error;

use super::{CollectError, CollectFuture, Collector};
use crate::api::{get_as, ApiError};
use crate::family::{Family, MetricFamily};
use crate::resources::{lenient, ResourceRecord};
use crate::scrape::Scrape;

const CONTENT_LABELS: [&str; 5] = ["node", "storage", "vmid", "content", "volid"];

#[derive(Debug, Deserialize)]
struct Verification {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Volume {
    #[serde(default)]
    volid: String,
    #[serde(default)]
    content: String,
    #[serde(default, deserialize_with = "lenient::text")]
    vmid: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    ctime: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    size: Option<f64>,
    #[serde(default)]
    verification: Option<Verification>,
}

struct ContentFamilies {
    ctime: Family<5>,
    size: Family<5>,
    verification: Family<6>,
}

impl ContentFamilies {
    fn new() -> Self {
        Self {
            ctime: Family::gauge(
                "pve_storage_contents_ctime",
                "Proxmox storage contents ctime",
                CONTENT_LABELS,
            ),
            size: Family::gauge(
                "pve_storage_contents_bytes",
                "Proxmox storage contents size in bytes",
                CONTENT_LABELS,
            ),
            verification: Family::gauge(
                "pve_storage_contents_verification",
                "Proxmox storage contents verification state",
                ["node", "storage", "vmid", "content", "volid", "state"],
            ),
        }
    }

    fn merge(&mut self, other: ContentFamilies) {
        self.ctime.merge(other.ctime);
        self.size.merge(other.size);
        self.verification.merge(other.verification);
    }

    fn record_volume(&mut self, node: &str, storage: &str, volume: &Volume) {
        let vmid = volume.vmid.as_deref().unwrap_or_default();
        let labels = [node, storage, vmid, volume.content.as_str(), volume.volid.as_str()];

        if let Some(ctime) = volume.ctime {
            self.ctime.add(labels, ctime);
        }
        if let Some(size) = volume.size {
            self.size.add(labels, size);
        }
        if let Some(verification) = &volume.verification {
            self.verification.add(
                [
                    node,
                    storage,
                    vmid,
                    volume.content.as_str(),
                    volume.volid.as_str(),
                    verification.state.as_str(),
                ],
                1.0,
            );
        }
    }
}

/// Creation time, size and verification state of every stored volume.
///
/// Only storages reported as `available` are listed; each storage is
/// collected independently.
pub struct StorageContentCollector {
    scrape: Arc<Scrape>,
}

impl StorageContentCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut total = ContentFamilies::new();

        for record in self.scrape.resources().await? {
            let ResourceRecord::Storage(storage) = record else {
                continue;
            };
            if !storage.is_available() {
                continue;
            }
            let (Some(node), Some(name)) = (storage.node.as_deref(), storage.storage.as_deref())
            else {
                continue;
            };

            let mut scratch = ContentFamilies::new();
            match self.collect_storage(node, name, &mut scratch).await {
                Ok(()) => total.merge(scratch),
                Err(e) => error!(
                    "Failed to fetch contents of storage {} on node {}: {}",
                    name, node, e
                ),
            }
        }

        Ok(vec![
            total.ctime.into(),
            total.size.into(),
            total.verification.into(),
        ])
    }

    async fn collect_storage(
        &self,
        node: &str,
        storage: &str,
        out: &mut ContentFamilies,
    ) -> Result<(), ApiError> {
        let path = format!("nodes/{}/storage/{}/content", node, storage);
        let volumes: Vec<Volume> = get_as(self.scrape.api(), &path).await?;
        for volume in &volumes {
            out.record_volume(node, storage, volume);
        }
        Ok(())
    }
}

impl Collector for StorageContentCollector {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}
