//! Cluster-scope collectors.
//!
//! All of them read the memoized `cluster/resources` and `cluster/status`
//! listings of the scrape; only the version and backup-info collectors issue
//! calls of their own.

use std::sync::Arc;

use serde::Deserialize;

use super::state::{encode_ha_state, encode_lock_state, ha_state_family, lock_state_family};
use super::{CollectError, CollectFuture, Collector};
use crate::api::get_as;
use crate::family::{flag, Family, MetricFamily};
use crate::resources::{
    lenient, InfoLabels, ResourceRecord, UsageField, GUEST_INFO_LABELS, STORAGE_INFO_LABELS,
};
use crate::scrape::Scrape;

/// `pve_up` for nodes, the cluster, guests and storages.
pub struct StatusCollector {
    scrape: Arc<Scrape>,
}

impl StatusCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut up = Family::gauge(
            "pve_up",
            "Node/VM/CT-Status is online/running",
            ["id", "name"],
        );

        for entry in self.scrape.status().await? {
            match &entry.record {
                ResourceRecord::Node(node) => up.add(
                    [node.id.as_str(), node.name.as_deref().unwrap_or_default()],
                    node.online.unwrap_or_default(),
                ),
                ResourceRecord::Cluster(cluster) => up.push(
                    [cluster.label_id(), cluster.name.clone()],
                    cluster.quorate.unwrap_or_default(),
                ),
                _ => {
                    return Err(CollectError::UnexpectedStatusEntry(
                        entry.entry_type.clone(),
                    ))
                }
            }
        }

        for record in self.scrape.resources().await? {
            match record {
                ResourceRecord::Qemu(guest) | ResourceRecord::Lxc(guest) => {
                    up.add(
                        [guest.id.as_str(), record.name_label()],
                        flag(guest.is_running()),
                    )
                }
                ResourceRecord::Storage(storage) => up.add(
                    [storage.id.as_str(), record.name_label()],
                    flag(storage.is_available()),
                ),
                _ => {}
            }
        }

        Ok(vec![up.into()])
    }
}

impl Collector for StatusCollector {
    fn name(&self) -> &'static str {
        "status"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

#[derive(Debug, Default, Deserialize)]
struct VersionInfo {
    #[serde(default, deserialize_with = "lenient::text")]
    release: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    repoid: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    version: Option<String>,
}

/// `pve_version_info` from the `version` endpoint.
pub struct VersionCollector {
    scrape: Arc<Scrape>,
}

impl VersionCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let version: VersionInfo = get_as(self.scrape.api(), "version").await?;

        let mut info = Family::gauge(
            "pve_version_info",
            "Proxmox VE version info",
            ["release", "repoid", "version"],
        );
        info.push(
            [
                version.release.unwrap_or_default(),
                version.repoid.unwrap_or_default(),
                version.version.unwrap_or_default(),
            ],
            1.0,
        );

        Ok(vec![info.into()])
    }
}

impl Collector for VersionCollector {
    fn name(&self) -> &'static str {
        "version"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

/// `pve_node_info` from the node entries of `cluster/status`.
pub struct ClusterNodeCollector {
    scrape: Arc<Scrape>,
}

impl ClusterNodeCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut info = Family::gauge(
            "pve_node_info",
            "Node info",
            ["id", "level", "name", "nodeid"],
        );

        for entry in self.scrape.status().await? {
            if let ResourceRecord::Node(node) = &entry.record {
                info.push(
                    [
                        node.id.clone(),
                        node.level.clone().unwrap_or_default(),
                        node.name.clone().unwrap_or_default(),
                        node.nodeid.clone().unwrap_or_default(),
                    ],
                    1.0,
                );
            }
        }

        Ok(vec![info.into()])
    }
}

impl Collector for ClusterNodeCollector {
    fn name(&self) -> &'static str {
        "node"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

/// `pve_cluster_info` from the cluster entry of `cluster/status`.
///
/// Stand-alone nodes have no cluster entry; the family stays empty then.
pub struct ClusterInfoCollector {
    scrape: Arc<Scrape>,
}

impl ClusterInfoCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut info = Family::gauge(
            "pve_cluster_info",
            "Cluster info",
            ["id", "nodes", "quorate", "version"],
        );

        for entry in self.scrape.status().await? {
            if let ResourceRecord::Cluster(cluster) = &entry.record {
                info.push(
                    [
                        cluster.label_id(),
                        cluster.nodes.clone().unwrap_or_default(),
                        cluster.quorate.map(|q| q.to_string()).unwrap_or_default(),
                        cluster.version.clone().unwrap_or_default(),
                    ],
                    1.0,
                );
            }
        }

        Ok(vec![info.into()])
    }
}

impl Collector for ClusterInfoCollector {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

const ID_NAME: [&str; 2] = ["id", "name"];

/// Gauge projection of the usage fields, in output order.
const USAGE_GAUGES: [(UsageField, &str, &str); 11] = [
    (
        UsageField::MaxDisk,
        "pve_disk_size_bytes",
        "Storage size in bytes (for type 'storage'), root image size for VMs (for types 'qemu' and 'lxc').",
    ),
    (
        UsageField::Disk,
        "pve_disk_usage_bytes",
        "Used disk space in bytes (for type 'storage'), used root image space for VMs (for types 'qemu' and 'lxc').",
    ),
    (
        UsageField::MaxMem,
        "pve_memory_size_bytes",
        "Number of available memory in bytes (for types 'node', 'qemu' and 'lxc').",
    ),
    (
        UsageField::Mem,
        "pve_memory_usage_bytes",
        "Used memory in bytes (for types 'node', 'qemu' and 'lxc').",
    ),
    (
        UsageField::NetOut,
        "pve_network_transmit_bytes",
        "The amount of traffic in bytes that was sent from the guest over the network since it was started. (for types 'qemu' and 'lxc') DEPRECATED: Use pve_network_transmit_bytes_total instead.",
    ),
    (
        UsageField::NetIn,
        "pve_network_receive_bytes",
        "The amount of traffic in bytes that was sent to the guest over the network since it was started. (for types 'qemu' and 'lxc') DEPRECATED: Use pve_network_receive_bytes_total instead.",
    ),
    (
        UsageField::DiskWrite,
        "pve_disk_write_bytes",
        "The amount of bytes the guest wrote to its block devices since the guest was started. This info is not available for all storage types. (for types 'qemu' and 'lxc') DEPRECATED: Use pve_disk_written_bytes_total instead.",
    ),
    (
        UsageField::DiskRead,
        "pve_disk_read_bytes",
        "The amount of bytes the guest read from its block devices since the guest was started. This info is not available for all storage types. (for types 'qemu' and 'lxc') DEPRECATED: Use pve_disk_read_bytes_total instead.",
    ),
    (
        UsageField::Cpu,
        "pve_cpu_usage_ratio",
        "CPU utilization (for types 'node', 'qemu' and 'lxc').",
    ),
    (
        UsageField::MaxCpu,
        "pve_cpu_usage_limit",
        "Number of available CPUs (for types 'node', 'qemu' and 'lxc').",
    ),
    (
        UsageField::Uptime,
        "pve_uptime_seconds",
        "Uptime of node or virtual guest in seconds (for types 'node', 'qemu' and 'lxc').",
    ),
];

/// Counter projection of the I/O byte fields.
const USAGE_COUNTERS: [(UsageField, &str, &str); 4] = [
    (
        UsageField::NetOut,
        "pve_network_transmit_bytes_total",
        "The amount of traffic in bytes that was sent from the guest over the network since it was started. (for types 'qemu' and 'lxc')",
    ),
    (
        UsageField::NetIn,
        "pve_network_receive_bytes_total",
        "The amount of traffic in bytes that was sent to the guest over the network since it was started. (for types 'qemu' and 'lxc')",
    ),
    (
        UsageField::DiskWrite,
        "pve_disk_written_bytes_total",
        "The amount of bytes the guest wrote to its block devices since the guest was started. This info is not available for all storage types. (for types 'qemu' and 'lxc')",
    ),
    (
        UsageField::DiskRead,
        "pve_disk_read_bytes_total",
        "The amount of bytes the guest read from its block devices since the guest was started. This info is not available for all storage types. (for types 'qemu' and 'lxc')",
    ),
];

/// The bulk collector over `cluster/resources`.
///
/// Every record is routed by kind into the usage gauges, the I/O counters,
/// the HA and lock state families and the kind specific info family.
/// Records of unknown kind and absent fields simply produce no samples.
pub struct ClusterResourceCollector {
    scrape: Arc<Scrape>,
}

impl ClusterResourceCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let records = self.scrape.resources().await?;
        Ok(resource_families(records))
    }
}

impl Collector for ClusterResourceCollector {
    fn name(&self) -> &'static str {
        "resources"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

/// Maps a resource listing onto the resource families.
pub fn resource_families(records: &[ResourceRecord]) -> Vec<MetricFamily> {
    let mut gauges = USAGE_GAUGES
        .iter()
        .map(|&(field, name, help)| (field, Family::gauge(name, help, ID_NAME)))
        .collect::<Vec<_>>();
    let mut counters = USAGE_COUNTERS
        .iter()
        .map(|&(field, name, help)| (field, Family::counter(name, help, ID_NAME)))
        .collect::<Vec<_>>();
    let mut shared = Family::gauge(
        "pve_storage_shared",
        "Whether or not the storage is shared among cluster nodes",
        ["id"],
    );
    let mut ha = ha_state_family();
    let mut lock = lock_state_family();
    let mut guest_info = Family::gauge("pve_guest_info", "VM/CT info", GUEST_INFO_LABELS);
    let mut storage_info = Family::gauge("pve_storage_info", "Storage info", STORAGE_INFO_LABELS);

    for record in records {
        match record.info_labels() {
            Some(InfoLabels::Guest(labels)) => guest_info.push(labels, 1.0),
            Some(InfoLabels::Storage(labels)) => storage_info.push(labels, 1.0),
            None => {}
        }

        encode_ha_state(&mut ha, record);
        encode_lock_state(&mut lock, record);

        let (Some(id), Some(usage)) = (record.id(), record.usage()) else {
            continue;
        };
        let name = record.name_label();

        for (field, family) in gauges.iter_mut() {
            if let Some(value) = usage.get(*field) {
                family.add([id, name], value);
            }
        }
        if let ResourceRecord::Storage(storage) = record {
            if let Some(value) = storage.shared {
                shared.add([id], value);
            }
        }
        for (field, family) in counters.iter_mut() {
            if let Some(value) = usage.get(*field) {
                family.add([id, name], value);
            }
        }
    }

    let mut families = gauges
        .into_iter()
        .map(|(_, family)| MetricFamily::from(family))
        .collect::<Vec<_>>();
    families.push(shared.into());
    families.extend(counters.into_iter().map(|(_, family)| MetricFamily::from(family)));
    families.push(ha.into());
    families.push(lock.into());
    families.push(guest_info.into());
    families.push(storage_info.into());
    families
}

#[derive(Debug, Deserialize)]
struct NotBackedUp {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, deserialize_with = "lenient::text")]
    vmid: Option<String>,
}

/// Guests not covered by any backup job.
pub struct BackupInfoCollector {
    scrape: Arc<Scrape>,
}

impl BackupInfoCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut total = Family::gauge(
            "pve_not_backed_up_total",
            "Total number of guests not covered by any backup job.",
            ["id"],
        );
        let mut info = Family::gauge(
            "pve_not_backed_up_info",
            "Present if guest is not covered by any backup job.",
            ["id"],
        );

        let guests: Vec<NotBackedUp> =
            get_as(self.scrape.api(), "cluster/backup-info/not-backed-up").await?;

        for guest in &guests {
            info.push(
                [format!("{}/{}", guest.kind, guest.vmid.as_deref().unwrap_or_default())],
                1.0,
            );
        }

        // The first status entry is the cluster, or the node itself on a
        // stand-alone host.
        let cluster_name = self
            .scrape
            .status()
            .await?
            .first()
            .and_then(|entry| match &entry.record {
                ResourceRecord::Cluster(cluster) => Some(cluster.name.clone()),
                ResourceRecord::Node(node) => node.name.clone(),
                _ => None,
            })
            .unwrap_or_default();
        total.push([format!("cluster/{}", cluster_name)], guests.len() as f64);

        Ok(vec![total.into(), info.into()])
    }
}

impl Collector for BackupInfoCollector {
    fn name(&self) -> &'static str {
        "backup_info"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}
