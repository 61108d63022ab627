//! Node-scope collectors.
//!
//! Calls below `nodes/<node>/` are proxied by the API endpoint to the node in
//! question and fail independently of the endpoint itself. Each node is
//! therefore collected into scratch families that are merged only when the
//! node completed; a failing node is logged and left out.

use std::sync::Arc;

use ahash::AHashSet;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use super::state::{populate_one_hot, STATE_LABELS, SUBSCRIPTION_STATES};
use super::{CollectError, CollectFuture, Collector};
use crate::api::{get_as, ApiError};
use crate::family::{flag, Family, MetricFamily};
use crate::resources::{lenient, ResourceKind};
use crate::scrape::Scrape;

const GUEST_LABELS: [&str; 4] = ["id", "node", "type", "name"];
const NET_LABELS: [&str; 5] = ["id", "node", "type", "net", "name"];

struct ConfigFamilies {
    onboot: Family<4>,
    cores: Family<4>,
    sockets: Family<4>,
    memory: Family<4>,
    netqueue: Family<5>,
    vlan: Family<5>,
    netrate: Family<5>,
    rng: Family<4>,
}

impl ConfigFamilies {
    fn new() -> Self {
        Self {
            onboot: Family::gauge(
                "pve_onboot_status",
                "Proxmox vm config onboot value",
                GUEST_LABELS,
            ),
            cores: Family::gauge("pve_cores", "Proxmox vm config cores value", GUEST_LABELS),
            sockets: Family::gauge("pve_sockets", "Proxmox vm config sockets value", GUEST_LABELS),
            memory: Family::gauge("pve_memory", "Proxmox vm config memory value", GUEST_LABELS),
            netqueue: Family::gauge(
                "pve_netqueue_size",
                "Proxmox vm config netqueue value",
                NET_LABELS,
            ),
            vlan: Family::gauge("pve_vlan_id", "Proxmox vm config vlan value", NET_LABELS),
            netrate: Family::gauge("pve_netrate", "Proxmox vm config netrate value", NET_LABELS),
            rng: Family::gauge(
                "pve_rng",
                "Proxmox vm config random generator value",
                GUEST_LABELS,
            ),
        }
    }

    fn merge(&mut self, other: ConfigFamilies) {
        self.onboot.merge(other.onboot);
        self.cores.merge(other.cores);
        self.sockets.merge(other.sockets);
        self.memory.merge(other.memory);
        self.netqueue.merge(other.netqueue);
        self.vlan.merge(other.vlan);
        self.netrate.merge(other.netrate);
        self.rng.merge(other.rng);
    }

    fn into_families(self) -> Vec<MetricFamily> {
        vec![
            self.onboot.into(),
            self.cores.into(),
            self.sockets.into(),
            self.memory.into(),
            self.netqueue.into(),
            self.vlan.into(),
            self.netrate.into(),
            self.rng.into(),
        ]
    }

    /// Records the configuration of one guest.
    fn record_guest(&mut self, kind: ResourceKind, node: &str, vmid: &str, config: &Value) {
        let id = format!("{}/{}", kind.as_str(), vmid);
        let name = config
            .get("name")
            .or_else(|| match kind {
                ResourceKind::Lxc => config.get("hostname"),
                _ => None,
            })
            .and_then(lenient::as_text)
            .unwrap_or_default();
        let labels = [id.as_str(), node, kind.as_str(), name.as_str()];

        for (key, family) in [
            ("onboot", &mut self.onboot),
            ("cores", &mut self.cores),
            ("sockets", &mut self.sockets),
            ("memory", &mut self.memory),
        ] {
            if let Some(value) = config.get(key).and_then(lenient::as_number) {
                family.add(labels, value);
            }
        }

        if kind != ResourceKind::Qemu {
            return;
        }

        self.rng.add(labels, flag(config.get("rng0").is_some()));

        let Some(options) = config.as_object() else {
            return;
        };
        for (key, value) in options {
            if !is_net_key(key) {
                continue;
            }
            let Some(setting) = value.as_str() else {
                continue;
            };
            let net = property_string(setting);
            let labels = [id.as_str(), node, kind.as_str(), key.as_str(), name.as_str()];
            self.netqueue.add(labels, sub_option(&net, "queues"));
            self.vlan.add(labels, sub_option(&net, "tag"));
            self.netrate.add(labels, sub_option(&net, "rate"));
        }
    }
}

/// `net0`, `net1`, ...
fn is_net_key(key: &str) -> bool {
    key.strip_prefix("net")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Splits `virtio=BA:0B:A4:09:8E:A1,bridge=vmbr0,queues=2` into key/value pairs.
///
/// Items without `=` are skipped.
pub fn property_string(value: &str) -> Vec<(&str, &str)> {
    value
        .split(',')
        .filter_map(|item| item.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Numeric value of a sub-option, `-1` when absent or not numeric.
fn sub_option(options: &[(&str, &str)], key: &str) -> f64 {
    options
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(-1.0)
}

/// Guest configuration values (`onboot`, `cores`, network queues, ...).
pub struct NodeConfigCollector {
    scrape: Arc<Scrape>,
}

impl NodeConfigCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut total = ConfigFamilies::new();

        for node in self.scrape.node_names().await? {
            let mut scratch = ConfigFamilies::new();
            match self.collect_node(&node, &mut scratch).await {
                Ok(()) => total.merge(scratch),
                Err(e) => error!("Failed to scrape qemu/lxc config from node {}: {}", node, e),
            }
        }

        Ok(total.into_families())
    }

    async fn collect_node(&self, node: &str, out: &mut ConfigFamilies) -> Result<(), ApiError> {
        let api = self.scrape.api();

        for kind in [ResourceKind::Qemu, ResourceKind::Lxc] {
            let guests: Vec<Value> =
                get_as(api, &format!("nodes/{}/{}", node, kind.as_str())).await?;

            for guest in guests {
                let Some(vmid) = guest.get("vmid").and_then(lenient::as_text) else {
                    continue;
                };
                let config = self
                    .scrape
                    .guest_configs()
                    .get_or_fetch(api, kind, node, &vmid)
                    .await?;
                out.record_guest(kind, node, &vmid, &config);
            }
        }

        Ok(())
    }
}

impl Collector for NodeConfigCollector {
    fn name(&self) -> &'static str {
        "config"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

#[derive(Debug, Deserialize)]
struct ReplicationJob {
    id: String,
    #[serde(rename = "type", default)]
    job_type: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    target: String,
    #[serde(default, deserialize_with = "lenient::text")]
    guest: Option<String>,
    #[serde(default)]
    vmtype: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReplicationStatus {
    #[serde(default, deserialize_with = "lenient::number")]
    duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    last_sync: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    last_try: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    next_sync: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    fail_count: Option<f64>,
}

struct ReplicationFamilies {
    info: Family<5>,
    duration: Family<1>,
    last_sync: Family<1>,
    last_try: Family<1>,
    next_sync: Family<1>,
    failed_syncs: Family<1>,
}

impl ReplicationFamilies {
    fn new() -> Self {
        Self {
            info: Family::gauge(
                "pve_replication_info",
                "Proxmox vm replication info",
                ["id", "type", "source", "target", "guest"],
            ),
            duration: Family::gauge(
                "pve_replication_duration_seconds",
                "Proxmox vm replication duration",
                ["id"],
            ),
            last_sync: Family::gauge(
                "pve_replication_last_sync_timestamp_seconds",
                "Proxmox vm replication last_sync",
                ["id"],
            ),
            last_try: Family::gauge(
                "pve_replication_last_try_timestamp_seconds",
                "Proxmox vm replication last_try",
                ["id"],
            ),
            next_sync: Family::gauge(
                "pve_replication_next_sync_timestamp_seconds",
                "Proxmox vm replication next_sync",
                ["id"],
            ),
            failed_syncs: Family::gauge(
                "pve_replication_failed_syncs",
                "Proxmox vm replication fail_count",
                ["id"],
            ),
        }
    }

    fn merge(&mut self, other: ReplicationFamilies) {
        self.info.merge(other.info);
        self.duration.merge(other.duration);
        self.last_sync.merge(other.last_sync);
        self.last_try.merge(other.last_try);
        self.next_sync.merge(other.next_sync);
        self.failed_syncs.merge(other.failed_syncs);
    }

    fn into_families(self) -> Vec<MetricFamily> {
        vec![
            self.info.into(),
            self.duration.into(),
            self.last_sync.into(),
            self.last_try.into(),
            self.next_sync.into(),
            self.failed_syncs.into(),
        ]
    }

    fn record_job(&mut self, job: &ReplicationJob, status: &ReplicationStatus) {
        self.info.push(
            [
                job.id.clone(),
                job.job_type.clone(),
                format!("node/{}", job.source),
                format!("node/{}", job.target),
                format!("{}/{}", job.vmtype, job.guest.as_deref().unwrap_or_default()),
            ],
            1.0,
        );

        let id = [job.id.as_str()];
        for (value, family) in [
            (status.duration, &mut self.duration),
            (status.last_sync, &mut self.last_sync),
            (status.last_try, &mut self.last_try),
            (status.next_sync, &mut self.next_sync),
            (status.fail_count, &mut self.failed_syncs),
        ] {
            if let Some(value) = value {
                family.add(id, value);
            }
        }
    }
}

/// Storage replication jobs and their last run.
pub struct NodeReplicationCollector {
    scrape: Arc<Scrape>,
}

impl NodeReplicationCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut total = ReplicationFamilies::new();
        let mut seen = AHashSet::new();

        for node in self.scrape.node_names().await? {
            let mut scratch = ReplicationFamilies::new();
            match self.collect_node(&node, &seen, &mut scratch).await {
                Ok(jobs) => {
                    seen.extend(jobs);
                    total.merge(scratch);
                }
                Err(e) => error!("Failed to scrape replication jobs from node {}: {}", node, e),
            }
        }

        Ok(total.into_families())
    }

    /// Collects the jobs of `node` not in `seen` and returns their ids.
    async fn collect_node(
        &self,
        node: &str,
        seen: &AHashSet<String>,
        out: &mut ReplicationFamilies,
    ) -> Result<Vec<String>, ApiError> {
        let api = self.scrape.api();
        let jobs: Vec<ReplicationJob> =
            get_as(api, &format!("nodes/{}/replication", node)).await?;

        let mut collected = Vec::new();
        for job in jobs {
            if seen.contains(&job.id) || collected.contains(&job.id) {
                debug!("Skipping replication job {} already reported", job.id);
                continue;
            }
            let status: ReplicationStatus =
                get_as(api, &format!("nodes/{}/replication/{}/status", node, job.id)).await?;
            out.record_job(&job, &status);
            collected.push(job.id);
        }

        Ok(collected)
    }
}

impl Collector for NodeReplicationCollector {
    fn name(&self) -> &'static str {
        "replication"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Subscription {
    #[serde(default)]
    status: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    nextduedate: Option<String>,
}

/// Parses a `YYYY-MM-DD` due date into a UTC midnight timestamp.
pub fn due_date_timestamp(date: &str) -> Option<f64> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().timestamp() as f64)
}

/// Subscription level, status and due date per node.
pub struct SubscriptionCollector {
    scrape: Arc<Scrape>,
}

impl SubscriptionCollector {
    pub fn new(scrape: Arc<Scrape>) -> Self {
        Self { scrape }
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut info = Family::gauge(
            "pve_subscription_info",
            "Proxmox VE subscription info",
            ["id", "level"],
        );
        let mut status = Family::gauge(
            "pve_subscription_status",
            "Proxmox VE subscription status",
            STATE_LABELS,
        );
        let mut next_due = Family::gauge(
            "pve_subscription_next_due_timestamp_seconds",
            "Subscription next due date",
            ["id"],
        );

        for node in self.scrape.node_names().await? {
            let path = format!("nodes/{}/subscription", node);
            let subscription: Subscription = match get_as(self.scrape.api(), &path).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!("Failed to scrape subscription of node {}: {}", node, e);
                    continue;
                }
            };

            let id = format!("node/{}", node);
            info.add(
                [id.as_str(), subscription.level.as_deref().unwrap_or_default()],
                1.0,
            );
            let actual = subscription.status.to_lowercase();
            populate_one_hot(&mut status, &id, SUBSCRIPTION_STATES, Some(actual.as_str()));
            if let Some(ts) = subscription
                .nextduedate
                .as_deref()
                .and_then(due_date_timestamp)
            {
                next_due.add([id.as_str()], ts);
            }
        }

        Ok(vec![info.into(), status.into(), next_due.into()])
    }
}

impl Collector for SubscriptionCollector {
    fn name(&self) -> &'static str {
        "subscription"
    }

    fn collect(&self) -> CollectFuture<'_> {
        Box::pin(self.families())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_net_keys() {
        assert!(is_net_key("net0"));
        assert!(is_net_key("net12"));
        assert!(!is_net_key("net"));
        assert!(!is_net_key("netx"));
        assert!(!is_net_key("nameserver"));
    }

    #[test]
    fn test_record_qemu_guest() {
        let mut families = ConfigFamilies::new();
        let config = json!({
            "name": "web",
            "onboot": 1,
            "cores": 4,
            "sockets": 2,
            "memory": "8192",
            "net0": "virtio=BA:0B:A4:09:8E:A1,bridge=vmbr0,queues=2,rate=125,tag=600",
            "net1": "e1000=BA:0B:A4:09:8E:A2,bridge=vmbr1",
            "rng0": "source=/dev/urandom",
        });
        families.record_guest(ResourceKind::Qemu, "pve1", "100", &config);
        let out = families.into_families();

        let labels = ["qemu/100", "pve1", "qemu", "web"];
        assert_eq!(out[0].value_of(&labels), Some(1.0));
        assert_eq!(out[3].value_of(&labels), Some(8192.0));
        assert_eq!(
            out[4].value_of(&["qemu/100", "pve1", "qemu", "net0", "web"]),
            Some(2.0)
        );
        assert_eq!(
            out[5].value_of(&["qemu/100", "pve1", "qemu", "net0", "web"]),
            Some(600.0)
        );
        assert_eq!(
            out[6].value_of(&["qemu/100", "pve1", "qemu", "net1", "web"]),
            Some(-1.0)
        );
        assert_eq!(out[7].value_of(&labels), Some(1.0));
    }

    #[test]
    fn test_record_lxc_guest_uses_hostname() {
        let mut families = ConfigFamilies::new();
        let config = json!({"hostname": "ct1", "onboot": 0, "cores": 1, "memory": 512,
                            "net0": "name=eth0,bridge=vmbr0"});
        families.record_guest(ResourceKind::Lxc, "pve1", "101", &config);
        let out = families.into_families();

        let labels = ["lxc/101", "pve1", "lxc", "ct1"];
        assert_eq!(out[0].value_of(&labels), Some(0.0));
        assert!(out[2].is_empty());
        // net and rng families are qemu only
        assert!(out[4].is_empty());
        assert!(out[7].is_empty());
    }

    #[test]
    fn test_due_date_timestamp() {
        assert_eq!(due_date_timestamp("2024-01-01"), Some(1_704_067_200.0));
        assert_eq!(due_date_timestamp("soon"), None);
    }
}
