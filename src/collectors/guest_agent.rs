//! Filesystem usage inside running VMs, read through the QEMU guest agent.
//!
//! Each running VM costs two round trips (configuration, then `get-fsinfo`),
//! and unresponsive agents can hang until the API gives up. The probes run
//! as tasks on a bounded pool: a semaphore limits the number of guests in
//! flight, and every guest gets its own timeout once it holds a permit. A
//! guest that fails or times out is logged and contributes no samples.

use std::sync::Arc;

use ahash::AHashSet;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{CollectError, CollectFuture, Collector};
use crate::api::{ApiError, PveApi};
use crate::family::{Family, MetricFamily};
use crate::options::GuestAgentOptions;
use crate::resources::{lenient, ResourceKind, ResourceRecord};
use crate::scrape::{GuestConfigCache, Scrape};

const FS_LABELS: [&str; 6] = ["id", "node", "vm", "disk", "mountpoint", "fstype"];

/// A running VM to probe.
#[derive(Debug, Clone)]
struct GuestTarget {
    id: String,
    vmid: String,
    node: String,
    name: String,
}

/// One filesystem row of a guest.
#[derive(Debug, Clone, PartialEq)]
pub struct FsUsage {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: f64,
    pub used: f64,
}

/// Whether the `agent` option of a VM configuration enables the guest agent.
///
/// The option is a property string whose first item is either a bare
/// boolean (`1,fstrim_cloned_disks=1`) or `enabled=<bool>`.
pub fn agent_enabled(option: Option<&Value>) -> bool {
    match option {
        Some(Value::String(setting)) => {
            let first = setting.split(',').next().unwrap_or_default().trim();
            let token = match first.split_once('=') {
                Some((key, value)) if key.trim() == "enabled" => value.trim(),
                Some(_) => return false,
                None => first,
            };
            matches!(
                token.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        }
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Extracts filesystem rows from a `get-fsinfo` answer.
///
/// The API returns either `{"result": [...]}` or the bare list. Entries
/// without mount point or byte counts are skipped. A filesystem is reported
/// once per backing disk; without disks the filesystem name (or `unknown`)
/// stands in as device.
pub fn parse_fsinfo(data: &Value) -> Vec<FsUsage> {
    let list = match data {
        Value::Object(map) => map.get("result").and_then(Value::as_array),
        Value::Array(list) => Some(list),
        _ => None,
    };
    let Some(list) = list else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    let mut seen = AHashSet::new();

    for fs in list {
        let Some(mountpoint) = fs
            .get("mountpoint")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
        else {
            continue;
        };
        let (Some(total), Some(used)) = (
            fs.get("total-bytes").and_then(lenient::as_number),
            fs.get("used-bytes").and_then(lenient::as_number),
        ) else {
            continue;
        };
        let fstype = fs.get("type").and_then(Value::as_str).unwrap_or_default();

        let devices = match fs.get("disk").and_then(Value::as_array) {
            Some(disks) if !disks.is_empty() => disks
                .iter()
                .map(|d| d.get("dev").and_then(Value::as_str).unwrap_or("unknown"))
                .collect::<Vec<_>>(),
            _ => vec![fs.get("name").and_then(Value::as_str).unwrap_or("unknown")],
        };

        for device in devices {
            // one row per (device, mountpoint), duplicates would clash in the exposition
            if !seen.insert((device.to_string(), mountpoint.to_string())) {
                continue;
            }
            rows.push(FsUsage {
                device: device.to_string(),
                mountpoint: mountpoint.to_string(),
                fstype: fstype.to_string(),
                total,
                used,
            });
        }
    }

    rows
}

/// Probes one guest. `Ok(None)` means the agent is not enabled.
async fn probe_guest(
    api: &dyn PveApi,
    configs: &GuestConfigCache,
    guest: &GuestTarget,
) -> Result<Option<Vec<FsUsage>>, ApiError> {
    let config = configs
        .get_or_fetch(api, ResourceKind::Qemu, &guest.node, &guest.vmid)
        .await?;
    if !agent_enabled(config.get("agent")) {
        return Ok(None);
    }

    let path = format!("nodes/{}/qemu/{}/agent/get-fsinfo", guest.node, guest.vmid);
    let data = api.get(&path).await?;
    Ok(Some(parse_fsinfo(&data)))
}

/// `pve_qga_fs_size_bytes` and `pve_qga_fs_used_bytes` per guest filesystem.
pub struct GuestAgentFilesystemCollector {
    scrape: Arc<Scrape>,
    options: GuestAgentOptions,
}

impl GuestAgentFilesystemCollector {
    pub fn new(scrape: Arc<Scrape>, options: GuestAgentOptions) -> Self {
        Self { scrape, options }
    }

    async fn running_guests(&self) -> Result<Vec<GuestTarget>, ApiError> {
        let guests = self
            .scrape
            .resources()
            .await?
            .iter()
            .filter_map(|record| match record {
                ResourceRecord::Qemu(guest) if guest.is_running() => Some(GuestTarget {
                    id: guest.id.clone(),
                    vmid: guest.vmid.clone()?,
                    node: guest.node.clone()?,
                    name: guest.name.clone().unwrap_or_default(),
                }),
                _ => None,
            })
            .collect();
        Ok(guests)
    }

    async fn families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mut size = Family::gauge(
            "pve_qga_fs_size_bytes",
            "Filesystem size inside guest from QEMU guest agent (get-fsinfo)",
            FS_LABELS,
        );
        let mut used = Family::gauge(
            "pve_qga_fs_used_bytes",
            "Filesystem used bytes inside guest from QEMU guest agent (get-fsinfo)",
            FS_LABELS,
        );

        let guests = self.running_guests().await?;
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, guest) in guests.iter().cloned().enumerate() {
            let api = self.scrape.api_handle();
            let configs = Arc::clone(self.scrape.guest_configs());
            let semaphore = Arc::clone(&semaphore);
            let budget = self.options.timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, None);
                };
                let outcome = timeout(budget, probe_guest(api.as_ref(), &configs, &guest)).await;
                (index, Some(outcome))
            });
        }

        let mut results: Vec<Option<Vec<FsUsage>>> = vec![None; guests.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Guest agent probe task failed: {}", e);
                    continue;
                }
            };
            let guest = &guests[index];
            match outcome {
                Some(Ok(Ok(Some(rows)))) => results[index] = Some(rows),
                Some(Ok(Ok(None))) => {
                    debug!("QGA not enabled for vmid={} on node={}", guest.vmid, guest.node)
                }
                Some(Ok(Err(e))) => info!(
                    "Failed to collect FS info for vmid={} on node={}: {}",
                    guest.vmid, guest.node, e
                ),
                Some(Err(_)) => warn!(
                    "Timed out collecting FS info for vmid={} on node={} after {:?}",
                    guest.vmid, guest.node, self.options.timeout
                ),
                None => warn!(
                    "Guest agent pool closed before vmid={} on node={} was probed",
                    guest.vmid, guest.node
                ),
            }
        }

        // emit in listing order, independent of completion order
        for (guest, rows) in guests.iter().zip(results) {
            for row in rows.unwrap_or_default() {
                let labels = [
                    guest.id.as_str(),
                    guest.node.as_str(),
                    guest.name.as_str(),
                    row.device.as_str(),
                    row.mountpoint.as_str(),
                    row.fstype.as_str(),
                ];
                size.add(labels, row.total);
                used.add(labels, row.used);
            }
        }

        Ok(vec![size.into(), used.into()])
    }
}

impl Collector for GuestAgentFilesystemCollector {
    fn name(&self) -> &'static str {
        "qga_fs"
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
    fn test_agent_enabled_variants() {
        for enabled in ["1", "enabled=1,fstrim_cloned_disks=1", "1,type=virtio", "true"] {
            assert!(agent_enabled(Some(&json!(enabled))), "{}", enabled);
        }
        for disabled in ["0", "enabled=0", "", "type=virtio", "0,fstrim_cloned_disks=1"] {
            assert!(!agent_enabled(Some(&json!(disabled))), "{}", disabled);
        }
        assert!(agent_enabled(Some(&json!(1))));
        assert!(!agent_enabled(Some(&json!(0))));
        assert!(!agent_enabled(None));
    }

    #[test]
    fn test_parse_fsinfo_result_object() {
        let data = json!({"result": [
            {"name": "sda1", "mountpoint": "/", "type": "ext4",
             "total-bytes": 1000, "used-bytes": 400,
             "disk": [{"dev": "/dev/sda1"}]},
            {"name": "tmpfs", "mountpoint": "/run", "type": "tmpfs",
             "total-bytes": 10, "used-bytes": 1, "disk": []},
            {"name": "sr0", "mountpoint": "/media", "type": "iso9660", "disk": []},
            {"name": "none", "mountpoint": "", "total-bytes": 1, "used-bytes": 1},
        ]});

        let rows = parse_fsinfo(&data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].device, "/dev/sda1");
        assert_eq!(rows[0].total, 1000.0);
        assert_eq!(rows[1].device, "tmpfs");
        assert_eq!(rows[1].fstype, "tmpfs");
    }

    #[test]
    fn test_parse_fsinfo_bare_list_and_duplicates() {
        let data = json!([
            {"mountpoint": "C:\\", "type": "NTFS", "total-bytes": 50, "used-bytes": 20,
             "disk": [{"dev": "disk0"}, {"dev": "disk0"}, {"bus-type": "sata"}]},
        ]);

        let rows = parse_fsinfo(&data);
        let devices = rows.iter().map(|r| r.device.as_str()).collect::<Vec<_>>();
        assert_eq!(devices, vec!["disk0", "unknown"]);
    }

    #[test]
    fn test_parse_fsinfo_unexpected_shape() {
        assert!(parse_fsinfo(&json!("error")).is_empty());
        assert!(parse_fsinfo(&json!({"error": "agent not running"})).is_empty());
    }
}
