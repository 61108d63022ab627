//! Integration tests for the node-scope collectors and their per-node isolation.

mod common;

use common::{find, two_node_cluster, FakeApi};
use pve_exporter::{collect_families, CollectorOptions, GuestAgentOptions, ScrapeScope};
use serde_json::json;
use std::sync::Arc;

const NODE_ONLY: ScrapeScope = ScrapeScope {
    cluster: false,
    node: true,
};

fn node_collectors(options: CollectorOptions) -> CollectorOptions {
    CollectorOptions {
        qga_fs: false,
        ..options
    }
}

/// pve1 answers every node call, pve2 fails all of them.
fn cluster_with_failing_node() -> FakeApi {
    two_node_cluster()
        .with("nodes/pve1/qemu", json!([{"vmid": 100, "name": "web"}]))
        .with("nodes/pve1/lxc", json!([{"vmid": "101"}]))
        .with(
            "nodes/pve1/qemu/100/config",
            json!({"name": "web", "onboot": 1, "cores": 4, "sockets": 1, "memory": 8192,
                   "net0": "virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0,tag=20,queues=4",
                   "agent": "1"}),
        )
        .with(
            "nodes/pve1/lxc/101/config",
            json!({"hostname": "dns", "cores": 1, "memory": 512}),
        )
        .failing("nodes/pve2/qemu", 595)
        .with(
            "nodes/pve1/replication",
            json!([{"id": "100-0", "type": "local", "source": "pve1", "target": "pve2",
                    "guest": 100, "vmtype": "qemu"}]),
        )
        .with(
            "nodes/pve1/replication/100-0/status",
            json!({"duration": 2.5, "last_sync": 1700000000, "last_try": 1700000000,
                   "next_sync": 1700000900, "fail_count": 0}),
        )
        .failing("nodes/pve2/replication", 595)
        .with(
            "nodes/pve1/subscription",
            json!({"status": "Active", "level": "c", "nextduedate": "2025-01-01"}),
        )
        .failing("nodes/pve2/subscription", 595)
}

#[tokio::test]
async fn test_failing_node_is_left_out() {
    let api = Arc::new(cluster_with_failing_node());
    let families = collect_families(
        api.clone(),
        NODE_ONLY,
        &node_collectors(CollectorOptions::default()),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    let guest = ["qemu/100", "pve1", "qemu", "web"];
    assert_eq!(find(&families, "pve_onboot_status").value_of(&guest), Some(1.0));
    assert_eq!(find(&families, "pve_cores").value_of(&guest), Some(4.0));
    assert_eq!(find(&families, "pve_rng").value_of(&guest), Some(0.0));
    assert_eq!(
        find(&families, "pve_memory").value_of(&["lxc/101", "pve1", "lxc", "dns"]),
        Some(512.0)
    );

    let net = ["qemu/100", "pve1", "qemu", "net0", "web"];
    assert_eq!(find(&families, "pve_vlan_id").value_of(&net), Some(20.0));
    assert_eq!(find(&families, "pve_netqueue_size").value_of(&net), Some(4.0));
    assert_eq!(find(&families, "pve_netrate").value_of(&net), Some(-1.0));

    assert_eq!(
        find(&families, "pve_replication_info")
            .value_of(&["100-0", "local", "node/pve1", "node/pve2", "qemu/100"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_replication_duration_seconds").value_of(&["100-0"]),
        Some(2.5)
    );
    assert_eq!(
        find(&families, "pve_replication_failed_syncs").value_of(&["100-0"]),
        Some(0.0)
    );

    assert_eq!(
        find(&families, "pve_subscription_info").value_of(&["node/pve1", "c"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_subscription_status").value_of(&["node/pve1", "active"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_subscription_next_due_timestamp_seconds").value_of(&["node/pve1"]),
        Some(1735689600.0)
    );

    // nothing at all about pve2
    for family in &families {
        for sample in family.samples() {
            assert!(
                sample.label_values.iter().all(|v| !v.contains("pve2") || v == "node/pve2"),
                "{} carries a pve2 sample",
                family.name()
            );
        }
    }
    assert!(find(&families, "pve_subscription_info")
        .value_of(&["node/pve2", ""])
        .is_none());

    assert_eq!(api.calls("nodes/pve2/qemu"), 1);
    assert_eq!(api.calls("nodes/pve2/lxc"), 0);
}

#[tokio::test]
async fn test_failing_guest_config_drops_whole_node() {
    let api = Arc::new(
        cluster_with_failing_node()
            .failing("nodes/pve1/lxc/101/config", 500),
    );
    let options = CollectorOptions {
        replication: false,
        subscription: false,
        ..node_collectors(CollectorOptions::default())
    };
    let families = collect_families(api, NODE_ONLY, &options, &GuestAgentOptions::default())
        .await
        .unwrap();

    // pve1 failed half way and must not be partially reported
    assert!(find(&families, "pve_onboot_status").is_empty());
    assert!(find(&families, "pve_cores").is_empty());
}

#[tokio::test]
async fn test_replication_job_reported_once() {
    let job = json!([{"id": "100-0", "type": "local", "source": "pve1", "target": "pve2",
                      "guest": 100, "vmtype": "qemu"}]);
    let status = json!({"duration": 1, "fail_count": 3});
    let api = Arc::new(
        two_node_cluster()
            .with("nodes/pve1/replication", job.clone())
            .with("nodes/pve2/replication", job)
            .with("nodes/pve1/replication/100-0/status", status.clone())
            .with("nodes/pve2/replication/100-0/status", status),
    );
    let options = CollectorOptions {
        config: false,
        subscription: false,
        ..node_collectors(CollectorOptions::default())
    };

    let families = collect_families(
        api.clone(),
        NODE_ONLY,
        &options,
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(find(&families, "pve_replication_info").samples().len(), 1);
    assert_eq!(find(&families, "pve_replication_failed_syncs").samples().len(), 1);
    assert_eq!(api.calls("nodes/pve2/replication/100-0/status"), 0);
}

#[tokio::test]
async fn test_storage_contents_of_available_storages() {
    let api = Arc::new(
        two_node_cluster().with(
            "nodes/pve1/storage/local/content",
            json!([
                {"volid": "local:backup/vzdump-lxc-101.tar.zst", "content": "backup",
                 "vmid": 101, "ctime": 1700000000, "size": 1234,
                 "verification": {"state": "ok", "upid": "UPID:pve1"}},
                {"volid": "local:iso/debian.iso", "content": "iso", "size": 600},
            ]),
        ),
    );
    let options = CollectorOptions {
        storage: true,
        config: false,
        replication: false,
        subscription: false,
        qga_fs: false,
        ..CollectorOptions::default()
    };

    let families = collect_families(api, NODE_ONLY, &options, &GuestAgentOptions::default())
        .await
        .unwrap();

    let backup = [
        "pve1",
        "local",
        "101",
        "backup",
        "local:backup/vzdump-lxc-101.tar.zst",
    ];
    assert_eq!(
        find(&families, "pve_storage_contents_bytes").value_of(&backup),
        Some(1234.0)
    );
    assert_eq!(
        find(&families, "pve_storage_contents_ctime").value_of(&backup),
        Some(1700000000.0)
    );
    assert_eq!(
        find(&families, "pve_storage_contents_bytes")
            .value_of(&["pve1", "local", "", "iso", "local:iso/debian.iso"]),
        Some(600.0)
    );
    assert_eq!(
        find(&families, "pve_storage_contents_verification").samples().len(),
        1
    );
}
