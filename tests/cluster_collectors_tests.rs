//! Integration tests for the cluster-scope collectors.

mod common;

use common::{find, two_node_cluster, FakeApi};
use pve_exporter::collectors::CollectError;
use pve_exporter::{
    collect_families, collect_pve, CollectorOptions, GuestAgentOptions, ScrapeError, ScrapeScope,
};
use serde_json::json;
use std::sync::Arc;

const CLUSTER_ONLY: ScrapeScope = ScrapeScope {
    cluster: true,
    node: false,
};

#[tokio::test]
async fn test_cluster_scope_families() {
    let api = Arc::new(two_node_cluster());
    let families = collect_families(
        api.clone(),
        CLUSTER_ONLY,
        &CollectorOptions::default(),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    let up = find(&families, "pve_up");
    assert_eq!(up.value_of(&["cluster/lab", "lab"]), Some(1.0));
    assert_eq!(up.value_of(&["node/pve1", "pve1"]), Some(1.0));
    assert_eq!(up.value_of(&["node/pve2", "pve2"]), Some(0.0));
    assert_eq!(up.value_of(&["qemu/100", "web"]), Some(1.0));
    assert_eq!(up.value_of(&["lxc/101", "dns"]), Some(0.0));
    assert_eq!(up.value_of(&["storage/pve1/local", "local"]), Some(1.0));

    assert_eq!(
        find(&families, "pve_cluster_info").value_of(&["cluster/lab", "2", "1", "4"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_node_info").value_of(&["node/pve1", "c", "pve1", "1"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_version_info").value_of(&["8.2", "ca8c8d6b", "8.2.4"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_guest_info")
            .value_of(&["qemu/100", "pve1", "web", "qemu", "0", "prod;web"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_storage_info").value_of(&[
            "storage/pve1/local",
            "pve1",
            "local",
            "dir",
            "backup,iso,vztmpl"
        ]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_ha_state").value_of(&["qemu/100", "started"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_lock_state").value_of(&["lxc/101", "backup"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_not_backed_up_total").value_of(&["cluster/lab"]),
        Some(1.0)
    );
    assert_eq!(
        find(&families, "pve_not_backed_up_info").value_of(&["lxc/101"]),
        Some(1.0)
    );

    // bulk listings are shared by all collectors of the scrape
    assert_eq!(api.calls("cluster/resources"), 1);
    assert_eq!(api.calls("cluster/status"), 1);
    // node scope is off
    assert_eq!(api.calls("nodes/pve1/subscription"), 0);
}

#[tokio::test]
async fn test_collector_output_order() {
    let api = Arc::new(two_node_cluster());
    let families = collect_families(
        api,
        CLUSTER_ONLY,
        &CollectorOptions::default(),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    let position = |name: &str| families.iter().position(|f| f.name() == name).unwrap();
    assert!(position("pve_up") < position("pve_disk_size_bytes"));
    assert!(position("pve_storage_info") < position("pve_node_info"));
    assert!(position("pve_node_info") < position("pve_cluster_info"));
    assert!(position("pve_cluster_info") < position("pve_version_info"));
    assert!(position("pve_version_info") < position("pve_not_backed_up_total"));
}

#[tokio::test]
async fn test_disabled_collectors_issue_no_calls() {
    let api = Arc::new(two_node_cluster());
    let options = CollectorOptions {
        version: false,
        backup_info: false,
        ..CollectorOptions::default()
    };
    let families = collect_families(
        api.clone(),
        CLUSTER_ONLY,
        &options,
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(api.calls("version"), 0);
    assert_eq!(api.calls("cluster/backup-info/not-backed-up"), 0);
    assert!(families.iter().all(|f| f.name() != "pve_version_info"));
}

#[tokio::test]
async fn test_unexpected_status_entry_fails_scrape() {
    let api = Arc::new(
        FakeApi::new()
            .with(
                "cluster/status",
                json!([{"type": "qemu", "id": "qemu/100", "name": "web"}]),
            )
            .with("cluster/resources", json!([])),
    );
    let options = CollectorOptions::default();

    let err = collect_families(api, CLUSTER_ONLY, &options, &GuestAgentOptions::default())
        .await
        .unwrap_err();
    match err {
        ScrapeError::Collect {
            collector,
            source: CollectError::UnexpectedStatusEntry(entry_type),
        } => {
            assert_eq!(collector, "status");
            assert_eq!(entry_type, "qemu");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_standalone_node_has_no_cluster_info() {
    let api = Arc::new(
        FakeApi::new()
            .with(
                "cluster/status",
                json!([{"type": "node", "id": "node/solo", "name": "solo", "online": 1,
                        "nodeid": 0, "level": ""}]),
            )
            .with(
                "cluster/resources",
                json!([{"type": "node", "id": "node/solo", "node": "solo", "status": "online"}]),
            )
            .with("version", json!({"release": "8.2", "repoid": "x", "version": "8.2.4"}))
            .with("cluster/backup-info/not-backed-up", json!([])),
    );

    let text = collect_pve(
        api,
        CLUSTER_ONLY,
        &CollectorOptions::default(),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    assert!(text.contains("pve_up{id=\"node/solo\",name=\"solo\"} 1"));
    assert!(text.contains("pve_not_backed_up_total{id=\"cluster/solo\"} 0"));
    assert!(!text.contains("pve_cluster_info"));
    assert!(!text.contains("pve_lock_state"));
}

#[tokio::test]
async fn test_failing_primary_call_fails_scrape() {
    let api = Arc::new(two_node_cluster().failing("version", 500));

    let err = collect_families(
        api,
        CLUSTER_ONLY,
        &CollectorOptions::default(),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ScrapeError::Collect {
            collector: "version",
            ..
        }
    ));
}

#[tokio::test]
async fn test_exposition_text() {
    let api = Arc::new(two_node_cluster());
    let text = collect_pve(
        api,
        CLUSTER_ONLY,
        &CollectorOptions::default(),
        &GuestAgentOptions::default(),
    )
    .await
    .unwrap();

    assert!(text.contains("# TYPE pve_network_receive_bytes_total counter"));
    assert!(text.contains("# TYPE pve_network_receive_bytes gauge"));
    assert!(text.contains("pve_network_receive_bytes_total{id=\"qemu/100\",name=\"web\"} 11"));
    assert!(text.contains("pve_memory_usage_bytes{id=\"node/pve1\",name=\"\"} 4096"));
}

#[tokio::test]
async fn test_status_of_one_node_cluster() {
    let api = Arc::new(
        FakeApi::new()
            .with(
                "cluster/status",
                json!([
                    {"type": "node", "id": "node/pve1", "name": "pve1", "online": 1},
                    {"type": "cluster", "id": "cluster", "name": "lab", "quorate": 1},
                ]),
            )
            .with(
                "cluster/resources",
                json!([{"type": "node", "id": "node/pve1", "node": "pve1", "status": "online"}]),
            ),
    );
    let options = CollectorOptions {
        status: true,
        ..disabled()
    };

    let families = collect_families(api, CLUSTER_ONLY, &options, &GuestAgentOptions::default())
        .await
        .unwrap();

    assert_eq!(families.len(), 1);
    let up = &families[0];
    assert_eq!(up.samples().len(), 2);
    assert_eq!(up.value_of(&["node/pve1", "pve1"]), Some(1.0));
    assert_eq!(up.value_of(&["cluster/lab", "lab"]), Some(1.0));
}

fn disabled() -> CollectorOptions {
    CollectorOptions {
        status: false,
        version: false,
        node: false,
        cluster: false,
        resources: false,
        backup_info: false,
        config: false,
        replication: false,
        subscription: false,
        storage: false,
        qga_fs: false,
    }
}
