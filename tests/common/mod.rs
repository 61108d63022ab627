//! Scripted in-memory API session shared by the integration tests.

#![allow(dead_code)]

use pve_exporter::api::ApiFuture;
use pve_exporter::family::MetricFamily;
use pve_exporter::{ApiError, PveApi};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Reply {
    Data(Value),
    Fail(u16),
    Hang,
}

/// Answers paths from a fixed table and counts every call.
///
/// Unscripted paths fail with 404, hanging paths sleep for an hour.
#[derive(Default)]
pub struct FakeApi {
    replies: HashMap<String, Reply>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, data: Value) -> Self {
        self.replies.insert(path.to_string(), Reply::Data(data));
        self
    }

    pub fn failing(mut self, path: &str, status: u16) -> Self {
        self.replies.insert(path.to_string(), Reply::Fail(status));
        self
    }

    pub fn hanging(mut self, path: &str) -> Self {
        self.replies.insert(path.to_string(), Reply::Hang);
        self
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl PveApi for FakeApi {
    fn get<'a>(&'a self, path: &'a str) -> ApiFuture<'a> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        let reply = self.replies.get(path).cloned();

        Box::pin(async move {
            match reply {
                Some(Reply::Data(data)) => Ok(data),
                Some(Reply::Fail(status)) => Err(ApiError::Remote {
                    path: path.to_string(),
                    status,
                    message: "scripted failure".to_string(),
                }),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ApiError::Transport {
                        path: path.to_string(),
                        message: "hung".to_string(),
                    })
                }
                None => Err(ApiError::Remote {
                    path: path.to_string(),
                    status: 404,
                    message: "not scripted".to_string(),
                }),
            }
        })
    }

    fn base_url(&self) -> &str {
        "https://fake.invalid:8006/api2/json"
    }
}

/// A two node cluster with one VM, one container and one storage per node.
pub fn two_node_cluster() -> FakeApi {
    FakeApi::new()
        .with(
            "cluster/status",
            json!([
                {"type": "cluster", "id": "cluster", "name": "lab", "nodes": 2, "quorate": 1, "version": 4},
                {"type": "node", "id": "node/pve1", "name": "pve1", "online": 1, "local": 1,
                 "nodeid": 1, "level": "c", "ip": "10.0.0.1"},
                {"type": "node", "id": "node/pve2", "name": "pve2", "online": 0, "local": 0,
                 "nodeid": 2, "level": "", "ip": "10.0.0.2"},
            ]),
        )
        .with(
            "cluster/resources",
            json!([
                {"type": "node", "id": "node/pve1", "node": "pve1", "status": "online",
                 "cpu": 0.25, "maxcpu": 16, "mem": 4096, "maxmem": 65536, "uptime": 1000},
                {"type": "node", "id": "node/pve2", "node": "pve2", "status": "offline"},
                {"type": "qemu", "id": "qemu/100", "vmid": 100, "node": "pve1", "name": "web",
                 "status": "running", "template": 0, "tags": "prod;web", "hastate": "started",
                 "netin": 11, "netout": 22, "diskread": 33, "diskwrite": 44},
                {"type": "lxc", "id": "lxc/101", "vmid": 101, "node": "pve1", "name": "dns",
                 "status": "stopped", "template": 0, "lock": "backup"},
                {"type": "storage", "id": "storage/pve1/local", "node": "pve1", "storage": "local",
                 "status": "available", "plugintype": "dir", "content": "vztmpl,iso,backup",
                 "shared": 0, "disk": 100, "maxdisk": 1000},
                {"type": "sdn", "id": "sdn/pve1/localnetwork", "node": "pve1"},
            ]),
        )
        .with(
            "version",
            json!({"release": "8.2", "repoid": "ca8c8d6b", "version": "8.2.4"}),
        )
        .with(
            "cluster/backup-info/not-backed-up",
            json!([{"type": "lxc", "vmid": 101}]),
        )
}

pub fn find<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
    families
        .iter()
        .find(|f| f.name() == name)
        .unwrap_or_else(|| panic!("family {} missing", name))
}
