//! Control-plane resource records and their label resolution.
//!
//! `cluster/resources` and `cluster/status` return flat lists of loosely typed
//! records whose shape depends on a `type` field. They are parsed into the
//! closed [`ResourceRecord`] union here; record types this exporter does not
//! know about become [`ResourceRecord::Unknown`] and are routed nowhere.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Resource kinds with a dedicated record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Node,
    Cluster,
    Qemu,
    Lxc,
    Storage,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Qemu => "qemu",
            ResourceKind::Lxc => "lxc",
            ResourceKind::Storage => "storage",
        }
    }
}

/// Numeric usage fields shared by nodes, guests and storages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "lenient::number")]
    pub cpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub maxcpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub mem: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub maxmem: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub disk: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub maxdisk: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub uptime: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub netin: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub netout: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub diskread: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub diskwrite: Option<f64>,
}

/// Selector for one field of [`Usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageField {
    MaxDisk,
    Disk,
    MaxMem,
    Mem,
    NetOut,
    NetIn,
    DiskWrite,
    DiskRead,
    Cpu,
    MaxCpu,
    Uptime,
}

impl Usage {
    pub fn get(&self, field: UsageField) -> Option<f64> {
        match field {
            UsageField::MaxDisk => self.maxdisk,
            UsageField::Disk => self.disk,
            UsageField::MaxMem => self.maxmem,
            UsageField::Mem => self.mem,
            UsageField::NetOut => self.netout,
            UsageField::NetIn => self.netin,
            UsageField::DiskWrite => self.diskwrite,
            UsageField::DiskRead => self.diskread,
            UsageField::Cpu => self.cpu,
            UsageField::MaxCpu => self.maxcpu,
            UsageField::Uptime => self.uptime,
        }
    }
}

/// A cluster node, as reported by either `cluster/resources` or `cluster/status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub online: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub local: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub nodeid: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub hastate: Option<String>,
    #[serde(flatten)]
    pub usage: Usage,
}

impl NodeRecord {
    /// Node name used in API paths (`nodes/<name>/...`).
    pub fn node_name(&self) -> Option<&str> {
        self.node
            .as_deref()
            .or(self.name.as_deref())
            .or_else(|| self.id.strip_prefix("node/"))
    }
}

/// The cluster entry of `cluster/status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusterRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub nodes: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub quorate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub version: Option<String>,
}

impl ClusterRecord {
    /// Label id of the cluster, `cluster/<name>`.
    pub fn label_id(&self) -> String {
        format!("cluster/{}", self.name)
    }
}

/// A virtual machine or container.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GuestRecord {
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub vmid: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub template: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub tags: Option<String>,
    #[serde(default)]
    pub hastate: Option<String>,
    #[serde(default)]
    pub lock: Option<String>,
    #[serde(flatten)]
    pub usage: Usage,
}

impl GuestRecord {
    pub fn is_running(&self) -> bool {
        self.status.as_deref() == Some("running")
    }
}

/// A storage as seen from one node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageRecord {
    pub id: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub plugintype: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub shared: Option<f64>,
    #[serde(flatten)]
    pub usage: Usage,
}

impl StorageRecord {
    pub fn is_available(&self) -> bool {
        self.status.as_deref() == Some("available")
    }
}

/// One record of a control-plane listing, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceRecord {
    Node(NodeRecord),
    Cluster(ClusterRecord),
    Qemu(GuestRecord),
    Lxc(GuestRecord),
    Storage(StorageRecord),
    #[serde(other)]
    Unknown,
}

/// Label values of the kind-specific info metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoLabels {
    /// `id, node, name, type, template, tags`
    Guest([String; 6]),
    /// `id, node, storage, plugintype, content`
    Storage([String; 5]),
}

pub const GUEST_INFO_LABELS: [&str; 6] = ["id", "node", "name", "type", "template", "tags"];
pub const STORAGE_INFO_LABELS: [&str; 5] = ["id", "node", "storage", "plugintype", "content"];

impl ResourceRecord {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            ResourceRecord::Node(_) => Some(ResourceKind::Node),
            ResourceRecord::Cluster(_) => Some(ResourceKind::Cluster),
            ResourceRecord::Qemu(_) => Some(ResourceKind::Qemu),
            ResourceRecord::Lxc(_) => Some(ResourceKind::Lxc),
            ResourceRecord::Storage(_) => Some(ResourceKind::Storage),
            ResourceRecord::Unknown => None,
        }
    }

    /// Primary label of the record (`<kind>/<key>`).
    pub fn id(&self) -> Option<&str> {
        match self {
            ResourceRecord::Node(n) => Some(&n.id),
            ResourceRecord::Cluster(c) => c.id.as_deref(),
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => Some(&g.id),
            ResourceRecord::Storage(s) => Some(&s.id),
            ResourceRecord::Unknown => None,
        }
    }

    /// Value of the `name` label: `name` for nodes and guests, `storage` for
    /// storages, empty otherwise or when the field is absent.
    pub fn name_label(&self) -> &str {
        let name = match self {
            ResourceRecord::Node(n) => n.name.as_deref(),
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => g.name.as_deref(),
            ResourceRecord::Storage(s) => s.storage.as_deref(),
            ResourceRecord::Cluster(_) | ResourceRecord::Unknown => None,
        };
        name.unwrap_or("")
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            ResourceRecord::Node(n) => Some(&n.usage),
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => Some(&g.usage),
            ResourceRecord::Storage(s) => Some(&s.usage),
            ResourceRecord::Cluster(_) | ResourceRecord::Unknown => None,
        }
    }

    pub fn hastate(&self) -> Option<&str> {
        match self {
            ResourceRecord::Node(n) => n.hastate.as_deref(),
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => g.hastate.as_deref(),
            _ => None,
        }
    }

    pub fn lock(&self) -> Option<&str> {
        match self {
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => g.lock.as_deref(),
            _ => None,
        }
    }

    /// Label values for the info metric of this kind, if the kind has one.
    pub fn info_labels(&self) -> Option<InfoLabels> {
        match self {
            ResourceRecord::Qemu(g) | ResourceRecord::Lxc(g) => {
                let kind = self.kind().map(|k| k.as_str()).unwrap_or_default();
                Some(InfoLabels::Guest([
                    g.id.clone(),
                    g.node.clone().unwrap_or_default(),
                    g.name.clone().unwrap_or_default(),
                    kind.to_string(),
                    g.template.clone().unwrap_or_default(),
                    g.tags.clone().unwrap_or_default(),
                ]))
            }
            ResourceRecord::Storage(s) => Some(InfoLabels::Storage([
                s.id.clone(),
                s.node.clone().unwrap_or_default(),
                s.storage.clone().unwrap_or_default(),
                s.plugintype.clone().unwrap_or_default(),
                canonicalize_csv(s.content.as_deref().unwrap_or_default()),
            ])),
            _ => None,
        }
    }
}

/// Sorts the elements of a comma separated list.
///
/// The control plane does not keep the order of list valued fields stable
/// between calls; using them as label values verbatim would create a new
/// time series whenever the order changes.
pub fn canonicalize_csv(value: &str) -> String {
    let mut parts = value.split(',').collect::<Vec<_>>();
    parts.sort_unstable();
    parts.join(",")
}

/// Parses a `cluster/resources` listing.
///
/// Records that cannot be parsed (e.g. missing `id`) are skipped with a warning.
pub fn parse_records(data: Value) -> Result<Vec<ResourceRecord>, serde_json::Error> {
    let raw = Vec::<Value>::deserialize(data)?;
    Ok(raw.into_iter().filter_map(parse_record).collect())
}

fn parse_record(raw: Value) -> Option<ResourceRecord> {
    match ResourceRecord::deserialize(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(
                "Skipping malformed resource record of type {:?}: {}",
                record_type(&raw).unwrap_or("<none>"),
                e
            );
            None
        }
    }
}

/// One entry of `cluster/status` together with its raw `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub entry_type: String,
    pub record: ResourceRecord,
}

/// Parses a `cluster/status` listing, keeping the raw type of every entry.
///
/// Only `node` and `cluster` entries are parsed; anything else is kept as
/// [`ResourceRecord::Unknown`] so callers can reject it by its raw type.
pub fn parse_status(data: Value) -> Result<Vec<StatusEntry>, serde_json::Error> {
    let raw = Vec::<Value>::deserialize(data)?;
    let mut entries = Vec::with_capacity(raw.len());
    for value in raw {
        let entry_type = record_type(&value).unwrap_or_default().to_string();
        let record = match entry_type.as_str() {
            "node" => ResourceRecord::Node(NodeRecord::deserialize(&value)?),
            "cluster" => ResourceRecord::Cluster(ClusterRecord::deserialize(&value)?),
            _ => ResourceRecord::Unknown,
        };
        entries.push(StatusEntry { entry_type, record });
    }
    Ok(entries)
}

fn record_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Lenient deserializers for fields whose JSON type varies between API versions.
pub mod lenient {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(f64),
        Text(String),
        Flag(bool),
        Other(IgnoredAny),
    }

    /// Accepts numbers, numeric strings and booleans.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<Loose>::deserialize(d)? {
            Some(Loose::Number(n)) => Some(n),
            Some(Loose::Text(s)) => s.trim().parse().ok(),
            Some(Loose::Flag(b)) => Some(if b { 1.0 } else { 0.0 }),
            Some(Loose::Other(_)) | None => None,
        })
    }

    /// Accepts strings, numbers and booleans and renders them as label text.
    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Loose>::deserialize(d)? {
            Some(Loose::Number(n)) => Some(n.to_string()),
            Some(Loose::Text(s)) => Some(s),
            Some(Loose::Flag(b)) => Some(if b { "1" } else { "0" }.to_string()),
            Some(Loose::Other(_)) | None => None,
        })
    }

    /// Interprets a loosely typed JSON value as a number.
    pub fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Interprets a loosely typed JSON value as label text.
    pub fn as_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }
}
