//! One-hot encoding of categorical states.
//!
//! A state family carries one sample per enumerated state and entity, `1` for
//! the state the entity is in and `0` for all others. An entity whose state
//! is absent or unknown gets all zeros; kinds without an enumeration get no
//! rows at all.

use crate::family::{flag, Family};
use crate::resources::{ResourceKind, ResourceRecord};

pub const HA_GUEST_STATES: &[&str] = &[
    "stopped",
    "request_stop",
    "request_start",
    "request_start_balance",
    "started",
    "fence",
    "recovery",
    "migrate",
    "relocate",
    "freeze",
    "error",
];

pub const HA_NODE_STATES: &[&str] = &["online", "maintenance", "unknown", "fence", "gone"];

pub const LOCK_GUEST_STATES: &[&str] = &[
    "backup",
    "clone",
    "create",
    "migrate",
    "rollback",
    "snapshot",
    "snapshot-delete",
    "suspended",
    "suspending",
];

pub const SUBSCRIPTION_STATES: &[&str] =
    &["new", "notfound", "active", "invalid", "expired", "suspended"];

pub const STATE_LABELS: [&str; 2] = ["id", "state"];

pub fn ha_state_family() -> Family<2> {
    Family::gauge(
        "pve_ha_state",
        "HA service status (for HA managed VMs).",
        STATE_LABELS,
    )
}

pub fn lock_state_family() -> Family<2> {
    Family::gauge(
        "pve_lock_state",
        "The guest's current config lock (for types 'qemu' and 'lxc')",
        STATE_LABELS,
    )
}

/// HA states enumerated for `kind`.
pub fn ha_states(kind: ResourceKind) -> Option<&'static [&'static str]> {
    match kind {
        ResourceKind::Qemu | ResourceKind::Lxc => Some(HA_GUEST_STATES),
        ResourceKind::Node => Some(HA_NODE_STATES),
        ResourceKind::Cluster | ResourceKind::Storage => None,
    }
}

/// Lock states enumerated for `kind`.
pub fn lock_states(kind: ResourceKind) -> Option<&'static [&'static str]> {
    match kind {
        ResourceKind::Qemu | ResourceKind::Lxc => Some(LOCK_GUEST_STATES),
        _ => None,
    }
}

/// Appends one row per state in `states` for the entity `id`.
pub fn populate_one_hot(family: &mut Family<2>, id: &str, states: &[&str], actual: Option<&str>) {
    for &state in states {
        family.add([id, state], flag(actual == Some(state)));
    }
}

pub fn encode_ha_state(family: &mut Family<2>, record: &ResourceRecord) {
    encode(family, record, ha_states, ResourceRecord::hastate)
}

pub fn encode_lock_state(family: &mut Family<2>, record: &ResourceRecord) {
    encode(family, record, lock_states, ResourceRecord::lock)
}

fn encode(
    family: &mut Family<2>,
    record: &ResourceRecord,
    states_of: fn(ResourceKind) -> Option<&'static [&'static str]>,
    actual_of: fn(&ResourceRecord) -> Option<&str>,
) {
    let (Some(kind), Some(id)) = (record.kind(), record.id()) else {
        return;
    };
    if let Some(states) = states_of(kind) {
        populate_one_hot(family, id, states, actual_of(record));
    }
}
