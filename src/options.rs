//! Per-process collector toggles.

use std::time::Duration;

/// Enables or disables the individual collectors.
///
/// Resolved once at startup from flags, environment and defaults; read-only
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub status: bool,
    pub version: bool,
    pub node: bool,
    pub cluster: bool,
    pub resources: bool,
    pub backup_info: bool,
    pub config: bool,
    pub replication: bool,
    pub subscription: bool,
    /// Storage content listings can be very large, hence off by default.
    pub storage: bool,
    pub qga_fs: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            status: true,
            version: true,
            node: true,
            cluster: true,
            resources: true,
            backup_info: true,
            config: true,
            replication: true,
            subscription: true,
            storage: false,
            qga_fs: true,
        }
    }
}

/// Limits of the guest agent filesystem probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestAgentOptions {
    /// Maximum number of guests probed concurrently.
    pub workers: usize,
    /// Budget of one guest (config lookup plus probe).
    pub timeout: Duration,
}

impl Default for GuestAgentOptions {
    fn default() -> Self {
        Self {
            workers: 16,
            timeout: Duration::from_secs(10),
        }
    }
}
