//! HTTP endpoint handlers for the exporter.
//!
//! - `/`: landing page
//! - `/pve`: scrape of one Proxmox VE target
//! - `/metrics`: the exporter's own metrics

pub mod metrics;
pub mod pve;
pub mod root;

// Re-export handlers
pub use metrics::metrics_handler;
pub use pve::pve_handler;
pub use root::root_handler;
