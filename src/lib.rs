//! Proxmox VE Exporter Library
//!
//! This library polls the Proxmox VE control-plane API and translates the
//! returned records into Prometheus metric families. The HTTP front end in
//! the `pve-exporter` binary is a thin layer on top of [`scrape_target`].
//!
//! # Features
//!
//! - **Cluster Resources**: usage gauges, I/O counters, HA and lock state of nodes,
//!   guests and storages
//! - **Node Enrichment**: guest configuration, replication jobs and subscription status per node
//! - **Guest Agent**: per-filesystem usage inside running VMs with bounded concurrency
//! - **Partial Failure Isolation**: one unreachable node or guest never fails a scrape
//!
//! # Usage
//!
//! ```rust,no_run
//! use pve_exporter::{
//!     scrape_target, CollectorOptions, GuestAgentOptions, ScrapeScope, SessionConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionConfig::with_password("monitor@pve", "secret");
//! let text = scrape_target(
//!     "pve1.example.com",
//!     &session,
//!     ScrapeScope::default(),
//!     &CollectorOptions::default(),
//!     &GuestAgentOptions::default(),
//!     None,
//! )
//! .await?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod collectors;
pub mod family;
pub mod options;
pub mod resources;
pub mod scrape;

// Re-export main types for convenience
pub use api::{ApiError, ApiMetrics, PveApi, SessionConfig};
pub use family::{encode_text, MetricFamily};
pub use options::{CollectorOptions, GuestAgentOptions};
pub use scrape::{collect_families, collect_pve, scrape_target, ScrapeError, ScrapeScope};
