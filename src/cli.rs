//! CLI arguments for pve-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including the server flags and the per-collector toggles.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args as ClapArgs, Parser, ValueEnum};
use pve_exporter::{CollectorOptions, GuestAgentOptions};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "pve-exporter",
    about = "Prometheus exporter for Proxmox VE clusters",
    long_about = "Prometheus exporter for Proxmox VE clusters.\n\n\
                  Polls the Proxmox VE API on every scrape of /pve and exports node, guest \
                  and storage status, resource usage, guest configuration, replication, \
                  subscription and guest filesystem metrics.",
    version,
    propagate_version = true
)]
pub struct Args {
    /// Module config file (YAML/JSON/TOML), ignored when PVE_USER is set
    #[arg(short = 'c', long, default_value = "pve.yml")]
    pub config: PathBuf,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Path to TLS certificate file (PEM format), enables HTTPS together with --tls-key
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    #[command(flatten)]
    pub collectors: CollectorArgs,

    /// Number of guests probed concurrently by the qga-fs collector
    #[arg(
        long = "collector.qga-fs.workers",
        default_value_t = 16,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub qga_workers: u16,

    /// Per-guest timeout of the qga-fs collector in seconds
    #[arg(long = "collector.qga-fs.timeout", default_value_t = 10)]
    pub qga_timeout: u64,

    /// Record duration and errors of every PVE API call
    #[arg(
        id = "metrics_api",
        long = "metrics.api",
        env = "PVE_METRICS_API",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "false",
        action = ArgAction::Set
    )]
    pub metrics_api: bool,

    /// Record duration and errors per scraped target
    #[arg(
        id = "metrics_target",
        long = "metrics.target",
        env = "PVE_METRICS_TARGET",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "false",
        action = ArgAction::Set
    )]
    pub metrics_target: bool,
}

impl Args {
    pub fn guest_agent_options(&self) -> GuestAgentOptions {
        GuestAgentOptions {
            workers: usize::from(self.qga_workers),
            timeout: Duration::from_secs(self.qga_timeout),
        }
    }
}

/// Collector toggles.
///
/// Each toggle accepts `--collector.<name>`, `--collector.<name>=false` and
/// the `PVE_COLLECTOR_<NAME>` environment variable; an explicit flag wins
/// over the environment, which wins over the default.
#[derive(ClapArgs, Debug, Clone)]
pub struct CollectorArgs {
    /// Exposes Node/VM/CT-Status
    #[arg(
        id = "collector_status",
        long = "collector.status",
        env = "PVE_COLLECTOR_STATUS",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub status: bool,

    /// Exposes PVE version info
    #[arg(
        id = "collector_version",
        long = "collector.version",
        env = "PVE_COLLECTOR_VERSION",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub version: bool,

    /// Exposes PVE node info
    #[arg(
        id = "collector_node",
        long = "collector.node",
        env = "PVE_COLLECTOR_NODE",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub node: bool,

    /// Exposes PVE cluster info
    #[arg(
        id = "collector_cluster",
        long = "collector.cluster",
        env = "PVE_COLLECTOR_CLUSTER",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub cluster: bool,

    /// Exposes PVE resources info
    #[arg(
        id = "collector_resources",
        long = "collector.resources",
        env = "PVE_COLLECTOR_RESOURCES",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub resources: bool,

    /// Exposes guests not covered by any backup job
    #[arg(
        id = "collector_backup_info",
        long = "collector.backup-info",
        env = "PVE_COLLECTOR_BACKUP_INFO",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub backup_info: bool,

    /// Exposes PVE onboot status and guest configuration
    #[arg(
        id = "collector_config",
        long = "collector.config",
        env = "PVE_COLLECTOR_CONFIG",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub config: bool,

    /// Exposes PVE replication info
    #[arg(
        id = "collector_replication",
        long = "collector.replication",
        env = "PVE_COLLECTOR_REPLICATION",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub replication: bool,

    /// Exposes PVE subscription info
    #[arg(
        id = "collector_subscription",
        long = "collector.subscription",
        env = "PVE_COLLECTOR_SUBSCRIPTION",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub subscription: bool,

    /// Exposes storage contents (can be slow on large storages)
    #[arg(
        id = "collector_storage",
        long = "collector.storage",
        env = "PVE_COLLECTOR_STORAGE",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "false",
        action = ArgAction::Set
    )]
    pub storage: bool,

    /// Exposes filesystem usage inside guests via the QEMU guest agent
    #[arg(
        id = "collector_qga_fs",
        long = "collector.qga-fs",
        env = "PVE_COLLECTOR_QGA_FS",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub qga_fs: bool,
}

impl From<&CollectorArgs> for CollectorOptions {
    fn from(args: &CollectorArgs) -> Self {
        CollectorOptions {
            status: args.status,
            version: args.version,
            node: args.node,
            cluster: args.cluster,
            resources: args.resources,
            backup_info: args.backup_info,
            config: args.config,
            replication: args.replication,
            subscription: args.subscription,
            storage: args.storage,
            qga_fs: args.qga_fs,
        }
    }
}
