//! Configuration management for pve-exporter.
//!
//! A configuration is a set of named modules, each one holding the
//! credentials and connection settings used to scrape a target. Modules are
//! read from a YAML, JSON or TOML file, or from `PVE_*` environment variables
//! when `PVE_USER` is set. Listener settings come from the CLI.

use crate::cli::Args;
use pve_exporter::SessionConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9221;
pub const DEFAULT_MODULE: &str = "default";

/// One named set of credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    #[serde(flatten)]
    pub session: SessionConfig,

    /// Targets this module may be used for. All targets when absent.
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

impl ModuleConfig {
    pub fn allows(&self, target: &str) -> bool {
        match &self.targets {
            Some(targets) => targets.iter().any(|t| t == target),
            None => true,
        }
    }
}

/// Where the modules were read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Environment => f.write_str("environment"),
        }
    }
}

/// Effective configuration of the exporter.
#[derive(Debug, Clone)]
pub struct Config {
    pub modules: BTreeMap<String, ModuleConfig>,
    pub source: ConfigSource,
    pub bind: String,
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.modules.is_empty() {
        return Err(format!("No modules configured in {}", cfg.source).into());
    }

    for (name, module) in &cfg.modules {
        let session = &module.session;
        if session.user.trim().is_empty() {
            return Err(format!("Module '{}': user must not be empty", name).into());
        }

        let has_password = session.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_password && session.token().is_none() {
            if session.token_name.is_some() || session.token_value.is_some() {
                return Err(format!(
                    "Module '{}': token_name and token_value must both be set",
                    name
                )
                .into());
            }
            return Err(format!(
                "Module '{}': either password or token_name/token_value must be set",
                name
            )
            .into());
        }

        if module.targets.as_ref().is_some_and(|t| t.is_empty()) {
            return Err(format!("Module '{}': targets must not be empty when set", name).into());
        }
    }

    // TLS validation
    match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
        (None, None) => {}
        (Some(_), None) => {
            return Err("TLS certificate is set but --tls-key is missing".into());
        }
        (None, Some(_)) => {
            return Err("TLS private key is set but --tls-cert is missing".into());
        }
        (Some(cert), Some(key)) => {
            check_pem_file(cert, "TLS certificate file")?;
            check_pem_file(key, "TLS private key file")?;
        }
    }

    Ok(())
}

fn check_pem_file(path: &Path, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("{} not found: {}", what, path.display()).into());
    }
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => {
            Err(format!("{} is empty: {}", what, path.display()).into())
        }
        Err(e) => Err(format!("{} is not readable: {} ({})", what, path.display(), e).into()),
        Ok(_) => Ok(()),
    }
}

/// Resolves configuration from CLI args, the environment and the module file.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let lookup = |key: &str| std::env::var(key).ok();

    let (modules, source) = match modules_from_env(lookup) {
        Some(modules) => {
            info!("Loaded module configuration from PVE_* environment variables");
            (modules, ConfigSource::Environment)
        }
        None => (
            load_config(&args.config)?,
            ConfigSource::File(args.config.clone()),
        ),
    };

    Ok(Config {
        modules,
        source,
        bind: args
            .bind
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        port: args.port.unwrap_or(DEFAULT_PORT),
        tls_cert_path: args.tls_cert.clone(),
        tls_key_path: args.tls_key.clone(),
    })
}

/// Builds a single module from `PVE_*` variables. `None` unless `PVE_USER` is set.
pub fn modules_from_env<F>(var: F) -> Option<BTreeMap<String, ModuleConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let user = var("PVE_USER")?;

    let mut session = SessionConfig::with_password(user, String::new());
    session.password = var("PVE_PASSWORD");
    session.token_name = var("PVE_TOKEN_NAME");
    session.token_value = var("PVE_TOKEN_VALUE");
    if let Some(verify) = var("PVE_VERIFY_SSL") {
        session.verify_ssl = !matches!(verify.to_ascii_lowercase().as_str(), "false" | "0");
    }

    let name = var("PVE_MODULE").unwrap_or_else(|| DEFAULT_MODULE.to_string());
    let module = ModuleConfig {
        session,
        targets: None,
    };
    Some(BTreeMap::from([(name, module)]))
}

/// Loads the module file, format chosen by extension (YAML by default).
pub fn load_config(
    path: &Path,
) -> Result<BTreeMap<String, ModuleConfig>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()).into());
    }

    let content = fs::read_to_string(path)?;
    let modules = parse_modules(&content, path.extension().and_then(|s| s.to_str()))?;
    info!(
        "Loaded {} module(s) from: {}",
        modules.len(),
        path.display()
    );
    Ok(modules)
}

fn parse_modules(
    content: &str,
    extension: Option<&str>,
) -> Result<BTreeMap<String, ModuleConfig>, Box<dyn std::error::Error>> {
    let modules = match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        // Default to YAML
        _ => serde_yaml::from_str::<Option<BTreeMap<String, ModuleConfig>>>(content)?
            .unwrap_or_default(),
    };
    Ok(modules)
}
