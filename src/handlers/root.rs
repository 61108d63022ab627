//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.start_time.elapsed().as_secs();
    let uptime_str = format!(
        "{}h {}m {}s",
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
        uptime_secs % 60
    );

    let modules = state
        .config
        .modules
        .keys()
        .map(|m| format!("<code>{}</code>", m))
        .collect::<Vec<_>>()
        .join(" ");

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Proxmox VE Exporter</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; line-height: 1.6; }}
        .container {{ max-width: 900px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; border-bottom: 3px solid #007bff; padding-bottom: 15px; }}
        .info {{ background: #e9ecef; padding: 15px; border-radius: 4px; margin: 20px 0; }}
        code {{ background: #e9ecef; padding: 2px 6px; border-radius: 3px; font-family: 'Courier New', monospace; }}
    </style>
</head>
<body>
<div class="container">
    <h1>Proxmox VE Exporter</h1>
    <p>Visit <code>/pve?target=1.2.3.4</code> to use.</p>
    <div class="info">
        <div>Version: {version}</div>
        <div>Uptime: {uptime}</div>
        <div>Modules: {modules}</div>
    </div>
    <ul>
        <li><a href="/pve?target=localhost">/pve</a>: scrape a target (<code>module</code>, <code>target</code>, <code>cluster</code>, <code>node</code>)</li>
        <li><a href="/metrics">/metrics</a>: exporter self-metrics</li>
    </ul>
</div>
</body>
</html>"#,
        version = version,
        uptime = uptime_str,
        modules = modules
    );
    Html(html)
}
