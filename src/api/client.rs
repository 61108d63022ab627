//! HTTP session against `https://<host>:<port>/api2/json`.

use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ApiError, ApiFuture, PveApi};

fn default_verify_ssl() -> bool {
    true
}

fn default_port() -> u16 {
    8006
}

fn default_timeout() -> u64 {
    5
}

/// Connection parameters of one module.
///
/// Host independent: the same module can be pointed at any target it allows.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token_name: Option<String>,
    #[serde(default)]
    pub token_value: Option<String>,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl SessionConfig {
    pub fn with_password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
            token_name: None,
            token_value: None,
            verify_ssl: default_verify_ssl(),
            port: default_port(),
            timeout: default_timeout(),
        }
    }

    /// Returns `(token_name, token_value)` when both are configured.
    pub fn token(&self) -> Option<(&str, &str)> {
        match (self.token_name.as_deref(), self.token_value.as_deref()) {
            (Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
                Some((name, value))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SessionConfig")
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("token_name", &self.token_name)
            .field("token_value", &redacted(&self.token_value))
            .field("verify_ssl", &self.verify_ssl)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Splits a scrape target into host and port.
///
/// Accepts `host`, `host:port`, `[v6]`, `[v6]:port` and bare IPv6 addresses.
/// The returned host is URL ready (IPv6 addresses are bracketed).
pub fn parse_target(target: &str, default_port: u16) -> Result<(String, u16), ApiError> {
    let target = target.trim();
    let invalid = || ApiError::InvalidTarget(target.to_string());

    if target.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match tail {
            "" => default_port,
            _ => tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)?,
        };
        return Ok((format!("[{}]", host), port));
    }

    match target.matches(':').count() {
        0 => Ok((target.to_string(), default_port)),
        1 => {
            let (host, port) = target.split_once(':').ok_or_else(invalid)?;
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok((host.to_string(), port))
        }
        _ => Ok((format!("[{}]", target), default_port)),
    }
}

enum Credentials {
    /// Value of the `Authorization` header.
    Token(String),
    /// Value of the `Cookie` header.
    Ticket(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
}

/// Authenticated session against one Proxmox VE endpoint.
pub struct PveClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl PveClient {
    /// Opens a session to `target`.
    ///
    /// With password authentication this performs the ticket login, so
    /// unreachable targets and bad credentials fail here.
    pub async fn connect(target: &str, config: &SessionConfig) -> Result<Self, ApiError> {
        let (host, port) = parse_target(target, config.port)?;
        let base_url = format!("https://{}:{}/api2/json", host, port);

        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ApiError::Transport {
                path: base_url.clone(),
                message: e.to_string(),
            })?;

        let credentials = match (config.token(), config.password.as_deref()) {
            (Some((name, value)), _) => {
                Credentials::Token(format!("PVEAPIToken={}!{}={}", config.user, name, value))
            }
            (None, Some(password)) => {
                let ticket = login(&client, &base_url, &config.user, password).await?;
                Credentials::Ticket(format!("PVEAuthCookie={}", ticket))
            }
            (None, None) => {
                return Err(ApiError::Auth(format!(
                    "no password or API token configured for {}",
                    config.user
                )))
            }
        };

        debug!("Opened API session to {}", base_url);
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Token(value) => request.header(AUTHORIZATION, value),
            Credentials::Ticket(value) => request.header(COOKIE, value),
        }
    }

    async fn fetch(&self, path: &str) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth(format!("{} rejected the session", path)));
        }
        if !status.is_success() {
            // PVE puts the reason into the status line, the body is usually empty.
            let message = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_default();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                path: path.to_string(),
                status: status.as_u16(),
                message: if body.trim().is_empty() {
                    message
                } else {
                    body.trim().to_string()
                },
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ApiError::decode(path, e))?;
        Ok(envelope.data)
    }
}

async fn login(
    client: &Client,
    base_url: &str,
    user: &str,
    password: &str,
) -> Result<String, ApiError> {
    let url = format!("{}/access/ticket", base_url);
    let response = client
        .post(&url)
        .form(&[("username", user), ("password", password)])
        .send()
        .await
        .map_err(|e| ApiError::Transport {
            path: "access/ticket".to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Auth(format!(
            "login of {} at {} failed with status {}",
            user, base_url, status
        )));
    }

    #[derive(Deserialize)]
    struct LoginEnvelope {
        data: Option<Ticket>,
    }

    let envelope: LoginEnvelope = response
        .json()
        .await
        .map_err(|e| ApiError::decode("access/ticket", e))?;
    envelope
        .data
        .map(|t| t.ticket)
        .ok_or_else(|| ApiError::Auth(format!("login of {} returned no ticket", user)))
}

impl PveApi for PveClient {
    fn get<'a>(&'a self, path: &'a str) -> ApiFuture<'a> {
        Box::pin(self.fetch(path))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
