//! Access to the Proxmox VE control-plane API.
//!
//! Collectors only see the [`PveApi`] trait. [`PveClient`] is the HTTP
//! implementation used in production, [`InstrumentedApi`] wraps any session to
//! record per-call latency and errors.

mod client;
mod instrumented;

pub use client::{parse_target, PveClient, SessionConfig};
pub use instrumented::{ApiMetrics, InstrumentedApi};

use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Future returned by [`PveApi::get`].
pub type ApiFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send + 'a>>;

/// Errors raised by an API session.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{path} returned {status}: {message}")]
    Remote {
        path: String,
        status: u16,
        message: String,
    },

    #[error("cannot decode response of {path}: {message}")]
    Decode { path: String, message: String },

    #[error("invalid target '{0}'")]
    InvalidTarget(String),
}

impl ApiError {
    pub fn decode(path: &str, err: impl std::fmt::Display) -> Self {
        ApiError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// An open session to one control-plane endpoint.
///
/// `get` takes a path relative to `/api2/json` without leading slash
/// (`cluster/resources`) and resolves to the `data` member of the response.
pub trait PveApi: Send + Sync {
    fn get<'a>(&'a self, path: &'a str) -> ApiFuture<'a>;

    /// Base URL of the session, used as label value by the instrumentation.
    fn base_url(&self) -> &str;
}

/// Fetches `path` and deserializes the `data` payload into `T`.
pub async fn get_as<T: DeserializeOwned>(api: &dyn PveApi, path: &str) -> Result<T, ApiError> {
    let data = api.get(path).await?;
    serde_json::from_value(data).map_err(|e| ApiError::decode(path, e))
}
