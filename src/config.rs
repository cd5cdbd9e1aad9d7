use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_STREAM_LINES,
    DEFAULT_REQUEST_TIMEOUT_SECS, ENV_PREFIX,
};
use crate::types::{ProviderConfig, Result, WirecastError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Event-stream lines read before the stream is cut off.
    pub max_stream_lines: usize,
    pub max_line_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_stream_lines: DEFAULT_MAX_STREAM_LINES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl PipelineSettings {
    /// Defaults overridden by `WIRECAST_*` environment variables (a `.env`
    /// file is loaded first if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(v) = parse_env(&lookup, "REQUEST_TIMEOUT_SECS")? {
            settings.request_timeout_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "CONNECT_TIMEOUT_SECS")? {
            settings.connect_timeout_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_STREAM_LINES")? {
            settings.max_stream_lines = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_LINE_BYTES")? {
            settings.max_line_bytes = v;
        }
        Ok(settings)
    }
}

fn parse_env<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{}{}", ENV_PREFIX, name);
    match lookup(&key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| WirecastError::Config(format!("{}={:?}: {}", key, raw, e)).into()),
        _ => Ok(None),
    }
}

/// Provider definitions as stored by the host application: a JSON array of
/// [`ProviderConfig`] objects.
pub fn load_providers(path: &Path) -> Result<Vec<ProviderConfig>> {
    let content = std::fs::read_to_string(path)?;
    let providers: Vec<ProviderConfig> = serde_json::from_str(&content).map_err(|e| {
        WirecastError::Config(format!("Invalid provider file {}: {}", path.display(), e))
    })?;
    tracing::debug!("Loaded {} provider(s) from {}", providers.len(), path.display());
    Ok(providers)
}

pub fn find_provider<'a>(providers: &'a [ProviderConfig], id: &str) -> Option<&'a ProviderConfig> {
    providers.iter().find(|p| p.id == id)
}
