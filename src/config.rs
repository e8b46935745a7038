//! Configuration loading.
//!
//! YAML file with `${VAR}` / `${VAR:-default}` environment expansion.
//! A missing config file yields the defaults.

use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::cost::PricingTable;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pricing: PricingTable,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub keep_alive_interval_seconds: u64,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9600,
            request_timeout_seconds: 300,
            keep_alive_interval_seconds: 15,
            max_connections: 256,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Override the backend base URL (proxies, test servers).
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
            temperature: None,
            max_output_tokens: 4000,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum model/tool iterations per turn.
    pub max_tool_iterations: u32,
    /// Per-suspension-point timeout awaiting model events.
    pub model_idle_timeout_seconds: u64,
    /// Bounded timeout per tool invocation.
    pub tool_timeout_seconds: u64,
    /// Sessions idle beyond this window are evicted.
    pub idle_ttl_minutes: i64,
    /// How often the eviction sweep runs.
    pub eviction_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            model_idle_timeout_seconds: 60,
            tool_timeout_seconds: 30,
            idle_ttl_minutes: 120,
            eviction_interval_seconds: 300,
        }
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports `${VAR}` (required), `${VAR:-default}`, and `$$` as an escaped
/// `$`. No nested expansion.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some((start, '{')) => {
                let start = *start;
                let rest = &input[start..];
                let Some(end) = rest.find('}') else {
                    return Err(ConfigError::UnclosedVarReference);
                };
                let inner = &rest[1..end];
                let (name, default) = match inner.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (inner, None),
                };
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => match default {
                        Some(d) => out.push_str(d),
                        None => return Err(ConfigError::MissingEnvVar(name.to_string())),
                    },
                }
                // Skip past the closing brace.
                while let Some((i, _)) = chars.peek() {
                    if *i > start + end {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}
