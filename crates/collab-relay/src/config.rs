//! Relay configuration from environment variables.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Data directory escapes its base: {0}")]
    UnsafeDataDir(String),
}

/// Server configuration. Environment variables:
/// - `PORT`: listen port (default 8787)
/// - `WS_AUTH_TOKEN`: shared secret; when set, clients must present it
/// - `ALLOWED_ORIGINS`: comma-separated origin allowlist
/// - `VALIDATE_ORIGIN`: whether to enforce the allowlist (default true)
/// - `MAX_CONNECTIONS`: per-IP connection cap (default 50)
/// - `DATA_DIR`: relative persistence directory (default "data")
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub auth_token: Option<String>,
    pub allowed_origins: Vec<String>,
    pub validate_origin: bool,
    pub max_connections_per_ip: usize,
    pub data_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            auth_token: None,
            allowed_origins: Vec::new(),
            validate_origin: true,
            max_connections_per_ip: 50,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("not a port number: {}", port),
            })?;
        }

        if let Ok(token) = std::env::var("WS_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Ok(validate) = std::env::var("VALIDATE_ORIGIN") {
            config.validate_origin = match validate.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "VALIDATE_ORIGIN",
                        reason: format!("expected a boolean, got: {}", other),
                    })
                }
            };
        }

        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            config.max_connections_per_ip = max.parse().map_err(|_| ConfigError::Invalid {
                name: "MAX_CONNECTIONS",
                reason: format!("not a number: {}", max),
            })?;
        }

        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = validate_data_dir(&dir)?;
        }

        Ok(config)
    }

    /// Whether an Origin header value passes the allowlist.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if !self.validate_origin {
            return true;
        }
        // No allowlist configured: accept any origin (including none,
        // which native clients send)
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            Some(origin) => self.allowed_origins.iter().any(|o| o == origin),
            None => false,
        }
    }
}

/// Reject data directory values that traverse outside their base.
fn validate_data_dir(dir: &str) -> Result<PathBuf, ConfigError> {
    let path = Path::new(dir);
    if path.is_absolute() {
        return Err(ConfigError::UnsafeDataDir(dir.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(ConfigError::UnsafeDataDir(dir.to_string())),
        }
    }
    Ok(path.to_path_buf())
}
