//! Server configuration.
//!
//! Loaded from a YAML file (`EDGESERVE_CONFIG`, else `edgeserve.yaml` in the
//! working directory, else built-in defaults). The `LISTEN` environment
//! variable (`host:port`) overrides the listen address.
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: "8080"
//!   read_buffer_size: 1024
//! logging:
//!   level: debug
//! ```

use crate::error::{Error, Result};

use serde::{Deserialize, Deserializer};
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "edgeserve.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address to resolve and bind
    pub host: String,
    /// Numeric port; `0` picks an ephemeral one
    #[serde(deserialize_with = "port_or_service")]
    pub port: String,
    /// Size of the per-connection read buffer, reused across reads
    pub read_buffer_size: usize,
    /// Readiness notifications collected per wake cycle
    pub max_events: usize,
    /// Largest header section accepted before replying 431
    pub max_header_bytes: usize,
    /// Largest declared body accepted before replying 413
    pub max_body_bytes: usize,
    /// Value of the `Server` response header
    pub server_name: String,
}

fn port_or_service<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Service(String),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Number(number) => number.to_string(),
        Port::Service(service) => service,
    })
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: "8080".to_string(),
            read_buffer_size: 1024,
            max_events: 64,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 8 * 1024 * 1024,
            server_name: "edgeserve".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level {:?}", self.level)))
    }
}

impl Config {
    /// Loads the configuration from the environment and the filesystem.
    pub fn load() -> Result<Self> {
        let path = std::env::var("EDGESERVE_CONFIG").ok();
        let listen = std::env::var("LISTEN").ok();

        Self::load_from(
            path.as_deref().map(Path::new).or_else(|| {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            }),
            listen.as_deref(),
        )
    }

    /// Reads `path` (defaults when `None`), then applies a `host:port`
    /// listen override.
    pub fn load_from(path: Option<&Path>, listen: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|err| {
                    Error::Config(format!("cannot read {}: {}", path.display(), err))
                })?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };

        if let Some(listen) = listen {
            config.server.apply_listen(listen)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logging.max_level()?;
        Ok(())
    }
}

impl ServerConfig {
    /// Rejects sizes that would make every connection unusable. A zero read
    /// buffer, for one, reads zero bytes, which is end-of-stream.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be positive".into()));
        }

        if self.max_events == 0 {
            return Err(Error::Config("max_events must be positive".into()));
        }

        if self.max_header_bytes == 0 {
            return Err(Error::Config("max_header_bytes must be positive".into()));
        }

        Ok(())
    }

    /// Applies a `host:port` address, e.g. `0.0.0.0:3000` or `[::1]:80`.
    pub fn apply_listen(&mut self, listen: &str) -> Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("invalid listen address {listen:?}")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || port.is_empty() {
            return Err(Error::Config(format!("invalid listen address {listen:?}")));
        }

        self.host = host.to_string();
        self.port = port.to_string();
        Ok(())
    }
}
