//! Configuration data structures for the gateway.
//!
//! These types map directly to TOML (also JSON / YAML / INI) configuration
//! files and carry defaults so a minimal or even empty file is valid.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::CorsConfig;

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8290
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Top-level configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub deployment: DeploymentConfig,
}

/// HTTP listener and router settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Start the listener on the first API registration.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Drain deadline in humantime syntax, e.g. `"30s"` or `"1m 30s"`.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Policy for APIs that do not declare their own `<cors>` element.
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            auto_start: true,
            shutdown_timeout: default_shutdown_timeout(),
            max_body_bytes: default_max_body_bytes(),
            cors: None,
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Parsed drain deadline; falls back to 30 seconds when unparsable
    /// (validation reports the bad value separately).
    pub fn shutdown_timeout(&self) -> Duration {
        humantime::parse_duration(&self.shutdown_timeout).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `synapse_gateway=debug,tower_http=info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Directory of `*.xml` API artifacts deployed once at start-up.
    pub artifacts_dir: Option<PathBuf>,
}

/// Builder for programmatic configuration (tests and embedding).
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.server.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.config.server.auto_start = auto_start;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.config.server.shutdown_timeout = timeout.into();
        self
    }

    pub fn default_cors(mut self, cors: CorsConfig) -> Self {
        self.config.server.cors = Some(cors);
        self
    }

    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.deployment.artifacts_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}
