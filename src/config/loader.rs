use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file using the config crate.
/// The format follows the extension: TOML (default), YAML, JSON or INI.
pub fn load_config(config_path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let config_path = config_path.as_ref();

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

/// Load the file when given, otherwise use defaults.
pub fn load_or_default(config_path: Option<&Path>) -> Result<GatewayConfig> {
    match config_path {
        Some(path) => load_config(path),
        None => Ok(GatewayConfig::default()),
    }
}
