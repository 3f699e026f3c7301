use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables overriding file values, e.g.
/// `SWITCHYARD__LISTEN_ADDR` or `SWITCHYARD__LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Load configuration from a file using the config crate, with environment
/// overrides. Supports YAML, JSON and TOML by extension.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    load_config_with_env(config_path, None)
}

/// Load configuration with an explicit environment map instead of the
/// process environment (`None` reads the real environment).
pub fn load_config_with_env(
    config_path: &str,
    env: Option<HashMap<String, String>>,
) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
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
