mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./gifforge.toml",
        "~/.config/gifforge/config.toml",
        "/etc/gifforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    // Validate server config
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let base_url = &config.server.base_url;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!("Server base_url must start with http:// or https://: {}", base_url);
    }
    if base_url.ends_with('/') {
        anyhow::bail!("Server base_url must not end with '/': {}", base_url);
    }

    let auth = &config.server.auth;
    if auth.enabled && (auth.username.is_none() || auth.password_hash.is_none()) {
        anyhow::bail!("Auth is enabled but username or password_hash is missing");
    }

    // Validate token config
    if config.tokens.size_bytes == 0 {
        anyhow::bail!("Token size_bytes cannot be 0");
    }
    if config.tokens.attempt_limit == 0 {
        anyhow::bail!("Token attempt_limit must be greater than zero");
    }
    if config.tokens.ttl_ms == 0 {
        anyhow::bail!("Token ttl_ms cannot be 0");
    }

    // Validate cache config
    if config.cache.max_files == 0 {
        anyhow::bail!("Cache max_files cannot be 0");
    }
    if config.cache.max_size_bytes == 0 {
        anyhow::bail!("Cache max_size_bytes cannot be 0");
    }

    if config.output.max_size == 0 {
        anyhow::bail!("Output max_size cannot be 0");
    }

    if config.sources.hostname_whitelist.is_empty() {
        tracing::warn!("Source hostname whitelist is empty, every conversion will be rejected");
    }

    Ok(())
}
