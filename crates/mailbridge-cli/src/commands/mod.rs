//! CLI command implementations for `mailbridge`.
//!
//! - [`serve`] -- HTTP server with graceful shutdown.
//! - [`config_cmd`] -- Configuration display and validation.

pub mod config_cmd;
pub mod serve;

use std::path::Path;

use mailbridge_platform::Platform;
use mailbridge_types::config::BridgeConfig;

/// Load configuration from the given path override or via auto-discovery.
///
/// Discovery order: `MAILBRIDGE_CONFIG`, then `~/.mailbridge/config.json`
/// (or `.toml`). Returns defaults if no config file is found.
pub async fn load_config<P: Platform>(
    platform: &P,
    config_override: Option<&str>,
) -> anyhow::Result<BridgeConfig> {
    let raw = mailbridge_platform::config_loader::load_config_raw(
        platform.fs(),
        platform.env(),
        config_override.map(Path::new),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;

    let config: BridgeConfig = serde_json::from_value(raw)?;
    Ok(config)
}
