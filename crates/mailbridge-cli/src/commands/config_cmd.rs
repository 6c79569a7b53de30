//! `mailbridge config` -- display and validate the resolved configuration.
//!
//! # Examples
//!
//! ```text
//! mailbridge config show
//! mailbridge config check --config /etc/mailbridge/config.json
//! ```

use mailbridge_types::config::BridgeConfig;

/// Display the resolved configuration as formatted JSON. Secrets serialize
/// as empty strings.
pub fn config_show(config: &BridgeConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: failed to serialize config: {e}"),
    }
}

/// Validate the configuration, printing a summary.
pub fn config_check(config: &BridgeConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!("configuration OK");
    match config.plugin_base_url() {
        Some(base) => println!("  plugin URL:   {base}"),
        None => println!("  plugin URL:   (site_url not set; connect and disconnect will fail)"),
    }
    println!(
        "  listening on: {}:{}",
        config.server.host, config.server.port
    );
    println!(
        "  store:        {}",
        config.store.path.as_deref().unwrap_or("in-memory")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_show_does_not_panic() {
        config_show(&BridgeConfig::default());
    }

    #[test]
    fn default_config_fails_check() {
        let err = config_check(&BridgeConfig::default()).unwrap_err();
        assert!(err.to_string().contains("oauth.client_id"));
    }

    #[test]
    fn shown_config_hides_secrets() {
        let config = BridgeConfig {
            encryption_key: mailbridge_types::SecretString::new("hunter2"),
            ..BridgeConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
