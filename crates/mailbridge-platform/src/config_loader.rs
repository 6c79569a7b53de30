//! Configuration file discovery and loading.
//!
//! The discovery order is:
//! 1. An explicit path (the `--config` flag).
//! 2. `MAILBRIDGE_CONFIG` environment variable.
//! 3. `~/.mailbridge/config.json`, then `~/.mailbridge/config.toml`.
//! 4. If none found, an empty JSON object (`{}`), i.e. all defaults.
//!
//! TOML files are converted to JSON. Keys are normalized from camelCase to
//! snake_case, then secrets named in [`SECRET_ENV_OVERRIDES`] are taken from
//! the environment when set.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::env::Environment;
use crate::fs::FileSystem;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "MAILBRIDGE_CONFIG";

/// `(environment variable, dotted config path)` pairs applied after loading.
pub const SECRET_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("MAILBRIDGE_OAUTH_CLIENT_SECRET", "oauth.client_secret"),
    ("MAILBRIDGE_ENCRYPTION_KEY", "encryption_key"),
    ("MAILBRIDGE_CHAT_BOT_TOKEN", "chat.bot_token"),
    ("MAILBRIDGE_COMMAND_TOKEN", "command_token"),
];

type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Discover the config file path using the fallback chain.
///
/// Returns `None` if no config file exists at any of the home-directory
/// candidates and no override is set.
pub fn discover_config_path(env: &dyn Environment, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(env_path) = env.get_var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(env_path));
    }

    let dir = home_dir?.join(".mailbridge");
    ["config.json", "config.toml"]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Load raw JSON configuration.
///
/// `explicit` wins over discovery and must exist. A discovered path that
/// vanished, or no path at all, yields defaults.
pub async fn load_config_raw(
    fs: &dyn FileSystem,
    env: &dyn Environment,
    explicit: Option<&Path>,
) -> Result<Value, LoadError> {
    let path = match explicit {
        Some(p) => {
            if !fs.exists(p).await {
                return Err(format!("config file not found: {}", p.display()).into());
            }
            Some(p.to_path_buf())
        }
        None => discover_config_path(env, fs.home_dir()),
    };

    let mut value = match path {
        None => {
            tracing::info!("no config file found, using defaults");
            Value::Object(serde_json::Map::new())
        }
        Some(path) => {
            if fs.exists(&path).await {
                tracing::debug!(path = %path.display(), "loading config file");
                let contents = fs
                    .read_to_string(&path)
                    .await
                    .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
                normalize_keys(parse_config_text(&path, &contents)?)
            } else {
                tracing::warn!(path = %path.display(), "config path does not exist, using defaults");
                Value::Object(serde_json::Map::new())
            }
        }
    };

    apply_env_overrides(&mut value, env);
    Ok(value)
}

/// Parse file contents as TOML (by extension) or JSON.
pub fn parse_config_text(path: &Path, contents: &str) -> Result<Value, LoadError> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        let parsed: toml::Value = toml::from_str(contents)
            .map_err(|e| format!("failed to parse config file {}: {e}", path.display()))?;
        Ok(serde_json::to_value(parsed)?)
    } else {
        serde_json::from_str(contents)
            .map_err(|e| format!("failed to parse config file {}: {e}", path.display()).into())
    }
}

/// Overwrite secret fields from the environment.
pub fn apply_env_overrides(value: &mut Value, env: &dyn Environment) {
    for (var, dotted) in SECRET_ENV_OVERRIDES {
        let Some(secret) = env.get_var(var) else {
            continue;
        };
        tracing::debug!(field = %dotted, "config field overridden from environment");
        set_dotted(value, dotted, Value::String(secret));
    }
}

fn set_dotted(root: &mut Value, dotted: &str, new: Value) {
    let (parents, leaf) = match dotted.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, dotted),
    };

    let mut cursor = root;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        if !cursor.is_object() {
            *cursor = Value::Object(serde_json::Map::new());
        }
        let Some(map) = cursor.as_object_mut() else {
            return;
        };
        cursor = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    if !cursor.is_object() {
        *cursor = Value::Object(serde_json::Map::new());
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(leaf.to_string(), new);
    }
}

/// Convert camelCase JSON keys to snake_case recursively.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (camel_to_snake(&key), normalize_keys(val)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// Convert a single camelCase string to snake_case.
///
/// A run of uppercase letters (an acronym) stays together; an underscore is
/// inserted before its last letter only when a lowercase letter follows.
///
/// ```
/// # use mailbridge_platform::config_loader::camel_to_snake;
/// assert_eq!(camel_to_snake("siteUrl"), "site_url");
/// assert_eq!(camel_to_snake("httpTimeoutSecs"), "http_timeout_secs");
/// assert_eq!(camel_to_snake("already_snake"), "already_snake");
/// assert_eq!(camel_to_snake("OAuthConfig"), "o_auth_config");
/// ```
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut result = String::with_capacity(name.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            if prev.is_lowercase()
                || (prev.is_uppercase() && next.is_some_and(|c| c.is_lowercase()))
            {
                result.push('_');
            }
        }
        result.push(ch.to_ascii_lowercase());
    }
    result
}
