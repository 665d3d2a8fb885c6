//! Configuration resolution for the ZCM web relay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/zcmweb/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Native transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport URL handed to `create(url)`.
    pub url: String,
    /// Receive queue size applied once at startup.
    pub queue_size: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "inproc".to_string(),
            queue_size: None,
        }
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub ws_path: String,
    /// Per-connection buffer of frames waiting to be written to the socket.
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            ws_path: "/ws".to_string(),
            outbound_capacity: 1024,
        }
    }
}

/// Schema descriptor location.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: Option<PathBuf>,
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a config file named on the command line; unlike the global
/// file it must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<RelayConfig> {
    let mut layers = Vec::new();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(read_config_layer(&global_path)?);
    }

    if let Some(path) = explicit {
        layers.push(read_config_layer(path)?);
    }

    let mut config = resolve_layers(layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Path of the per-user config file.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("zcmweb").join("settings.json"))
}

fn read_config_layer(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Fold file layers over the defaults, later layers winning key by key.
fn resolve_layers(layers: impl IntoIterator<Item = Value>) -> Result<RelayConfig> {
    let mut merged = serde_json::to_value(RelayConfig::default())?;
    for layer in layers {
        merge_json(&mut merged, layer);
    }
    serde_json::from_value(merged).map_err(|e| Error::Config(format!("Invalid config: {e}")))
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

fn apply_env_overrides(config: &mut RelayConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("ZCMWEB_URL") {
        config.transport.url = url;
    }
    if let Some(addr) = var("ZCMWEB_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
        config.server.listen_addr = addr;
    }
    if let Some(path) = var("ZCMWEB_SCHEMA") {
        config.schema.path = Some(PathBuf::from(path));
    }
    if let Some(size) = var("ZCMWEB_QUEUE_SIZE").and_then(|v| v.parse().ok()) {
        config.transport.queue_size = Some(size);
    }
    if let Some(level) = var("ZCMWEB_LOG_LEVEL") {
        config.log_level = level;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_use_inproc_transport() {
        let config = RelayConfig::default();
        assert_eq!(config.transport.url, "inproc");
        assert_eq!(config.server.ws_path, "/ws");
        assert!(config.transport.queue_size.is_none());
    }

    fn layer(json: &str) -> (tempfile::NamedTempFile, Value) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        let value = read_config_layer(file.path()).unwrap();
        (file, value)
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let (_file, partial) = layer(r#"{"transport": {"queue_size": 64}}"#);

        let config = resolve_layers([partial]).unwrap();
        assert_eq!(config.transport.url, "inproc");
        assert_eq!(config.transport.queue_size, Some(64));
        assert_eq!(config.server.outbound_capacity, 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn explicit_file_only_overrides_the_keys_it_sets() {
        let (_global_file, global) = layer(
            r#"{
                "transport": {"url": "udpm://239.255.76.67:7667"},
                "server": {"outbound_capacity": 7, "listen_addr": "0.0.0.0:9000"},
                "log_level": "debug"
            }"#,
        );
        let (_explicit_file, explicit) =
            layer(r#"{"transport": {"queue_size": 64}, "server": {"ws_path": "/zcm"}}"#);

        let config = resolve_layers([global, explicit]).unwrap();
        assert_eq!(config.transport.url, "udpm://239.255.76.67:7667");
        assert_eq!(config.transport.queue_size, Some(64));
        assert_eq!(config.server.outbound_capacity, 7);
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.ws_path, "/zcm");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn ill_typed_layer_is_a_config_error() {
        let (_file, bad) = layer(r#"{"server": {"outbound_capacity": "lots"}}"#);
        assert!(matches!(resolve_layers([bad]), Err(Error::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = RelayConfig::default();
        let env: HashMap<&str, &str> = [
            ("ZCMWEB_URL", "udpm://239.255.76.67:7667"),
            ("ZCMWEB_LISTEN_ADDR", "0.0.0.0:9000"),
            ("ZCMWEB_QUEUE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |k| env.get(k).map(ToString::to_string));

        assert_eq!(config.transport.url, "udpm://239.255.76.67:7667");
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.transport.queue_size.is_none());
    }
}
