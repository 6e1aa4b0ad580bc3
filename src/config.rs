use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server configuration.
///
/// Everything has a usable default, so `Config::default()` starts a plain
/// HTTP listener on an OS-assigned port. Files in TOML or JSON format are
/// supported for deployments that prefer configuration on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address. Accepts `host:port`, `:port`, or a bare port; the
    /// host defaults to `0.0.0.0`. Port `0` reserves a kernel-chosen port —
    /// pair it with [`crate::Server::ready_signal`] to learn the bound
    /// address.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log at info level instead of warn.
    #[serde(default)]
    pub verbose: bool,

    /// Log at debug level; implies `verbose`.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub sse: SseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            verbose: false,
            debug: false,
            tls: TlsConfig::default(),
            sse: SseConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:0".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to the PEM certificate chain.
    #[serde(default)]
    pub certificate: String,

    /// Path to the PEM private key.
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Emit a `Connected` event as soon as an event stream opens.
    #[serde(default)]
    pub initial_connected_event: bool,

    /// Event name used for messages that do not carry their own.
    #[serde(default = "default_event_name")]
    pub default_event_name: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        SseConfig {
            initial_connected_event: false,
            default_event_name: default_event_name(),
        }
    }
}

fn default_event_name() -> String {
    "message".to_string()
}

impl Config {
    /// Load configuration from a TOML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
            None => anyhow::bail!("config file has no extension, use .toml or .json"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            anyhow::bail!("listen address cannot be empty");
        }
        if self.tls.enabled && (self.tls.certificate.is_empty() || self.tls.key.is_empty()) {
            anyhow::bail!("tls is enabled but certificate or key path is missing");
        }
        Ok(())
    }

    /// Normalize the configured listen string into a bindable `host:port`.
    pub(crate) fn listen_addr(&self) -> String {
        let listen = self.listen.trim();
        if let Some(port) = listen.strip_prefix(':') {
            return format!("0.0.0.0:{port}");
        }
        if !listen.contains(':') {
            return format!("0.0.0.0:{listen}");
        }
        listen.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:0");
        assert!(!config.tls.enabled);
        assert_eq!(config.sse.default_event_name, "message");
    }

    #[test]
    fn listen_address_forms() {
        let mut config = Config::default();

        config.listen = ":8080".to_string();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");

        config.listen = "8080".to_string();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");

        config.listen = "127.0.0.1:9000".to_string();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn parses_toml() {
        let config: Config = toml::from_str(
            r#"
            listen = ":3000"
            verbose = true

            [tls]
            enabled = false

            [sse]
            initial_connected_event = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, ":3000");
        assert!(config.verbose);
        assert!(config.sse.initial_connected_event);
        assert_eq!(config.sse.default_event_name, "message");
    }

    #[test]
    fn tls_requires_material() {
        let mut config = Config::default();
        config.tls.enabled = true;
        assert!(config.validate().is_err());

        config.tls.certificate = "cert.pem".to_string();
        config.tls.key = "key.pem".to_string();
        config.validate().unwrap();
    }
}
