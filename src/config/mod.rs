//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MAX_SEGMENT_SIZE, MIN_ALIGNMENT};

/// Tunable policy read by a relay connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote peer address; a hostname when `domain` is set, an IP literal otherwise
    pub ip: String,
    /// Remote peer port
    pub port: u16,
    /// Resolve `ip` as a hostname before dialling
    #[serde(default)]
    pub domain: bool,
    /// Endpoint used when no explicit remote endpoint is supplied
    pub inbound: EndpointConfig,
    /// Handshake alignment; values in [512, 65535] also override the forwarding MSS
    #[serde(default = "default_alignment")]
    pub alignment: usize,
    /// Enable the keep-alive cycles
    #[serde(default)]
    pub keep_alived: bool,
    /// Set TCP_NODELAY on the remote socket
    #[serde(default)]
    pub turbo: bool,
    /// Set TCP_FASTOPEN on the remote socket
    #[serde(default)]
    pub fast_open: bool,
}

/// An address/port pair in configuration form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// IP literal
    pub ip: String,
    /// Port number
    pub port: u16,
}

fn default_alignment() -> usize {
    MAX_SEGMENT_SIZE
}

impl Config {
    /// Read a relay configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        toml::from_str(&text)
            .map_err(|e| crate::Error::Config(format!("malformed relay config: {}", e)))
    }

    /// Write the relay configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let path = path.as_ref();
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;

        std::fs::write(path, rendered).map_err(|e| {
            crate::Error::Config(format!("cannot write {}: {}", path.display(), e))
        })
    }

    /// Effective per-read forwarding size: `alignment` when it falls inside
    /// [512, 65535], the full segment size otherwise.
    pub fn mss(&self) -> usize {
        if (MIN_ALIGNMENT..=MAX_SEGMENT_SIZE).contains(&self.alignment) {
            self.alignment
        } else {
            MAX_SEGMENT_SIZE
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 443,
            domain: false,
            inbound: EndpointConfig {
                ip: "127.0.0.1".to_string(),
                port: 443,
            },
            alignment: MAX_SEGMENT_SIZE,
            keep_alived: false,
            turbo: false,
            fast_open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mss_clamp() {
        let mut config = Config::default();
        assert_eq!(config.mss(), MAX_SEGMENT_SIZE);

        config.alignment = 1024;
        assert_eq!(config.mss(), 1024);

        config.alignment = 511;
        assert_eq!(config.mss(), MAX_SEGMENT_SIZE);

        config.alignment = 70000;
        assert_eq!(config.mss(), MAX_SEGMENT_SIZE);

        config.alignment = 512;
        assert_eq!(config.mss(), 512);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config {
            ip: "relay.example.com".to_string(),
            port: 8443,
            domain: true,
            keep_alived: true,
            ..Default::default()
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.ip, "relay.example.com");
        assert_eq!(parsed.port, 8443);
        assert!(parsed.domain);
        assert!(parsed.keep_alived);
        assert!(!parsed.turbo);
    }
}
