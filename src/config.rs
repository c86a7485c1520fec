//! Configuration for elohim-mesh

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::SignatureDigest;
use crate::error::{MeshError, Result};

/// Process-wide node configuration, fixed at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the store, identity key and config file
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Seed addresses joined at startup
    #[serde(default)]
    pub bootstrap: Vec<String>,

    /// Listen address for the RPC endpoint
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Address peers should dial back (defaults to the bound address)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise: Option<String>,

    /// Maximum number of peers in the peer table
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Holder set size per content id, and fan-out per hop
    #[serde(default = "default_max_width")]
    pub max_width: usize,

    /// Storage engine page cache size in bytes
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    /// Timeout for a single peer RPC
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Digest signed by reference signatures
    #[serde(default)]
    pub signature_digest: SignatureDigest,
}

fn default_path() -> PathBuf {
    PathBuf::from("tmp/node1")
}

fn default_bind() -> String {
    "0.0.0.0:0".to_string()
}

fn default_max_peers() -> usize {
    100
}

fn default_max_width() -> usize {
    20
}

fn default_cache_size() -> u64 {
    100_000_000
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            bootstrap: Vec::new(),
            bind: default_bind(),
            advertise: None,
            max_peers: default_max_peers(),
            max_width: default_max_width(),
            cache_size: default_cache_size(),
            request_timeout_secs: default_request_timeout(),
            signature_digest: SignatureDigest::default(),
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| MeshError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_width == 0 {
            return Err(MeshError::Config("max_width must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(MeshError::Config("request_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.path.join("store.sled")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.path.join("identity.key")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Split a comma separated address list, dropping blanks
pub fn parse_address_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.max_peers, 100);
        assert_eq!(config.max_width, 20);
        assert_eq!(config.cache_size, 100_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
path = "/var/lib/mesh"
max_peers = 8
signature_digest = "sha512"
"#,
        )
        .unwrap();
        assert_eq!(config.path, PathBuf::from("/var/lib/mesh"));
        assert_eq!(config.max_peers, 8);
        assert_eq!(config.max_width, 20);
        assert_eq!(config.signature_digest, SignatureDigest::Sha512);
        assert!(config.advertise.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = NodeConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.bootstrap = vec!["10.0.0.1:7000".into()];
        config.save(config.config_path()).unwrap();

        let loaded = NodeConfig::load(config.config_path()).unwrap();
        assert_eq!(loaded.bootstrap, config.bootstrap);
        assert_eq!(loaded.path, config.path);
    }

    #[test]
    fn test_zero_width_rejected() {
        let config = NodeConfig {
            max_width: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MeshError::Config(_))));
    }

    #[test]
    fn test_parse_address_list() {
        assert_eq!(
            parse_address_list("a:1, b:2,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(parse_address_list("").is_empty());
    }
}
