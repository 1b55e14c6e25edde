//! Full node configuration: operational settings plus identity fields.

use koinet_protocol::NodeProvides;
use koinet_types::config::NodeSettings;
use koinet_types::{KoiNetError, Result};
use serde::{Deserialize, Serialize};

fn default_key_file() -> String {
    "node_key.pem".into()
}

/// Everything the daemon needs to run one node, loaded from a single
/// JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Operational settings (name, cache, intervals, queue bounds).
    #[serde(flatten)]
    pub settings: NodeSettings,

    /// Local address the HTTP server binds to; absent for a poll-only
    /// node that runs no server.
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// URL peers should use to reach this node. Setting it makes the
    /// node FULL; leaving it unset makes it PARTIAL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Path of the PKCS#8 PEM private key, generated on first start.
    #[serde(default = "default_key_file")]
    pub key_file: String,

    /// RID type prefixes this node offers to peers.
    #[serde(default)]
    pub provides: NodeProvides,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            settings: NodeSettings::default(),
            listen_addr: None,
            base_url: None,
            key_file: default_key_file(),
            provides: NodeProvides::default(),
        }
    }
}

impl NodeConfig {
    /// Validates the combined configuration.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.key_file.is_empty() {
            return Err(KoiNetError::ConfigError {
                reason: "key_file must not be empty".into(),
            });
        }
        // A server without an advertised URL is unreachable to peers.
        if self.listen_addr.is_some() && self.base_url.is_none() {
            return Err(KoiNetError::ConfigError {
                reason: "listen_addr requires base_url".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
