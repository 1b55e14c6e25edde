//! Node settings with sensible defaults.
//!
//! All operational parameters are centralized here. Every value has a
//! documented default; the profile-bearing identity configuration lives
//! in the node crate because it references protocol types.

use serde::{Deserialize, Serialize};

use crate::{KoiNetError, Result, Rid};

/// The one peer a fresh node may reach out to before it has any edges.
///
/// Both fields optional: a coordinator node typically configures neither,
/// a leaf node configures both.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FirstContact {
    /// RID of the first-contact node, if known.
    pub rid: Option<Rid>,
    /// Base URL of the first-contact node.
    pub url: Option<String>,
}

/// Operational settings for a node.
///
/// Values are loaded from the settings file and validated once at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable node name; becomes part of the node RID.
    pub node_name: String,

    /// Directory holding the bundle cache (one JSON file per RID).
    pub cache_directory: String,

    /// Seconds between inbound poll sweeps.
    pub polling_interval_secs: u64,

    /// First contact used for bootstrap when the node has no neighbors.
    #[serde(default)]
    pub first_contact: FirstContact,

    /// Per-RPC timeout for outbound requests, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum events held per destination mailbox. Overflow drops the
    /// oldest queued event.
    pub mailbox_capacity: usize,

    /// Consecutive flush failures tolerated per mailbox before its
    /// contents are dropped.
    pub flush_retry_max: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_name: "node".into(),
            cache_directory: "cache".into(),
            polling_interval_secs: 10,
            first_contact: FirstContact::default(),
            request_timeout_secs: 10,
            mailbox_capacity: 512,
            flush_retry_max: 5,
        }
    }
}

impl NodeSettings {
    /// Validates all settings values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            return Err(KoiNetError::ConfigError {
                reason: "node_name must not be empty".into(),
            });
        }

        if self.node_name.contains(['+', ':']) {
            return Err(KoiNetError::ConfigError {
                reason: "node_name must not contain ':' or '+'".into(),
            });
        }

        if self.cache_directory.is_empty() {
            return Err(KoiNetError::ConfigError {
                reason: "cache_directory must not be empty".into(),
            });
        }

        if self.polling_interval_secs == 0 {
            return Err(KoiNetError::ConfigError {
                reason: "polling_interval_secs must be greater than 0".into(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(KoiNetError::ConfigError {
                reason: "request_timeout_secs must be greater than 0".into(),
            });
        }

        if self.mailbox_capacity == 0 {
            return Err(KoiNetError::ConfigError {
                reason: "mailbox_capacity must be greater than 0".into(),
            });
        }

        if self.flush_retry_max == 0 {
            return Err(KoiNetError::ConfigError {
                reason: "flush_retry_max must be greater than 0".into(),
            });
        }

        // A first contact is only reachable if a URL accompanies the RID.
        if self.first_contact.rid.is_some() && self.first_contact.url.is_none() {
            return Err(KoiNetError::ConfigError {
                reason: "first_contact.rid requires first_contact.url".into(),
            });
        }

        Ok(())
    }
}
