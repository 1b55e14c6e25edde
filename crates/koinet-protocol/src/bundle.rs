//! Manifests and bundles: the versioned, persisted unit of knowledge.

use koinet_types::{KoiNetError, Result, Rid, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::content_hash;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Versioning metadata for a bundle.
///
/// Competing versions of the same RID are ordered by `timestamp`
/// (last-write-wins); equal `sha256_hash` marks a no-op regardless of
/// timestamps.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// RID of the object this manifest versions.
    pub rid: Rid,
    /// When this version was produced.
    pub timestamp: Timestamp,
    /// SHA-256 hex digest of the canonical JSON of the contents.
    pub sha256_hash: String,
}

impl Manifest {
    /// Builds a manifest for `contents` stamped with the current time.
    pub fn generate(rid: Rid, contents: &Value) -> Result<Self> {
        Ok(Self {
            rid,
            timestamp: Timestamp::now(),
            sha256_hash: content_hash(contents)?,
        })
    }

    /// Builds a manifest with an explicit timestamp. Used when replaying
    /// or constructing deterministic fixtures.
    pub fn generate_at(rid: Rid, contents: &Value, timestamp: Timestamp) -> Result<Self> {
        Ok(Self {
            rid,
            timestamp,
            sha256_hash: content_hash(contents)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// A manifest plus its contents — the durable unit stored in the cache.
///
/// One bundle per RID; updates overwrite in place.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Version metadata.
    pub manifest: Manifest,
    /// Arbitrary JSON contents.
    pub contents: Value,
}

impl Bundle {
    /// Generates a bundle for `contents`, computing the manifest now.
    pub fn generate(rid: Rid, contents: Value) -> Result<Self> {
        let manifest = Manifest::generate(rid, &contents)?;
        Ok(Self { manifest, contents })
    }

    /// Generates a bundle with an explicit manifest timestamp.
    pub fn generate_at(rid: Rid, contents: Value, timestamp: Timestamp) -> Result<Self> {
        let manifest = Manifest::generate_at(rid, &contents, timestamp)?;
        Ok(Self { manifest, contents })
    }

    /// RID of the bundled object.
    pub fn rid(&self) -> &Rid {
        &self.manifest.rid
    }

    /// Deserializes the contents into a typed profile.
    ///
    /// Returns [`KoiNetError::ProtocolError`] if the contents do not
    /// match the target schema.
    pub fn validate_contents<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.contents.clone()).map_err(|e| KoiNetError::ProtocolError {
            reason: format!("invalid contents for {}: {e}", self.manifest.rid),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn fixed_time(secs: u32) -> Timestamp {
        Timestamp::from_datetime(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, secs)
                .single()
                .unwrap_or_else(Utc::now),
        )
    }

    #[test]
    fn generate_hashes_contents() -> Result<()> {
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"k": "v"}))?;
        assert_eq!(bundle.manifest.sha256_hash, content_hash(&json!({"k": "v"}))?);
        assert_eq!(bundle.rid().as_str(), "orn:test:1");
        Ok(())
    }

    #[test]
    fn same_contents_same_hash_different_time() -> Result<()> {
        let a = Bundle::generate_at(Rid::new("orn:test:1"), json!({"k": "v"}), fixed_time(0))?;
        let b = Bundle::generate_at(Rid::new("orn:test:1"), json!({"k": "v"}), fixed_time(1))?;
        assert_eq!(a.manifest.sha256_hash, b.manifest.sha256_hash);
        assert!(b.manifest.timestamp > a.manifest.timestamp);
        Ok(())
    }

    #[test]
    fn validate_contents_typed() -> Result<()> {
        #[derive(Deserialize)]
        struct Thing {
            k: String,
        }
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"k": "v"}))?;
        let thing: Thing = bundle.validate_contents()?;
        assert_eq!(thing.k, "v");
        Ok(())
    }

    #[test]
    fn validate_contents_schema_mismatch() -> Result<()> {
        #[derive(Deserialize)]
        struct Thing {
            #[allow(dead_code)]
            missing: u64,
        }
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"k": "v"}))?;
        assert!(bundle.validate_contents::<Thing>().is_err());
        Ok(())
    }

    #[test]
    fn bundle_serde_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let bundle =
            Bundle::generate_at(Rid::new("orn:test:1"), json!({"k": "v"}), fixed_time(0))?;
        let json = serde_json::to_string(&bundle)?;
        let parsed: Bundle = serde_json::from_str(&json)?;
        assert_eq!(bundle, parsed);
        Ok(())
    }
}
