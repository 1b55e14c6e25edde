//! Filesystem-backed bundle cache.
//!
//! One JSON file per bundle inside a flat directory. Filenames are the
//! URL-safe base64 of the RID (RIDs contain `:` and `+`, which are not
//! portable filename characters) with a `.json` suffix, so the listing
//! can be decoded back to RIDs without opening files.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use koinet_protocol::Bundle;
use koinet_types::{KoiNetError, Result, Rid};
use tracing::warn;

use crate::Cache;

const BUNDLE_EXT: &str = "json";

/// Bundle cache rooted at a directory on disk.
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    /// Opens a cache at `directory`, creating it if needed.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| KoiNetError::StorageError {
            reason: format!("failed to create cache directory {}: {e}", directory.display()),
        })?;
        Ok(Self { directory })
    }

    /// The directory this cache lives in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, rid: &Rid) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(rid.as_str().as_bytes());
        self.directory.join(format!("{name}.{BUNDLE_EXT}"))
    }

    fn rid_from_file_name(name: &str) -> Option<Rid> {
        let stem = name.strip_suffix(&format!(".{BUNDLE_EXT}"))?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok().map(Rid::new)
    }
}

impl Cache for FileCache {
    fn exists(&self, rid: &Rid) -> Result<bool> {
        Ok(self.path_for(rid).is_file())
    }

    fn read(&self, rid: &Rid) -> Result<Option<Bundle>> {
        let path = self.path_for(rid);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KoiNetError::StorageError {
                    reason: format!("failed to read {}: {e}", path.display()),
                })
            }
        };
        let bundle = serde_json::from_slice(&data).map_err(|e| KoiNetError::StorageError {
            reason: format!("corrupt bundle file {}: {e}", path.display()),
        })?;
        Ok(Some(bundle))
    }

    fn write(&self, bundle: &Bundle) -> Result<()> {
        let path = self.path_for(bundle.rid());
        let data =
            serde_json::to_vec_pretty(bundle).map_err(|e| KoiNetError::StorageError {
                reason: format!("failed to serialize bundle {}: {e}", bundle.rid()),
            })?;
        // Write-then-rename so a crash mid-write cannot leave a torn file.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(|e| KoiNetError::StorageError {
            reason: format!("failed to write {}: {e}", tmp.display()),
        })?;
        fs::rename(&tmp, &path).map_err(|e| KoiNetError::StorageError {
            reason: format!("failed to rename {}: {e}", path.display()),
        })
    }

    fn delete(&self, rid: &Rid) -> Result<()> {
        let path = self.path_for(rid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KoiNetError::StorageError {
                reason: format!("failed to delete {}: {e}", path.display()),
            }),
        }
    }

    fn list_rids(&self) -> Result<Vec<Rid>> {
        let entries = fs::read_dir(&self.directory).map_err(|e| KoiNetError::StorageError {
            reason: format!("failed to list {}: {e}", self.directory.display()),
        })?;
        let mut rids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KoiNetError::StorageError {
                reason: format!("failed to list {}: {e}", self.directory.display()),
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match Self::rid_from_file_name(name) {
                Some(rid) => rids.push(rid),
                // Foreign files (editors, tmp leftovers) are skipped, not fatal.
                None => warn!(file = %name, "skipping unrecognized file in cache directory"),
            }
        }
        Ok(rids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
