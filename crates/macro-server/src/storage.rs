//! JSON persistence for the macro collection
//!
//! Files live in a `.storage/` directory under the configured config dir and
//! carry a version header:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "macros",
//!   "data": { "macros": [ ... ] }
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage file wrapper with version tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version - breaking changes
    pub version: u32,
    /// Minor version - compatible additions
    pub minor_version: u32,
    /// Storage key (file identifier)
    pub key: String,
    /// The actual data
    pub data: T,
}

impl<T> StorageFile<T> {
    /// Create a new storage file
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// Versioned JSON files under `config_dir/.storage`
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Read the file stored under `key`, `None` if there is none
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let content = match fs::read_to_string(self.file_path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key, "no storage file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!(key, version = file.version, "loaded storage file");
        Ok(Some(file))
    }

    /// Replace the file stored under the file's key
    ///
    /// The new content is written next to the target and renamed over it,
    /// so readers never observe a partial file.
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        fs::create_dir_all(&self.storage_dir).await?;
        let target = self.file_path(&file.key);
        let staging = target.with_extension("tmp");

        fs::write(&staging, serde_json::to_vec_pretty(file)?).await?;
        fs::rename(&staging, &target).await?;
        debug!(key = %file.key, version = file.version, "saved storage file");
        Ok(())
    }
}

/// Versioned store for the macro collection document
#[derive(Debug, Clone)]
pub struct MacroStore {
    storage: Storage,
}

impl MacroStore {
    /// Storage key of the collection file
    pub const KEY: &'static str = "macros";
    /// Current major version
    pub const VERSION: u32 = 1;
    /// Current minor version
    pub const MINOR_VERSION: u32 = 1;

    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage: Storage::new(config_dir),
        }
    }

    #[cfg(test)]
    fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Load the stored collection document, if any
    pub async fn load(&self) -> StorageResult<Option<Value>> {
        let Some(file) = self.storage.load::<Value>(Self::KEY).await? else {
            return Ok(None);
        };

        if file.version != Self::VERSION {
            return Err(StorageError::VersionMismatch {
                key: Self::KEY.to_string(),
                expected: Self::VERSION,
                found: file.version,
            });
        }

        if file.minor_version > Self::MINOR_VERSION {
            warn!(
                key = Self::KEY,
                found = file.minor_version,
                supported = Self::MINOR_VERSION,
                "storage written by a newer minor version"
            );
        }

        Ok(Some(file.data))
    }

    /// Write the collection document
    pub async fn save(&self, document: Value) -> StorageResult<()> {
        let file = StorageFile::new(Self::KEY, document, Self::VERSION, Self::MINOR_VERSION);
        self.storage.save(&file).await
    }
}
