//! Directory-backed storage medium: one file per key, written atomically.

use super::Storage;
use crate::error::{MqttError, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bump only when the on-disk layout (file naming or directory structure) changes.
///
/// Version History:
/// - 1: one `<escaped key>.entry` file per key
const STORAGE_VERSION: &str = "1";
const ENTRY_EXTENSION: &str = "entry";

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory.
    ///
    /// # Errors
    /// Returns `Storage` if the directory cannot be created or holds an
    /// incompatible layout version.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            MqttError::Storage(format!("Failed to create dir {}: {e}", dir.display()))
        })?;
        Self::check_storage_version(&dir)?;
        info!("Initialized file storage at: {}", dir.display());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_storage_version(dir: &Path) -> Result<()> {
        let version_file = dir.join(".storage_version");
        match fs::read_to_string(&version_file) {
            Ok(stored) if stored.trim() == STORAGE_VERSION => {
                debug!("Storage version verified: {}", STORAGE_VERSION);
                Ok(())
            }
            Ok(stored) => Err(MqttError::Storage(format!(
                "Storage version mismatch in {}: found {}, expected {}",
                dir.display(),
                stored.trim(),
                STORAGE_VERSION
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&version_file, STORAGE_VERSION)?;
                info!("Created new storage with version {}", STORAGE_VERSION);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", key_to_filename(key)))
    }

    fn write_file_atomic(&self, path: &Path, data: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(data.as_bytes())?;
        file.sync_data()?;
        drop(file);
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_file_atomic(&self.path_for(key), value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(filename_to_key)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn key_to_filename(key: &str) -> String {
    let mut result = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            result.push(char::from(byte));
        } else {
            result.push_str(&format!("%{byte:02X}"));
        }
    }
    result
}

fn filename_to_key(filename: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(filename.len());
    let mut raw = filename.bytes();
    while let Some(byte) = raw.next() {
        if byte == b'%' {
            let hex = [raw.next()?, raw.next()?];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}
