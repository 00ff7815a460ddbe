//! File-backed storage in an app-group shared directory.
//!
//! The host and the extension run in separate processes, so the settings
//! document is re-read on every access rather than cached. Writes go to a
//! temporary file that is renamed over the target so a reader never sees
//! a half-written document.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{validate_file_name, ListCache, SettingsStore, StoreError};

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `contents` to `path` atomically via a sibling temporary file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = fs::File::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
    file.write_all(contents).map_err(|e| io_error(&temp_path, e))?;
    file.sync_all().map_err(|e| io_error(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| io_error(path, e))
}

// =============================================================================
// Settings Document
// =============================================================================

/// Settings stored as one JSON object in a file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(io_error(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Malformed {
            key: self.path.display().to_string(),
            source,
        })
    }

    fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.write_lock.lock();
        let mut document = self.read_document()?;
        apply(&mut document);
        let bytes = serde_json::to_vec_pretty(&document).map_err(|source| StoreError::Malformed {
            key: self.path.display().to_string(),
            source,
        })?;
        write_atomic(&self.path, &bytes)
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_document()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.remove(key);
        })
    }
}

// =============================================================================
// Directory Cache
// =============================================================================

/// List cache storing one file per entry in a directory.
#[derive(Debug, Clone)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, StoreError> {
        validate_file_name(file_name)?;
        Ok(self.dir.join(file_name))
    }
}

impl ListCache for DirCache {
    fn read(&self, file_name: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(file_name)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn write(&self, file_name: &str, contents: &str) -> Result<(), StoreError> {
        let path = self.path_for(file_name)?;
        write_atomic(&path, contents.as_bytes())
    }

    fn remove(&self, file_name: &str) -> Result<(), StoreError> {
        let path = self.path_for(file_name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
