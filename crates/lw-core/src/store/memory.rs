//! In-memory storage, for tests and ephemeral sessions.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use super::{validate_file_name, ListCache, SettingsStore, StoreError};

/// Settings store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// List cache held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    files: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored file, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ListCache for MemoryCache {
    fn read(&self, file_name: &str) -> Result<Option<String>, StoreError> {
        validate_file_name(file_name)?;
        Ok(self.files.read().get(file_name).cloned())
    }

    fn write(&self, file_name: &str, contents: &str) -> Result<(), StoreError> {
        validate_file_name(file_name)?;
        self.files
            .write()
            .insert(file_name.to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&self, file_name: &str) -> Result<(), StoreError> {
        validate_file_name(file_name)?;
        self.files.write().remove(file_name);
        Ok(())
    }
}
