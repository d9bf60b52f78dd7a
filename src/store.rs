use log::info;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Key-value storage for opaque parameter blobs.
pub trait ParameterStore {
    fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Key under which a run's parameters are stored.
pub fn model_key(run_name: &str) -> String {
    format!("{}_model", run_name)
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }
}

impl ParameterStore for MemoryStore {
    fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.insert(key.to_string(), blob);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::MissingKey(key.to_string()))
    }
}

/// One `<key>.safetensors` file per key under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    key_pattern: Regex,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let key_pattern =
            Regex::new(r"^[A-Za-z0-9._-]+$").map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            key_pattern,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !self.key_pattern.is_match(key) || key.starts_with('.') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.safetensors", key)))
    }
}

impl ParameterStore for DirectoryStore {
    fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, blob)?;
        info!("Saved parameters to {}", path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::MissingKey(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_key_appends_suffix() {
        assert_eq!(model_key("juliet"), "juliet_model");
        assert_eq!(model_key(""), "_model");
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        store.put("a_model", vec![1, 2, 3]).unwrap();
        assert!(store.contains("a_model"));
        assert_eq!(store.get("a_model").unwrap(), vec![1, 2, 3]);
        assert!(matches!(store.get("b_model"), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn test_directory_store_writes_one_file_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path().join("weights")).unwrap();

        store.put("cwe119_model", vec![9; 16]).unwrap();
        assert!(dir.path().join("weights/cwe119_model.safetensors").exists());
        assert_eq!(store.get("cwe119_model").unwrap(), vec![9; 16]);
        assert!(matches!(store.get("other_model"), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn test_directory_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path()).unwrap();

        for key in ["../escape_model", "a/b_model", "", ".._model"] {
            assert!(matches!(
                store.put(key, vec![0]),
                Err(StoreError::InvalidKey(_))
            ));
        }
        assert!(store.put("_model", vec![0]).is_ok());
    }
}
