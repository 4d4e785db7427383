//! Mapping persistence.
//!
//! Stores are keyed by device signature and know nothing about merging; the
//! learning orchestrator reads, merges and writes back.

use crate::errors::{MappingError, MappingResult};
use paramforge_core::mapping::DeviceMapping;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub trait MappingStore: Send + Sync {
    fn get(&self, signature: &str) -> MappingResult<Option<DeviceMapping>>;

    fn save(&self, signature: &str, mapping: &DeviceMapping) -> MappingResult<()>;

    /// Returns whether a mapping was removed.
    fn delete(&self, signature: &str) -> MappingResult<bool>;

    /// Stored signatures, sorted.
    fn list(&self) -> MappingResult<Vec<String>>;
}

/// One pretty-printed JSON file per signature.
#[derive(Debug, Clone)]
pub struct JsonFileMappingStore {
    dir: PathBuf,
}

fn check_signature(signature: &str) -> MappingResult<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    let valid = !signature.is_empty() && signature.chars().all(allowed);
    if !valid {
        return Err(MappingError::Store {
            message: format!("Invalid signature for a file name: {:?}", signature),
        });
    }
    Ok(())
}

impl JsonFileMappingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, signature: &str) -> MappingResult<PathBuf> {
        check_signature(signature)?;
        Ok(self.dir.join(format!("{}.json", signature)))
    }
}

impl MappingStore for JsonFileMappingStore {
    fn get(&self, signature: &str) -> MappingResult<Option<DeviceMapping>> {
        let path = self.path_for(signature)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let mapping: DeviceMapping = serde_json::from_str(&json).map_err(|e| MappingError::Store {
            message: format!("Corrupt mapping {}: {}", path.display(), e),
        })?;
        Ok(Some(mapping))
    }

    fn save(&self, signature: &str, mapping: &DeviceMapping) -> MappingResult<()> {
        let path = self.path_for(signature)?;
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(mapping)?;
        // Atomic replace.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(signature, path = %path.display(), "mapping saved");
        Ok(())
    }

    fn delete(&self, signature: &str) -> MappingResult<bool> {
        let path = self.path_for(signature)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn list(&self) -> MappingResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut signatures = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                signatures.push(stem.to_string());
            }
        }
        signatures.sort();
        Ok(signatures)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    mappings: Mutex<HashMap<String, DeviceMapping>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceMapping>> {
        self.mappings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MappingStore for InMemoryMappingStore {
    fn get(&self, signature: &str) -> MappingResult<Option<DeviceMapping>> {
        Ok(self.lock().get(signature).cloned())
    }

    fn save(&self, signature: &str, mapping: &DeviceMapping) -> MappingResult<()> {
        self.lock().insert(signature.to_string(), mapping.clone());
        Ok(())
    }

    fn delete(&self, signature: &str) -> MappingResult<bool> {
        Ok(self.lock().remove(signature).is_some())
    }

    fn list(&self) -> MappingResult<Vec<String>> {
        let mut signatures: Vec<String> = self.lock().keys().cloned().collect();
        signatures.sort();
        Ok(signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramforge_core::grouping::GroupingRuleSet;
    use paramforge_core::mapping::ParamMeta;
    use rstest::rstest;

    fn mapping(signature: &str) -> DeviceMapping {
        DeviceMapping::new(
            signature,
            "reverb",
            vec![ParamMeta::naive(0, "Wet", 0.0, 1.0, -60.0, 0.0)],
            GroupingRuleSet::default(),
        )
    }

    fn exercise(store: &dyn MappingStore) {
        assert_eq!(store.get("abc").unwrap(), None);
        let abc = mapping("abc");
        store.save("abc", &abc).unwrap();
        store.save("def", &mapping("def")).unwrap();
        assert_eq!(store.get("abc").unwrap(), Some(abc));
        assert_eq!(store.list().unwrap(), vec!["abc", "def"]);
        assert!(store.delete("abc").unwrap());
        assert!(!store.delete("abc").unwrap());
        assert_eq!(store.list().unwrap(), vec!["def"]);
    }

    #[rstest]
    #[case::json_file(true)]
    #[case::in_memory(false)]
    fn test_store_contract(#[case] on_disk: bool) {
        let dir = tempfile::tempdir().unwrap();
        if on_disk {
            exercise(&JsonFileMappingStore::new(dir.path().join("mappings")));
        } else {
            exercise(&InMemoryMappingStore::new());
        }
    }

    #[test]
    fn test_rejects_path_like_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMappingStore::new(dir.path());
        assert!(store.get("../etc/passwd").is_err());
        assert!(store.save("", &mapping("x")).is_err());
    }

    #[test]
    fn test_corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{").unwrap();
        let store = JsonFileMappingStore::new(dir.path());
        let err = store.get("bad").unwrap_err();
        assert_eq!(err.code(), "STORE_ERROR");
    }
}
