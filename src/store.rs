//! Persistence collaborators.
//!
//! The registry and the batch orchestrator never touch the filesystem
//! directly for their state; they go through these key-value stores so
//! tests can substitute in-memory implementations.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::template::Template;

// ---------------------------------------------------------------------
// Custom template store
// ---------------------------------------------------------------------

/// Key-value store for custom templates, keyed by lowercase name.
/// Built-ins live in the packaged catalog, never here.
pub trait TemplateStore {
    fn get(&self, name: &str) -> Result<Option<Template>>;
    fn set(&mut self, name: &str, template: &Template) -> Result<()>;
    fn delete(&mut self, name: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<Template>>;
}

#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: IndexMap<String, Template>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn get(&self, name: &str) -> Result<Option<Template>> {
        Ok(self.templates.get(name).cloned())
    }

    fn set(&mut self, name: &str, template: &Template) -> Result<()> {
        self.templates.insert(name.to_string(), template.clone());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        self.templates.shift_remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Template>> {
        Ok(self.templates.values().cloned().collect())
    }
}

/// File-backed template store: one JSON object mapping name to template.
pub struct JsonTemplateStore {
    path: PathBuf,
}

impl JsonTemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> Result<IndexMap<String, Template>> {
        if !self.path.exists() {
            return Ok(IndexMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_map(&self, map: &IndexMap<String, Template>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl TemplateStore for JsonTemplateStore {
    fn get(&self, name: &str) -> Result<Option<Template>> {
        Ok(self.read_map()?.get(name).cloned())
    }

    fn set(&mut self, name: &str, template: &Template) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(name.to_string(), template.clone());
        self.write_map(&map)
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let mut map = self.read_map()?;
        map.shift_remove(name);
        self.write_map(&map)
    }

    fn list(&self) -> Result<Vec<Template>> {
        Ok(self.read_map()?.into_values().collect())
    }
}

// ---------------------------------------------------------------------
// Processing manifest store
// ---------------------------------------------------------------------

/// One manifest record: content fingerprint and last successful
/// processing time for a file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub last_processed: DateTime<Utc>,
}

/// Store for the processing manifest, keyed by absolute file path.
///
/// `load` returns `ManifestCorrupt` when the persisted content is
/// unreadable; the orchestrator recovers by treating every file as
/// changed. `upsert` must be atomic per key.
pub trait ManifestStore {
    fn load(&self) -> Result<BTreeMap<String, ManifestEntry>>;
    fn upsert(&mut self, path: &str, entry: &ManifestEntry) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryManifestStore {
    entries: BTreeMap<String, ManifestEntry>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self) -> Result<BTreeMap<String, ManifestEntry>> {
        Ok(self.entries.clone())
    }

    fn upsert(&mut self, path: &str, entry: &ManifestEntry) -> Result<()> {
        self.entries.insert(path.to_string(), entry.clone());
        Ok(())
    }
}

/// File-backed manifest. Writes go to a temp file in the same directory
/// followed by a rename, so a crash mid-write never corrupts the
/// previous manifest.
pub struct JsonManifestStore {
    path: PathBuf,
}

impl JsonManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ManifestStore for JsonManifestStore {
    fn load(&self) -> Result<BTreeMap<String, ManifestEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        serde_json::from_str(&text).map_err(|e| Error::ManifestCorrupt(e.to_string()))
    }

    fn upsert(&mut self, path: &str, entry: &ManifestEntry) -> Result<()> {
        let mut entries = match self.load() {
            Ok(map) => map,
            // A corrupt manifest is replaced wholesale on the next
            // successful write.
            Err(Error::ManifestCorrupt(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        entries.insert(path.to_string(), entry.clone());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_template_store_round_trip() {
        let mut store = MemoryTemplateStore::new();
        let template = crate::template::test_template("custom");
        store.set("custom", &template).unwrap();
        assert_eq!(store.get("custom").unwrap().unwrap().name, "custom");
        assert_eq!(store.list().unwrap().len(), 1);
        store.delete("custom").unwrap();
        assert!(store.get("custom").unwrap().is_none());
    }

    #[test]
    fn json_manifest_store_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonManifestStore::new(dir.path().join("manifest.json"));
        assert!(store.load().unwrap().is_empty());

        let entry = ManifestEntry {
            fingerprint: "abc123".into(),
            last_processed: Utc::now(),
        };
        store.upsert("/figures/a.svg", &entry).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("/figures/a.svg"), Some(&entry));
    }

    #[test]
    fn corrupt_manifest_reports_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "{not valid json").unwrap();
        let store = JsonManifestStore::new(path.clone());
        let err = store.load().unwrap_err();
        assert_eq!(err.kind(), "ManifestCorruptError");
    }

    #[test]
    fn corrupt_manifest_replaced_on_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "garbage").unwrap();
        let mut store = JsonManifestStore::new(path.clone());
        let entry = ManifestEntry {
            fingerprint: "fp".into(),
            last_processed: Utc::now(),
        };
        store.upsert("/x.svg", &entry).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
