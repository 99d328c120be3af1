//! Schema loader for collection declarations on disk
//!
//! Each `*.json` file under the schema directory holds a map of collection
//! name to one definition or a list of versions. Versions of the same
//! collection may be spread over several files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::registry::StorageRegistry;
use super::types::{CollectionDefinitionMap, CollectionDefinitions};
use crate::error::{CoreError, CoreResult};

/// Reads collection declaration files from a directory
pub struct SchemaLoader {
    schema_dir: PathBuf,
    collections: CollectionDefinitionMap,
}

impl SchemaLoader {
    pub fn new(schema_dir: &Path) -> Self {
        Self {
            schema_dir: schema_dir.to_path_buf(),
            collections: CollectionDefinitionMap::new(),
        }
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Loads every schema file, in file name order.
    ///
    /// A missing directory loads nothing. Malformed files abort the load.
    pub fn load_all(&mut self) -> CoreResult<usize> {
        if !self.schema_dir.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.schema_dir).map_err(|e| {
            malformed(&self.schema_dir, format!("Failed to read schema directory: {}", e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                malformed(&self.schema_dir, format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();

            // Skip non-JSON files
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        for path in &paths {
            self.load_schema_file(path)?;
        }

        Ok(paths.len())
    }

    fn load_schema_file(&mut self, path: &Path) -> CoreResult<()> {
        let content = fs::read_to_string(path)
            .map_err(|e| malformed(path, format!("Failed to read file: {}", e)))?;

        let declared: CollectionDefinitionMap = serde_json::from_str(&content)
            .map_err(|e| malformed(path, format!("Invalid JSON: {}", e)))?;

        debug!(path = %path.display(), collections = declared.len(), "Loaded schema file");

        for (name, defs) in declared {
            self.add(name, defs);
        }
        Ok(())
    }

    /// Add declarations programmatically, merged with anything already loaded
    pub fn add(&mut self, name: impl Into<String>, defs: impl Into<CollectionDefinitions>) {
        let name = name.into();
        let defs = defs.into();
        let merged = match self.collections.remove(&name) {
            Some(existing) => {
                let mut versions = existing.into_vec();
                versions.extend(defs.into_vec());
                CollectionDefinitions::Versions(versions)
            }
            None => defs,
        };
        self.collections.insert(name, merged);
    }

    pub fn collections(&self) -> &CollectionDefinitionMap {
        &self.collections
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// Register everything loaded so far
    pub fn register_into(&self, registry: &StorageRegistry) -> CoreResult<()> {
        registry.register_collections(self.collections.clone())
    }

    /// Writes `<name>.json` holding the given declarations.
    ///
    /// Existing files are never overwritten.
    pub fn save_collection(
        &self,
        name: &str,
        defs: impl Into<CollectionDefinitions>,
    ) -> CoreResult<PathBuf> {
        let path = self.schema_dir.join(format!("{}.json", name));
        if path.exists() {
            return Err(malformed(&path, "Schema file already exists"));
        }

        if !self.schema_dir.exists() {
            fs::create_dir_all(&self.schema_dir).map_err(|e| {
                malformed(&self.schema_dir, format!("Failed to create schema directory: {}", e))
            })?;
        }

        let mut declared = CollectionDefinitionMap::new();
        declared.insert(name.to_string(), defs.into());
        let content = serde_json::to_string_pretty(&declared)
            .map_err(|e| malformed(&path, format!("Failed to serialize schema: {}", e)))?;

        fs::write(&path, content)
            .map_err(|e| malformed(&path, format!("Failed to write file: {}", e)))?;

        Ok(path)
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> CoreError {
    CoreError::MalformedSchema {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}
