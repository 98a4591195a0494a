//! Benchmark catalog
//!
//! The catalog is a JSON array of `{"Name", "Config", "Description"}` records,
//! read once at startup and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{BenchError, Result};

/// One runnable benchmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BenchmarkDefinition {
    pub name: String,
    /// Agent config file the subject runs with
    #[serde(rename = "Config")]
    pub config_path: PathBuf,
    #[serde(default)]
    pub description: String,
}

/// Benchmarks keyed by name
#[derive(Debug, Clone, Default)]
pub struct BenchmarkCatalog {
    entries: HashMap<String, BenchmarkDefinition>,
}

impl BenchmarkCatalog {
    /// Read and decode a catalog file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| BenchError::Catalog {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&bytes)?;
        debug!(path = %path.display(), benchmarks = catalog.len(), "Loaded benchmark catalog");
        Ok(catalog)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let definitions: Vec<BenchmarkDefinition> = serde_json::from_slice(bytes)?;
        Self::from_definitions(definitions)
    }

    pub fn from_definitions<I>(definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = BenchmarkDefinition>,
    {
        let mut entries = HashMap::new();
        for def in definitions {
            if entries.contains_key(&def.name) {
                return Err(BenchError::DuplicateBenchmark(def.name));
            }
            entries.insert(def.name.clone(), def);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&BenchmarkDefinition> {
        self.entries.get(name)
    }

    /// Look up every requested name in order.
    ///
    /// Fails on the first name the catalog does not know, so callers can
    /// reject a run before starting anything.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<BenchmarkDefinition>> {
        if names.is_empty() {
            return Err(BenchError::EmptyBenchmarkList);
        }
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name)
                    .cloned()
                    .ok_or_else(|| BenchError::UnknownBenchmark(name.to_string()))
            })
            .collect()
    }

    /// Definitions sorted by name
    pub fn sorted(&self) -> Vec<&BenchmarkDefinition> {
        let mut defs: Vec<_> = self.entries.values().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
