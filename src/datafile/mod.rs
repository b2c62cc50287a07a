//! Datafile catalogue
//!
//! Loads every `*.json` under the configured directory tree, keeps the
//! parsed documents in memory keyed by their path relative to that
//! directory, and exposes the experiment-group structure to the overlay
//! and the scheduler. Documents are read-only after load; reload swaps
//! the whole map under an exclusive lock.

mod variations;

pub use variations::{DeclaredVariant, VariantGroup, extract_variant_groups, variant_array};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::GroupKey;

/// In-memory catalogue of parsed datafiles
pub struct DatafileRepository {
    root: PathBuf,
    files: RwLock<HashMap<String, Arc<Value>>>,
}

impl DatafileRepository {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Scan the directory tree and replace the cached catalogue
    ///
    /// A missing root directory is an error; an unreadable or unparseable
    /// individual file is logged and skipped. Returns the number of
    /// datafiles loaded.
    pub async fn load(&self) -> Result<usize> {
        let mut paths = Vec::new();
        collect_json_files(&self.root, &mut paths).with_context(|| {
            format!("Failed to scan datafiles directory '{}'", self.root.display())
        })?;
        paths.sort();

        let mut loaded = HashMap::with_capacity(paths.len());
        for file_path in paths {
            let relative = relative_key(&self.root, &file_path);
            match read_datafile(&file_path) {
                Ok(doc) => {
                    if doc.get("features").and_then(Value::as_object).is_none() {
                        warn!(
                            "Datafile '{}' has no top-level 'features' object; serving it opaque",
                            relative
                        );
                    }
                    loaded.insert(relative, Arc::new(doc));
                }
                Err(e) => {
                    warn!("Skipping datafile '{}': {}", relative, e);
                }
            }
        }

        let count = loaded.len();
        *self.files.write().await = loaded;
        info!(
            "Loaded {} datafile(s) from {}",
            count,
            self.root.display()
        );
        Ok(count)
    }

    /// Fetch one parsed datafile by its path key
    pub async fn get(&self, path: &str) -> Option<Arc<Value>> {
        self.files.read().await.get(path).cloned()
    }

    /// Number of datafiles currently cached
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    /// The declared variants of one experiment group, or `None` when the
    /// datafile or feature is unknown
    pub async fn group_variants(&self, group: &GroupKey) -> Option<Vec<DeclaredVariant>> {
        let doc = self.get(&group.datafile).await?;
        extract_variant_groups(&doc)
            .into_iter()
            .find(|g| g.feature == group.feature)
            .map(|g| g.variants)
    }

    /// Every experiment group across the catalogue
    pub async fn all_groups(&self) -> Vec<(GroupKey, VariantGroup)> {
        let files = self.files.read().await;
        let mut out = Vec::new();
        for (path, doc) in files.iter() {
            for group in extract_variant_groups(doc) {
                out.push((GroupKey::new(path.clone(), group.feature.clone()), group));
            }
        }
        out
    }
}

/// Path key relative to the datafiles root, with `/` separators
fn relative_key(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_datafile(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    let doc = serde_json::from_str(&raw)?;
    Ok(doc)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
