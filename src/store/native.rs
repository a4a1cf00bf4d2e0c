//! Filesystem-backed config store.
//!
//! A label selects a subdirectory of the root when one exists; otherwise the
//! root itself is used. The revision is a SHA-256 digest over the contributing
//! files, so unchanged content always reports the same revision.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::model::{ConfigDocument, ConfigKey};
use crate::observability::metrics;
use crate::store::format;
use crate::store::resolve::{merge_layers, Layer, SearchPaths};
use crate::store::{ConfigStore, StoreError};

/// Config store reading a local directory.
pub struct NativeStore {
    root: PathBuf,
    search: SearchPaths,
}

impl NativeStore {
    pub fn new(root: PathBuf, search: SearchPaths) -> Self {
        Self { root, search }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn base_dir(&self, label: &str) -> Result<PathBuf, StoreError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StoreError::Unavailable(format!("{:?} is not a directory", self.root)));
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!("cannot read {:?}: {}", self.root, e)));
            }
        }
        let Some(labelled) = label_dir(&self.root, label) else {
            return Ok(self.root.clone());
        };
        if tokio::fs::metadata(&labelled).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(labelled)
        } else {
            Ok(self.root.clone())
        }
    }

    async fn fetch_inner(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError> {
        let base = self.base_dir(&key.label).await?;
        let mut hasher = Sha256::new();
        let mut layers = Vec::new();

        for path in self.search.candidates(key) {
            let content = match tokio::fs::read_to_string(base.join(&path)).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return Err(StoreError::Invalid {
                        path,
                        reason: "file is not valid UTF-8".to_string(),
                    });
                }
                Err(e) => {
                    return Err(StoreError::Unavailable(format!("cannot read {}: {}", path, e)));
                }
            };
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);

            let properties = format::parse(&path, &content).map_err(|reason| StoreError::Invalid {
                path: path.clone(),
                reason,
            })?;
            layers.push(Layer { path, properties });
        }

        if layers.is_empty() {
            return Err(StoreError::NotFound(key.clone()));
        }
        let revision = hex::encode(hasher.finalize());
        let (properties, sources) = merge_layers(layers);
        Ok(ConfigDocument::new(key.clone(), revision, properties, sources))
    }
}

#[async_trait]
impl ConfigStore for NativeStore {
    async fn fetch(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError> {
        let start = Instant::now();
        let result = self.fetch_inner(key).await;
        metrics::record_store_fetch(self.name(), &result, start);
        result
    }

    fn name(&self) -> &str {
        "native"
    }
}

/// Subdirectory of `root` named by `label`, built only from plain path
/// components so it can never leave `root`.
fn label_dir(root: &Path, label: &str) -> Option<PathBuf> {
    let mut dir = root.to_path_buf();
    for component in Path::new(label).components() {
        match component {
            Component::Normal(part) => dir.push(part),
            _ => return None,
        }
    }
    (dir != root).then_some(dir)
}
