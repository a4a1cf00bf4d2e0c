//! Git-backed config store using the system `git` CLI.
//!
//! # Responsibilities
//! - Clone the remote repository into `basedir` on first use
//! - Fetch before serving (force-pull) or fall back to the local clone
//! - Resolve labels (branch, tag, commit) to a commit hash
//! - Read candidate files at that commit without touching a work tree
//!
//! # Design Decisions
//! - Every git invocation is bounded by the fetch timeout; the child is
//!   killed when the timeout fires
//! - Operations on the clone are serialized by a single async mutex
//! - Files are read with `git show <rev>:<path>`, so labels never need a checkout

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::model::{ConfigDocument, ConfigKey};
use crate::observability::metrics;
use crate::store::format;
use crate::store::resolve::{merge_layers, Layer, SearchPaths};
use crate::store::{ConfigStore, StoreError};

/// Config store backed by a git repository.
pub struct GitStore {
    uri: String,
    basedir: PathBuf,
    search: SearchPaths,
    force_pull: bool,
    timeout: Duration,
    lock: Mutex<()>,
}

impl GitStore {
    pub fn new(
        uri: String,
        basedir: PathBuf,
        search: SearchPaths,
        force_pull: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            uri,
            basedir,
            search,
            force_pull,
            timeout,
            lock: Mutex::new(()),
        }
    }

    /// Run git with the configured timeout.
    ///
    /// Only spawn failures and timeouts are errors; a non-zero exit is
    /// returned to the caller to interpret.
    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<Output, StoreError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| StoreError::Unavailable(format!("failed to spawn git: {}", e)))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("git {} failed: {}", args[0], e))),
            Err(_) => {
                tracing::warn!(command = args[0], timeout = ?self.timeout, "git command timed out");
                Err(StoreError::Unavailable(format!(
                    "git {} timed out after {:?}",
                    args[0], self.timeout
                )))
            }
        }
    }

    fn is_cloned(&self) -> bool {
        self.basedir.join(".git").exists()
    }

    async fn ensure_clone(&self) -> Result<bool, StoreError> {
        if self.is_cloned() {
            return Ok(false);
        }
        if let Some(parent) = self.basedir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("cannot create {:?}: {}", parent, e)))?;
        }
        let basedir = self.basedir.to_string_lossy().into_owned();
        tracing::info!(uri = %self.uri, basedir = %basedir, "Cloning configuration repository");
        let output = self
            .git(&["clone", "--no-checkout", "--quiet", "--", &self.uri, &basedir], None)
            .await?;
        if !output.status.success() {
            // A half-written clone would make every later fetch fail.
            let _ = tokio::fs::remove_dir_all(&self.basedir).await;
            return Err(StoreError::Unavailable(format!(
                "git clone failed: {}",
                stderr(&output)
            )));
        }
        Ok(true)
    }

    async fn pull(&self) -> Result<(), StoreError> {
        let output = self
            .git(&["fetch", "--prune", "--tags", "--force", "--quiet", "origin"], Some(&self.basedir))
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("git fetch failed: {}", stderr(&output))))
        }
    }

    /// Resolve a label to a commit hash, preferring remote branches.
    async fn rev_parse(&self, label: &str) -> Result<Option<String>, StoreError> {
        for candidate in [format!("refs/remotes/origin/{}", label), label.to_string()] {
            let revspec = format!("{}^{{commit}}", candidate);
            let output = self
                .git(&["rev-parse", "--verify", "--quiet", &revspec], Some(&self.basedir))
                .await?;
            if output.status.success() {
                let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !rev.is_empty() {
                    return Ok(Some(rev));
                }
            }
        }
        Ok(None)
    }

    async fn list_files(&self, rev: &str) -> Result<HashSet<String>, StoreError> {
        let output = self
            .git(&["ls-tree", "-r", "--name-only", rev], Some(&self.basedir))
            .await?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!("git ls-tree failed: {}", stderr(&output))));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    async fn read_file(&self, rev: &str, path: &str) -> Result<String, StoreError> {
        let revspec = format!("{}:{}", rev, path);
        let output = self.git(&["show", &revspec], Some(&self.basedir)).await?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(format!("git show {} failed: {}", revspec, stderr(&output))));
        }
        String::from_utf8(output.stdout).map_err(|_| StoreError::Invalid {
            path: path.to_string(),
            reason: "file is not valid UTF-8".to_string(),
        })
    }

    async fn fetch_locked(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError> {
        let fresh_clone = self.ensure_clone().await?;
        if !fresh_clone {
            if let Err(e) = self.pull().await {
                if self.force_pull {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Fetch failed, serving local clone");
            }
        }

        let rev = self
            .rev_parse(&key.label)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let files = self.list_files(&rev).await?;

        let mut layers = Vec::new();
        for path in self.search.candidates(key) {
            if !files.contains(&path) {
                continue;
            }
            let content = self.read_file(&rev, &path).await?;
            let properties = format::parse(&path, &content).map_err(|reason| StoreError::Invalid {
                path: path.clone(),
                reason,
            })?;
            layers.push(Layer { path, properties });
        }

        if layers.is_empty() {
            return Err(StoreError::NotFound(key.clone()));
        }
        let (properties, sources) = merge_layers(layers);
        Ok(ConfigDocument::new(key.clone(), rev, properties, sources))
    }
}

#[async_trait]
impl ConfigStore for GitStore {
    async fn fetch(&self, key: &ConfigKey) -> Result<ConfigDocument, StoreError> {
        let start = Instant::now();
        let _guard = self.lock.lock().await;
        let result = self.fetch_locked(key).await;
        metrics::record_store_fetch(self.name(), &result, start);
        match &result {
            Ok(doc) => tracing::debug!(key = %key, revision = %doc.source_revision, "Fetched from git"),
            Err(e) => tracing::debug!(key = %key, error = %e, "Git fetch failed"),
        }
        result
    }

    fn name(&self) -> &str {
        "git"
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
