//! Repository directory watcher for the native store.
//!
//! File changes under the repository root are collected for a short debounce
//! window, converted to repository-relative paths, and handed to the change
//! notifier exactly like the paths of a push webhook.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::model::EventOrigin;
use crate::notifier::ChangeNotifier;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a repository directory and publishes refreshes for changed files.
pub struct DirectoryWatcher {
    root: PathBuf,
    debounce: Duration,
}

impl DirectoryWatcher {
    pub fn new(root: &Path, debounce: Duration) -> Self {
        // notify reports canonical paths on some platforms.
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root, debounce }
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(
        self,
        notifier: Arc<ChangeNotifier>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        for path in event.paths {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        tracing::info!(path = ?self.root, "Repository watcher started");

        let root = self.root;
        let debounce = self.debounce;
        tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    path = rx.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                };

                let mut changed = BTreeSet::new();
                changed.extend(relative_paths(&root, &first));
                let window = tokio::time::sleep(debounce);
                tokio::pin!(window);
                loop {
                    tokio::select! {
                        path = rx.recv() => match path {
                            Some(path) => changed.extend(relative_paths(&root, &path)),
                            None => break,
                        },
                        _ = &mut window => break,
                    }
                }

                if changed.is_empty() {
                    continue;
                }
                let revision = format!("fs-{}", chrono::Utc::now().timestamp_millis());
                tracing::debug!(paths = ?changed, "Repository files changed");
                if let Err(e) = notifier.on_paths_changed(
                    Some(revision),
                    changed.into_iter().collect(),
                    EventOrigin::Watcher,
                ) {
                    tracing::error!(error = %e, "Failed to publish watcher refresh");
                }
            }
            tracing::debug!("Repository watcher stopped");
        });

        Ok(watcher)
    }
}

/// Repository-relative forms of `path`.
///
/// A path under a label subdirectory (`release/app.yml`) is also reported
/// without its first component, since the label is not part of the file name
/// the notifier maps.
fn relative_paths(root: &Path, path: &Path) -> Vec<String> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Vec::new();
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() || parts.iter().any(|p| p.starts_with('.')) {
        return Vec::new();
    }

    let mut out = vec![parts.join("/")];
    if parts.len() > 1 {
        out.push(parts[1..].join("/"));
    }
    out
}
