use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tree_sync::{Change, ChangeNotifier};

const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Recursive watch on a view root, forwarding changes to the view's notifier.
/// Stops when dropped.
pub struct DirWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn watch_tree(root: &Path, notifier: ChangeNotifier<PathBuf>) -> Result<DirWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let watched = root.display().to_string();

    let mut debouncer = new_debouncer(WATCH_DEBOUNCE, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|event| event.path).collect();
                if !paths.is_empty() {
                    let _ = tx.send(paths);
                }
            }
            Err(err) => log::error!("Watcher error on {}: {}", watched, err),
        }
    })
    .context("Failed to create file watcher")?;
    debouncer
        .watcher()
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    let root = root.to_path_buf();
    let task = tokio::spawn(async move {
        while let Some(paths) = rx.recv().await {
            if let Some(change) = changes_for(&root, paths) {
                log::debug!("Filesystem change under {}: {:?}", root.display(), change);
                notifier.notify(change);
            }
        }
    });

    Ok(DirWatcher {
        _debouncer: debouncer,
        task,
    })
}

/// A changed path invalidates the directory listing that contains it. Entries
/// directly under the root invalidate the whole tree.
pub fn changes_for(root: &Path, paths: Vec<PathBuf>) -> Option<Change<PathBuf>> {
    let mut seen = HashSet::new();
    let mut parents = Vec::new();
    for path in paths {
        if !path.starts_with(root) {
            continue;
        }
        let Some(parent) = path.parent().filter(|_| path != root) else {
            return Some(Change::All);
        };
        if parent == root {
            return Some(Change::All);
        }
        if seen.insert(parent.to_path_buf()) {
            parents.push(parent.to_path_buf());
        }
    }
    if parents.is_empty() {
        None
    } else {
        Some(Change::Elements(parents))
    }
}
