use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use shared::{CollapsibleState, ThemeIcon, ViewSection};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tree_sync::{
    CancellationToken, DataTransfer, DragSource, DropTarget, ParentResolver, TreeDataProvider,
    TreeItem,
};
use url::Url;

pub const URI_LIST_MIME: &str = "text/uri-list";

/// Directory listing of one root, served as a lazily expanded tree.
///
/// Elements are absolute paths below the (canonical) root; the root itself is
/// not an element, its entries are the tree's roots.
pub struct FileTreeProvider {
    root: PathBuf,
    show_hidden: bool,
    accept_drops: bool,
    exclude: Option<Gitignore>,
}

impl FileTreeProvider {
    pub fn new(section: &ViewSection) -> Result<Self> {
        let root = std::fs::canonicalize(&section.root)
            .with_context(|| format!("Failed to open view root {}", section.root))?;
        if !root.is_dir() {
            return Err(anyhow!("View root {} is not a directory", root.display()));
        }
        let exclude = build_exclude(&root, &section.exclude)?;
        Ok(Self {
            root,
            show_hidden: section.show_hidden,
            accept_drops: section.accept_drops,
            exclude,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self.exclude.as_ref().is_some_and(|matcher| {
            matches!(
                matcher.matched_path_or_any_parents(path, is_dir),
                Match::Ignore(_)
            )
        })
    }

    /// Directory a drop onto `target` writes into.
    fn drop_directory(&self, target: Option<&PathBuf>) -> PathBuf {
        match target {
            Some(path) if path.is_dir() => path.clone(),
            Some(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone()),
            None => self.root.clone(),
        }
    }
}

fn build_exclude(root: &Path, patterns: &[String]) -> Result<Option<Gitignore>> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .with_context(|| format!("Invalid exclude pattern '{pattern}'"))?;
    }
    let matcher = builder.build().context("Failed to build exclude matcher")?;
    Ok(Some(matcher))
}

#[derive(Debug)]
struct DirEntry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

/// Directories first, then case-insensitive by name.
fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

fn list_directory(dir: PathBuf, show_hidden: bool) -> Result<Vec<DirEntry>> {
    // Probe first so permission errors surface instead of an empty listing.
    std::fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(&dir)
        .sort(false)
        .max_depth(1)
        .skip_hidden(!show_hidden)
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let path = entry.path();
        if path == dir {
            continue;
        }
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            is_dir: entry.file_type().is_dir(),
            path,
        });
    }
    Ok(entries)
}

/// Percent-encoded `file://` URI of an absolute path.
pub fn file_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// Path of a `file://` URI, `None` for any other scheme or a malformed URI.
pub fn path_from_uri(uri: &str) -> Option<PathBuf> {
    Url::parse(uri).ok()?.to_file_path().ok()
}

/// Final component of a dropped file name, so a drop never writes outside
/// the target directory.
fn safe_file_name(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(|file_name| file_name.to_str())
}

#[async_trait]
impl TreeDataProvider for FileTreeProvider {
    type Element = PathBuf;

    async fn get_children(&self, element: Option<&PathBuf>) -> Result<Option<Vec<PathBuf>>> {
        let dir = element.cloned().unwrap_or_else(|| self.root.clone());
        if !tokio::fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let show_hidden = self.show_hidden;
        let mut entries = tokio::task::spawn_blocking(move || list_directory(dir, show_hidden))
            .await
            .context("Directory listing task failed")??;
        entries.retain(|entry| !self.is_excluded(&entry.path, entry.is_dir));
        entries.sort_by(compare_entries);
        Ok(Some(entries.into_iter().map(|entry| entry.path).collect()))
    }

    async fn get_tree_item(&self, element: &PathBuf) -> Result<Option<TreeItem>> {
        let meta = match tokio::fs::metadata(element).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to stat {}", element.display()));
            }
        };
        let is_dir = meta.is_dir();
        let mut item = TreeItem::default().with_tooltip(element.display().to_string());
        item.resource_uri = file_uri(element);
        item.label = element
            .file_name()
            .map(|name| name.to_string_lossy().to_string());
        item.context_value = Some(if is_dir { "directory" } else { "file" }.to_string());
        item.theme_icon = Some(ThemeIcon {
            id: if is_dir { "folder" } else { "file" }.to_string(),
            color: None,
        });
        if is_dir {
            item.collapsible_state = CollapsibleState::Collapsed;
        }
        Ok(Some(item))
    }

    fn parent_resolver(&self) -> Option<&dyn ParentResolver<PathBuf>> {
        Some(self)
    }

    fn drag_source(&self) -> Option<&dyn DragSource<PathBuf>> {
        Some(self)
    }

    fn drop_target(&self) -> Option<&dyn DropTarget<PathBuf>> {
        if self.accept_drops { Some(self) } else { None }
    }
}

#[async_trait]
impl ParentResolver<PathBuf> for FileTreeProvider {
    async fn get_parent(&self, element: &PathBuf) -> Result<Option<PathBuf>> {
        if !element.starts_with(&self.root) || element == &self.root {
            return Err(anyhow!("{} is outside {}", element.display(), self.root.display()));
        }
        Ok(element
            .parent()
            .filter(|parent| *parent != self.root)
            .map(Path::to_path_buf))
    }
}

#[async_trait]
impl DragSource<PathBuf> for FileTreeProvider {
    async fn handle_drag(
        &self,
        source: &[PathBuf],
        transfer: &mut DataTransfer,
        _token: CancellationToken,
    ) -> Result<()> {
        let uris: Vec<String> = source.iter().filter_map(|path| file_uri(path)).collect();
        transfer.set_text(URI_LIST_MIME, uris.join("\r\n"));
        Ok(())
    }
}

#[async_trait]
impl DropTarget<PathBuf> for FileTreeProvider {
    async fn handle_drop(
        &self,
        target: Option<&PathBuf>,
        transfer: &DataTransfer,
        token: CancellationToken,
    ) -> Result<()> {
        let directory = self.drop_directory(target);
        for (mime_type, item) in transfer.iter() {
            if token.is_cancelled() {
                log::info!("Drop into {} cancelled", directory.display());
                return Ok(());
            }
            if let Some(file) = item.as_file() {
                let Some(name) = safe_file_name(file.name()) else {
                    log::warn!("Skipping dropped file with unusable name '{}'", file.name());
                    continue;
                };
                let bytes = file.data().await?;
                let destination = directory.join(name);
                tokio::fs::write(&destination, &*bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", destination.display()))?;
                log::info!("Dropped {} ({} bytes)", destination.display(), bytes.len());
            } else if mime_type == URI_LIST_MIME {
                let paths: Vec<PathBuf> = item
                    .as_string()
                    .lines()
                    .filter_map(|line| path_from_uri(line.trim()))
                    .collect();
                log::info!("Dropped {} uri(s) onto {}: {:?}", paths.len(), directory.display(), paths);
            }
        }
        Ok(())
    }
}
