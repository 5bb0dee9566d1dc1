use crate::fs_tree::FileTreeProvider;
use crate::watcher::{DirWatcher, watch_tree};
use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use shared::{DownMsg, HostConfig, UpMsg, ViewSection};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tree_sync::{
    CancellationToken, Change, DropOutcome, DropRequest, TreeView, TreeViewError, TreeViewEvent,
    TreeViewOptions, TreeViewsRemote,
};

struct ViewEntry {
    view: Arc<TreeView<PathBuf>>,
    _watcher: Option<DirWatcher>,
    events_task: JoinHandle<()>,
}

/// Open tree views by id, and the request router in front of them.
pub struct ViewRegistry {
    remote: Arc<dyn TreeViewsRemote>,
    debounce: Duration,
    views: Mutex<HashMap<String, ViewEntry>>,
    /// Ids whose `open_view` is in flight.
    opening: Mutex<HashSet<String>>,
}

/// Holds a view id while it is being opened.
struct Reservation<'a> {
    registry: &'a ViewRegistry,
    view_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(&self.registry.opening).remove(&self.view_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("View registry mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

impl ViewRegistry {
    pub fn new(remote: Arc<dyn TreeViewsRemote>, config: &HostConfig) -> Arc<Self> {
        Arc::new(Self {
            remote,
            debounce: Duration::from_millis(config.refresh.debounce_ms),
            views: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashSet::new()),
        })
    }

    fn views(&self) -> MutexGuard<'_, HashMap<String, ViewEntry>> {
        lock(&self.views)
    }

    fn reserve(&self, view_id: &str) -> Result<Reservation<'_>> {
        let views = self.views();
        let mut opening = lock(&self.opening);
        if views.contains_key(view_id) || !opening.insert(view_id.to_string()) {
            return Err(anyhow!("View '{}' is already open", view_id));
        }
        Ok(Reservation {
            registry: self,
            view_id: view_id.to_string(),
        })
    }

    pub fn view(&self, view_id: &str) -> Option<Arc<TreeView<PathBuf>>> {
        self.views().get(view_id).map(|entry| entry.view.clone())
    }

    pub fn view_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.views().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn open_view(&self, section: &ViewSection) -> Result<()> {
        let _reservation = self.reserve(&section.id)?;
        let provider = Arc::new(FileTreeProvider::new(section)?);
        let root = provider.root().to_path_buf();
        let options = TreeViewOptions::default()
            .with_debounce(self.debounce)
            .with_can_select_many(section.can_select_many);
        let (view, mut events) = TreeView::new(section.id.clone(), provider, self.remote.clone(), options);
        let view = Arc::new(view);

        let watcher = if section.watch {
            match watch_tree(&root, view.notifier()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::error!("View '{}' will not follow changes: {:#}", section.id, e);
                    None
                }
            }
        } else {
            None
        };

        let view_id = section.id.clone();
        let events_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                log_event(&view_id, &event);
            }
        });

        if let Some(title) = &section.title {
            if let Err(e) = view.set_title(title.clone()).await {
                events_task.abort();
                return Err(e.into());
            }
        }

        log::info!("Serving '{}' from {}", section.id, root.display());
        self.views().insert(
            section.id.clone(),
            ViewEntry {
                view,
                _watcher: watcher,
                events_task,
            },
        );
        Ok(())
    }

    pub async fn close_view(&self, view_id: &str) -> Result<()> {
        let entry = self
            .views()
            .remove(view_id)
            .ok_or_else(|| anyhow!("View '{}' is not open", view_id))?;
        entry.events_task.abort();
        entry.view.dispose().await?;
        Ok(())
    }

    /// Every view re-renders from its roots.
    pub fn refresh_all(&self) {
        for entry in self.views().values() {
            entry.view.notify(Change::All);
        }
    }

    /// Routes one renderer request to its view and produces the reply.
    pub async fn handle(&self, msg: UpMsg) -> DownMsg {
        let view_id = target_view(&msg).to_string();
        match self.route(msg).await {
            Ok(reply) => reply,
            Err(err) => {
                let stale_view = err.is_stale_view();
                if stale_view {
                    log::debug!("Request for stale view '{}'", view_id);
                } else {
                    log::warn!("Request for view '{}' failed: {}", view_id, err);
                }
                DownMsg::Error {
                    view_id: Some(view_id),
                    message: err.to_string(),
                    stale_view,
                }
            }
        }
    }

    async fn route(&self, msg: UpMsg) -> tree_sync::Result<DownMsg> {
        let view_id = target_view(&msg).to_string();
        let view = self
            .view(&view_id)
            .ok_or_else(|| TreeViewError::StaleView(view_id.clone()))?;

        let reply = match msg {
            UpMsg::GetChildren { parent_handle, .. } => {
                let items = view.get_children(parent_handle.as_deref()).await?;
                DownMsg::Children {
                    view_id,
                    parent_handle,
                    items,
                }
            }
            UpMsg::ResolveTreeItem { handle, .. } => {
                let item = view.resolve_tree_item(&handle, CancellationToken::new()).await?;
                DownMsg::ResolvedItem {
                    view_id,
                    handle,
                    item,
                }
            }
            UpMsg::SetVisible { visible, .. } => {
                view.set_visible(visible)?;
                DownMsg::Ack
            }
            UpMsg::SetSelectionAndFocus {
                selected_handles,
                focused_handle,
                ..
            } => {
                view.set_selection_and_focus(selected_handles, focused_handle)?;
                DownMsg::Ack
            }
            UpMsg::SetExpanded {
                handle, expanded, ..
            } => {
                view.set_expanded(&handle, expanded)?;
                DownMsg::Ack
            }
            UpMsg::SetCheckboxState { updates, .. } => {
                view.set_checkbox_state(updates)?;
                DownMsg::Ack
            }
            UpMsg::Reveal { handle, options, .. } => {
                view.reveal_handle(handle.as_ref(), options).await?;
                DownMsg::Ack
            }
            UpMsg::HandleDrag {
                source_handles,
                operation_id,
                ..
            } => {
                let transfer = view
                    .handle_drag(&source_handles, &operation_id, CancellationToken::new())
                    .await?;
                DownMsg::DragData {
                    view_id,
                    operation_id,
                    transfer,
                }
            }
            UpMsg::HandleDrop {
                request_id,
                transfer,
                target_handle,
                operation_id,
                source_view_id,
                source_handles,
                ..
            } => {
                let request = DropRequest {
                    request_id,
                    transfer,
                    target_handle,
                    operation_id,
                    source_view_id,
                    source_handles,
                };
                let outcome = view.handle_drop(request, CancellationToken::new()).await?;
                DownMsg::DropHandled {
                    view_id,
                    request_id,
                    handled: outcome == DropOutcome::Handled,
                }
            }
            UpMsg::DropFileData { .. } => DownMsg::Ack,
        };
        Ok(reply)
    }

    pub async fn shutdown(&self) {
        let ids = self.view_ids();
        for view_id in ids {
            if let Err(e) = self.close_view(&view_id).await {
                log::warn!("Failed to close view '{}': {:#}", view_id, e);
            }
        }
    }
}

fn target_view(msg: &UpMsg) -> &str {
    match msg {
        UpMsg::GetChildren { view_id, .. }
        | UpMsg::ResolveTreeItem { view_id, .. }
        | UpMsg::SetVisible { view_id, .. }
        | UpMsg::SetSelectionAndFocus { view_id, .. }
        | UpMsg::SetExpanded { view_id, .. }
        | UpMsg::SetCheckboxState { view_id, .. }
        | UpMsg::Reveal { view_id, .. }
        | UpMsg::HandleDrag { view_id, .. } => view_id,
        UpMsg::HandleDrop {
            destination_view_id,
            ..
        } => destination_view_id,
        UpMsg::DropFileData { .. } => "",
    }
}

fn log_event(view_id: &str, event: &TreeViewEvent<PathBuf>) {
    match event {
        TreeViewEvent::SelectionChanged { selection } => {
            log::info!("[{}] selection: {:?}", view_id, selection)
        }
        TreeViewEvent::ActiveItemChanged { active } => {
            log::debug!("[{}] active item: {:?}", view_id, active)
        }
        TreeViewEvent::VisibilityChanged { visible } => {
            log::debug!("[{}] visible: {}", view_id, visible)
        }
        TreeViewEvent::CheckboxStateChanged { items } => {
            log::info!("[{}] checkbox changes: {:?}", view_id, items)
        }
        TreeViewEvent::ElementExpanded { element } => {
            log::debug!("[{}] expanded {}", view_id, element.display())
        }
        TreeViewEvent::ElementCollapsed { element } => {
            log::debug!("[{}] collapsed {}", view_id, element.display())
        }
    }
}

/// Opens every configured view. A view that fails to open is logged and skipped.
pub async fn open_configured_views(registry: &ViewRegistry, config: &HostConfig) -> usize {
    let mut opened = 0;
    for section in &config.views {
        match registry.open_view(section).await {
            Ok(()) => opened += 1,
            Err(e) => log::error!("Failed to open view '{}': {:#}", section.id, e),
        }
    }
    opened
}
