//! In-memory provider and recording remote shared by the unit tests.

use crate::data_transfer::DataTransfer;
use crate::provider::{DragSource, DropTarget, ItemResolver, ParentResolver, TreeDataProvider, TreeItem};
use crate::remote::TreeViewsRemote;
use crate::tree_view::{TreeView, TreeViewEvent, TreeViewOptions};
use anyhow::bail;
use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver;
use shared::{ItemDescriptor, RevealOptions, RevealTarget, TreeItemHandle, ViewBadge};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(crate) const TEST_VIEW: &str = "test-view";
pub(crate) const TREE_MIME: &str = "application/vnd.tree.test";

#[derive(Default)]
pub(crate) struct CallCounts {
    children: AtomicUsize,
    parent: AtomicUsize,
    drag: AtomicUsize,
}

impl CallCounts {
    pub(crate) fn children(&self) -> usize {
        self.children.load(Ordering::SeqCst)
    }

    pub(crate) fn parent(&self) -> usize {
        self.parent.load(Ordering::SeqCst)
    }

    pub(crate) fn drag(&self) -> usize {
        self.drag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedDrop {
    pub(crate) target: Option<String>,
    pub(crate) tree_payload: Option<String>,
    pub(crate) file_bytes: Vec<Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    children: HashMap<Option<String>, Vec<String>>,
    items: HashMap<String, TreeItem>,
    parents: HashMap<String, String>,
    failing: HashSet<Option<String>>,
    failing_parents: HashSet<String>,
    resolved_tooltips: HashMap<String, String>,
    hold: Option<Arc<Notify>>,
    drops: Vec<RecordedDrop>,
}

/// String-keyed tree. Every capability is on unless switched off.
pub(crate) struct MemoryTree {
    state: Mutex<MemoryState>,
    pub(crate) calls: CallCounts,
    parents_enabled: bool,
    resolver_enabled: bool,
    dnd_enabled: bool,
}

impl MemoryTree {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            calls: CallCounts::default(),
            parents_enabled: true,
            resolver_enabled: true,
            dnd_enabled: true,
        }
    }

    pub(crate) fn without_parents(mut self) -> Self {
        self.parents_enabled = false;
        self
    }

    pub(crate) fn without_resolver(mut self) -> Self {
        self.resolver_enabled = false;
        self
    }

    pub(crate) fn without_drag_and_drop(mut self) -> Self {
        self.dnd_enabled = false;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add(&self, parent: Option<&str>, element: &str, item: TreeItem) {
        self.add_hidden(parent, element);
        self.state().items.insert(element.to_string(), item);
    }

    /// Listed as a child but `get_tree_item` answers `None`.
    pub(crate) fn add_hidden(&self, parent: Option<&str>, element: &str) {
        self.state()
            .children
            .entry(parent.map(str::to_string))
            .or_default()
            .push(element.to_string());
    }

    pub(crate) fn set_item(&self, element: &str, item: TreeItem) {
        self.state().items.insert(element.to_string(), item);
    }

    pub(crate) fn set_parent(&self, element: &str, parent: &str) {
        self.state()
            .parents
            .insert(element.to_string(), parent.to_string());
    }

    pub(crate) fn fail_children_of(&self, parent: Option<&str>) {
        self.state().failing.insert(parent.map(str::to_string));
    }

    pub(crate) fn fail_parent_of(&self, element: &str) {
        self.state().failing_parents.insert(element.to_string());
    }

    pub(crate) fn set_resolved_tooltip(&self, element: &str, tooltip: &str) {
        self.state()
            .resolved_tooltips
            .insert(element.to_string(), tooltip.to_string());
    }

    /// The next `get_children` call blocks until the returned gate is notified.
    pub(crate) fn hold_children(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().hold = Some(gate.clone());
        gate
    }

    pub(crate) fn drops(&self) -> Vec<RecordedDrop> {
        self.state().drops.clone()
    }
}

#[async_trait]
impl TreeDataProvider for MemoryTree {
    type Element = String;

    async fn get_children(&self, element: Option<&String>) -> anyhow::Result<Option<Vec<String>>> {
        self.calls.children.fetch_add(1, Ordering::SeqCst);
        let hold = self.state().hold.take();
        if let Some(gate) = hold {
            gate.notified().await;
        }
        let state = self.state();
        let key = element.cloned();
        if state.failing.contains(&key) {
            bail!("children of {key:?} are unavailable");
        }
        Ok(Some(state.children.get(&key).cloned().unwrap_or_default()))
    }

    async fn get_tree_item(&self, element: &String) -> anyhow::Result<Option<TreeItem>> {
        Ok(self.state().items.get(element).cloned())
    }

    fn parent_resolver(&self) -> Option<&dyn ParentResolver<String>> {
        if self.parents_enabled { Some(self) } else { None }
    }

    fn item_resolver(&self) -> Option<&dyn ItemResolver<String>> {
        if self.resolver_enabled { Some(self) } else { None }
    }

    fn drag_source(&self) -> Option<&dyn DragSource<String>> {
        if self.dnd_enabled { Some(self) } else { None }
    }

    fn drop_target(&self) -> Option<&dyn DropTarget<String>> {
        if self.dnd_enabled { Some(self) } else { None }
    }
}

#[async_trait]
impl ParentResolver<String> for MemoryTree {
    async fn get_parent(&self, element: &String) -> anyhow::Result<Option<String>> {
        self.calls.parent.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_parents.contains(element) {
            bail!("parent of {element} is unavailable");
        }
        if let Some(parent) = state.parents.get(element) {
            return Ok(Some(parent.clone()));
        }
        Ok(state
            .children
            .iter()
            .find(|(_, children)| children.contains(element))
            .and_then(|(parent, _)| parent.clone()))
    }
}

#[async_trait]
impl ItemResolver<String> for MemoryTree {
    async fn resolve_tree_item(
        &self,
        mut item: TreeItem,
        element: &String,
        _token: CancellationToken,
    ) -> anyhow::Result<Option<TreeItem>> {
        let tooltip = self.state().resolved_tooltips.get(element).cloned();
        item.tooltip = tooltip.or(item.tooltip);
        item.label = Some("label changes are ignored".to_string());
        Ok(Some(item))
    }
}

#[async_trait]
impl DragSource<String> for MemoryTree {
    async fn handle_drag(
        &self,
        source: &[String],
        transfer: &mut DataTransfer,
        _token: CancellationToken,
    ) -> anyhow::Result<()> {
        self.calls.drag.fetch_add(1, Ordering::SeqCst);
        transfer.set_text(TREE_MIME, source.join(","));
        Ok(())
    }
}

#[async_trait]
impl DropTarget<String> for MemoryTree {
    async fn handle_drop(
        &self,
        target: Option<&String>,
        transfer: &DataTransfer,
        _token: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut file_bytes = Vec::new();
        for (_, item) in transfer.iter() {
            if let Some(file) = item.as_file() {
                file_bytes.push(file.data().await?.to_vec());
            }
        }
        let tree_payload = transfer.get(TREE_MIME).map(|item| item.as_string().to_string());
        self.state().drops.push(RecordedDrop {
            target: target.cloned(),
            tree_payload,
            file_bytes,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteCall {
    Refresh {
        items: Option<BTreeMap<TreeItemHandle, ItemDescriptor>>,
    },
    Reveal {
        target: Option<RevealTarget>,
        options: RevealOptions,
    },
    SetMessage(String),
    SetTitle(String, Option<String>),
    SetBadge(Option<ViewBadge>),
    DisposeTree,
    ResolveDropFileData {
        request_id: u64,
        item_id: String,
    },
}

#[derive(Default)]
pub(crate) struct RecordingRemote {
    calls: Mutex<Vec<RemoteCall>>,
    refresh_delay: Mutex<Option<Duration>>,
}

impl RecordingRemote {
    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TreeViewsRemote for RecordingRemote {
    async fn refresh(
        &self,
        _view_id: &str,
        items: Option<BTreeMap<TreeItemHandle, ItemDescriptor>>,
    ) -> anyhow::Result<()> {
        self.record(RemoteCall::Refresh { items });
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn reveal(
        &self,
        _view_id: &str,
        target: Option<RevealTarget>,
        options: RevealOptions,
    ) -> anyhow::Result<()> {
        self.record(RemoteCall::Reveal { target, options });
        Ok(())
    }

    async fn set_message(&self, _view_id: &str, message: &str) -> anyhow::Result<()> {
        self.record(RemoteCall::SetMessage(message.to_string()));
        Ok(())
    }

    async fn set_title(
        &self,
        _view_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> anyhow::Result<()> {
        self.record(RemoteCall::SetTitle(
            title.to_string(),
            description.map(str::to_string),
        ));
        Ok(())
    }

    async fn set_badge(&self, _view_id: &str, badge: Option<&ViewBadge>) -> anyhow::Result<()> {
        self.record(RemoteCall::SetBadge(badge.cloned()));
        Ok(())
    }

    async fn dispose_tree(&self, _view_id: &str) -> anyhow::Result<()> {
        self.record(RemoteCall::DisposeTree);
        Ok(())
    }

    async fn resolve_drop_file_data(
        &self,
        _view_id: &str,
        request_id: u64,
        item_id: &str,
    ) -> anyhow::Result<Vec<u8>> {
        self.record(RemoteCall::ResolveDropFileData {
            request_id,
            item_id: item_id.to_string(),
        });
        Ok(item_id.as_bytes().to_vec())
    }
}

pub(crate) fn new_view(
    tree: Arc<MemoryTree>,
) -> (
    TreeView<String>,
    Arc<RecordingRemote>,
    UnboundedReceiver<TreeViewEvent<String>>,
) {
    new_view_with(tree, TreeViewOptions::default())
}

pub(crate) fn new_view_with(
    tree: Arc<MemoryTree>,
    options: TreeViewOptions,
) -> (
    TreeView<String>,
    Arc<RecordingRemote>,
    UnboundedReceiver<TreeViewEvent<String>>,
) {
    let remote = Arc::new(RecordingRemote::default());
    let (view, events) = TreeView::new(TEST_VIEW, tree, remote.clone(), options);
    (view, remote, events)
}
