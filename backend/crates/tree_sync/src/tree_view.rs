use crate::drag_drop::DragRegistry;
use crate::error::{Result, TreeViewError};
use crate::handle::allocate_handle;
use crate::node_cache::NodeCache;
use crate::provider::{CheckboxState, TreeDataProvider, TreeElement};
use crate::refresh::{Change, ChangeNotifier, RefreshPhase, RefreshSignal, run_refresh_loop};
use crate::remote::TreeViewsRemote;
use crate::state_sync::ViewState;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::future::try_join_all;
use shared::{ItemDescriptor, TreeItemHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TreeViewOptions {
    /// Window during which change notifications are coalesced.
    pub debounce: Duration,
    pub can_select_many: bool,
}

impl TreeViewOptions {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_can_select_many(mut self, can_select_many: bool) -> Self {
        self.can_select_many = can_select_many;
        self
    }
}

impl Default for TreeViewOptions {
    fn default() -> Self {
        Self {
            debounce: Self::DEFAULT_DEBOUNCE,
            can_select_many: false,
        }
    }
}

/// Notifications delivered to the host that owns the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeViewEvent<E> {
    SelectionChanged { selection: Vec<E> },
    ActiveItemChanged { active: Option<E> },
    VisibilityChanged { visible: bool },
    CheckboxStateChanged { items: Vec<(E, CheckboxState)> },
    ElementExpanded { element: E },
    ElementCollapsed { element: E },
}

/// Mutable per-view state. Only touched under the view's lock, never across an await.
pub(crate) struct ViewCore<E: TreeElement> {
    pub(crate) cache: NodeCache<E>,
    pub(crate) state: ViewState,
    pub(crate) drags: DragRegistry,
    pub(crate) phase: RefreshPhase,
    pub(crate) disposed: bool,
}

impl<E: TreeElement> ViewCore<E> {
    pub(crate) fn ensure_live(&self, view_id: &str) -> Result<()> {
        if self.disposed {
            return Err(TreeViewError::StaleView(view_id.to_string()));
        }
        Ok(())
    }
}

pub(crate) struct Inner<E: TreeElement> {
    pub(crate) view_id: String,
    pub(crate) provider: Arc<dyn TreeDataProvider<Element = E>>,
    pub(crate) remote: Arc<dyn TreeViewsRemote>,
    pub(crate) options: TreeViewOptions,
    /// Held for the whole of a flush so no flush interleaves with another.
    pub(crate) flush_gate: tokio::sync::Mutex<()>,
    core: Mutex<ViewCore<E>>,
    events: UnboundedSender<TreeViewEvent<E>>,
    signals: UnboundedSender<RefreshSignal<E>>,
}

impl<E: TreeElement> Inner<E> {
    pub(crate) fn core(&self) -> MutexGuard<'_, ViewCore<E>> {
        self.core.lock().unwrap_or_else(|poisoned| {
            log::warn!("tree view '{}' state mutex poisoned; recovering", self.view_id);
            poisoned.into_inner()
        })
    }

    pub(crate) fn emit(&self, event: TreeViewEvent<E>) {
        // The host may have dropped its event stream; that is not an error.
        let _ = self.events.unbounded_send(event);
    }

    pub(crate) fn signal(&self, signal: RefreshSignal<E>) {
        let _ = self.signals.unbounded_send(signal);
    }

    pub(crate) fn set_phase(&self, phase: RefreshPhase) {
        self.core().phase = phase;
    }

    /// Children of `parent_handle` (roots for `None`).
    ///
    /// Answers from cache when the child list is present and trusted, unless
    /// `force` is set. Otherwise asks the provider and registers the whole new
    /// child list in one synchronous step. `Ok(None)` means the result was
    /// superseded by a clear while the provider was running.
    pub(crate) async fn fetch_children(
        &self,
        parent_handle: Option<&str>,
        force: bool,
    ) -> Result<Option<Vec<ItemDescriptor>>> {
        let (parent_key, parent_element, epoch) = {
            let core = self.core();
            core.ensure_live(&self.view_id)?;
            let parent_key = match parent_handle {
                Some(handle) => Some(
                    core.cache
                        .key_for_handle(handle)
                        .ok_or_else(|| TreeViewError::UnknownHandle(handle.to_string()))?,
                ),
                None => None,
            };
            if !force {
                if let Some(keys) = core.cache.children(parent_key) {
                    return Ok(Some(core.cache.descriptors(keys)));
                }
            }
            let parent_element = parent_key
                .and_then(|key| core.cache.get(key))
                .map(|node| node.element.clone());
            (parent_key, parent_element, core.cache.epoch())
        };

        let elements = self
            .provider
            .get_children(parent_element.as_ref())
            .await
            .map_err(TreeViewError::Provider)?
            .unwrap_or_default();
        let items = try_join_all(elements.iter().map(|element| self.provider.get_tree_item(element)))
            .await
            .map_err(TreeViewError::Provider)?;

        let mut core = self.core();
        if core.disposed || core.cache.epoch() != epoch {
            log::debug!(
                "tree view '{}': discarding children of {:?} fetched before the tree was cleared",
                self.view_id,
                parent_handle
            );
            return Ok(None);
        }
        if !force {
            if let Some(keys) = core.cache.children(parent_key) {
                return Ok(Some(core.cache.descriptors(keys)));
            }
        }
        if !core.cache.begin_children(parent_key) {
            log::debug!(
                "tree view '{}': parent {:?} was refreshed while its children were fetched",
                self.view_id,
                parent_handle
            );
            return Ok(None);
        }

        let mut registered = Vec::with_capacity(elements.len());
        for (element, item) in elements.into_iter().zip(items) {
            let Some(item) = item else {
                continue;
            };
            let handle = allocate_handle(&core.cache, &element, &item, parent_key);
            match core.cache.register(parent_key, element, item, handle) {
                Ok(key) => registered.push(key),
                Err(err) => {
                    core.cache.clear_children(parent_key);
                    return Err(err);
                }
            }
        }
        log::trace!(
            "tree view '{}': registered {} child node(s) under {:?}",
            self.view_id,
            registered.len(),
            parent_handle
        );
        Ok(Some(core.cache.descriptors(&registered)))
    }
}

/// Synchronizes one provider-owned tree with the remote renderer.
///
/// Must be created inside a tokio runtime: the refresh engine runs as a
/// background task for the lifetime of the view.
pub struct TreeView<E: TreeElement> {
    pub(crate) inner: Arc<Inner<E>>,
    refresh_task: JoinHandle<()>,
}

impl<E: TreeElement> TreeView<E> {
    pub fn new(
        view_id: impl Into<String>,
        provider: Arc<dyn TreeDataProvider<Element = E>>,
        remote: Arc<dyn TreeViewsRemote>,
        options: TreeViewOptions,
    ) -> (Self, UnboundedReceiver<TreeViewEvent<E>>) {
        let (events, event_stream) = unbounded();
        let (signals, signal_stream) = unbounded();
        let debounce = options.debounce;
        let inner = Arc::new(Inner {
            view_id: view_id.into(),
            provider,
            remote,
            options,
            flush_gate: tokio::sync::Mutex::new(()),
            core: Mutex::new(ViewCore {
                cache: NodeCache::new(),
                state: ViewState::default(),
                drags: DragRegistry::default(),
                phase: RefreshPhase::Idle,
                disposed: false,
            }),
            events,
            signals,
        });
        let refresh_task = tokio::spawn(run_refresh_loop(
            Arc::downgrade(&inner),
            signal_stream,
            debounce,
        ));
        (
            Self {
                inner,
                refresh_task,
            },
            event_stream,
        )
    }

    pub fn view_id(&self) -> &str {
        &self.inner.view_id
    }

    /// Handle the provider keeps to report model changes.
    pub fn notifier(&self) -> ChangeNotifier<E> {
        ChangeNotifier::new(self.inner.signals.clone())
    }

    pub fn notify(&self, change: Change<E>) {
        self.inner.signal(RefreshSignal::Change(change));
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.inner.core().phase
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core().disposed
    }

    /// Children of `parent_handle`, or the roots for `None`.
    ///
    /// Waits for a flush in progress so the answer never mixes pre- and
    /// post-refresh state.
    pub async fn get_children(
        &self,
        parent_handle: Option<&str>,
    ) -> Result<Option<Vec<ItemDescriptor>>> {
        drop(self.inner.flush_gate.lock().await);
        self.inner.fetch_children(parent_handle, false).await
    }

    pub fn extension_element(&self, handle: &str) -> Option<E> {
        self.inner.core().cache.element(handle).cloned()
    }

    /// Elements for `handles`, skipping any that no longer resolve.
    pub fn extension_elements(&self, handles: &[TreeItemHandle]) -> Result<Vec<E>> {
        let core = self.inner.core();
        core.ensure_live(&self.inner.view_id)?;
        Ok(handles
            .iter()
            .filter_map(|handle| core.cache.element(handle).cloned())
            .collect())
    }

    /// Lets the provider fill in tooltip and command for a cached item.
    ///
    /// Returns `Ok(None)` when the provider has no resolver or the handle is stale.
    pub async fn resolve_tree_item(
        &self,
        handle: &str,
        token: CancellationToken,
    ) -> Result<Option<ItemDescriptor>> {
        let Some(resolver) = self.inner.provider.item_resolver() else {
            return Ok(None);
        };
        let (element, declared) = {
            let core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            match core.cache.key_for_handle(handle).and_then(|key| core.cache.get(key)) {
                Some(node) => (node.element.clone(), node.tree_item.clone()),
                None => return Ok(None),
            }
        };

        let resolved = resolver
            .resolve_tree_item(declared.clone(), &element, token)
            .await
            .map_err(TreeViewError::Provider)?
            .unwrap_or(declared);

        let mut core = self.inner.core();
        let Some(key) = core.cache.key_for_handle(handle) else {
            return Ok(None);
        };
        let Some(node) = core.cache.get_mut(key) else {
            return Ok(None);
        };
        if node.element != element {
            return Ok(None);
        }
        node.tree_item.tooltip = resolved.tooltip.clone();
        node.tree_item.command = resolved.command.clone();
        node.item.tooltip = resolved.tooltip;
        node.item.command = resolved.command;
        Ok(Some(node.item.clone()))
    }

    /// Cached child lists stop being trusted; each is re-derived from the
    /// provider the next time it is requested.
    pub fn flag_as_stale(&self) {
        self.inner.core().cache.mark_untrusted();
    }

    /// Releases every cached node and pending drag, then tells the renderer.
    ///
    /// Local state is released before the remote call, so a fetch that
    /// resolves afterwards is discarded.
    pub async fn dispose(&self) -> Result<()> {
        self.refresh_task.abort();
        {
            let mut core = self.inner.core();
            if core.disposed {
                return Ok(());
            }
            core.disposed = true;
            core.cache.clear_all();
            core.drags.clear();
            core.phase = RefreshPhase::Idle;
        }
        log::debug!("tree view '{}' disposed", self.inner.view_id);
        self.inner
            .remote
            .dispose_tree(&self.inner.view_id)
            .await
            .map_err(TreeViewError::Remote)
    }
}

impl<E: TreeElement> Drop for TreeView<E> {
    fn drop(&mut self) {
        self.refresh_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryTree, RemoteCall, new_view};
    use crate::provider::TreeItem;
    use shared::CollapsibleState;

    fn handles(items: &[ItemDescriptor]) -> Vec<&str> {
        items.iter().map(|item| item.handle.as_str()).collect()
    }

    fn sample_tree() -> Arc<MemoryTree> {
        let tree = MemoryTree::new();
        tree.add(None, "a", TreeItem::new("a").with_collapsible_state(CollapsibleState::Collapsed));
        tree.add(Some("a"), "a1", TreeItem::new("one"));
        tree.add(Some("a"), "a2", TreeItem::new("two"));
        tree.add(None, "b", TreeItem::new("b"));
        Arc::new(tree)
    }

    #[tokio::test]
    async fn same_labels_at_root_get_distinct_handles() {
        let tree = MemoryTree::new();
        tree.add(None, "first", TreeItem::new("foo"));
        tree.add(None, "second", TreeItem::new("foo"));
        let (view, _remote, _events) = new_view(Arc::new(tree));

        let roots = view.get_children(None).await.unwrap().unwrap();

        assert_eq!(handles(&roots), vec!["0/0:foo", "0/1:foo"]);
        assert_eq!(view.extension_element("0/1:foo"), Some("second".to_string()));
    }

    #[tokio::test]
    async fn children_are_fetched_lazily_and_cached() {
        let tree = sample_tree();
        let (view, _remote, _events) = new_view(tree.clone());

        let roots = view.get_children(None).await.unwrap().unwrap();
        assert_eq!(handles(&roots), vec!["0/0:a", "0/0:b"]);
        assert_eq!(tree.calls.children(), 1);

        let first = view.get_children(Some("0/0:a")).await.unwrap().unwrap();
        let second = view.get_children(Some("0/0:a")).await.unwrap().unwrap();

        assert_eq!(handles(&first), vec!["0/0:a/0:one", "0/0:a/0:two"]);
        assert_eq!(first, second);
        assert_eq!(first[0].parent_handle.as_deref(), Some("0/0:a"));
        assert_eq!(tree.calls.children(), 2);
    }

    #[tokio::test]
    async fn items_resolving_to_none_are_dropped() {
        let tree = MemoryTree::new();
        tree.add(None, "shown", TreeItem::new("shown"));
        tree.add_hidden(None, "hidden");
        let (view, _remote, _events) = new_view(Arc::new(tree));

        let roots = view.get_children(None).await.unwrap().unwrap();

        assert_eq!(handles(&roots), vec!["0/0:shown"]);
        assert!(view.extension_elements(&["0/1:".to_string()]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_parent_handle_is_rejected() {
        let (view, _remote, _events) = new_view(sample_tree());

        let err = view.get_children(Some("0/0:nope")).await.unwrap_err();
        assert!(matches!(err, TreeViewError::UnknownHandle(handle) if handle == "0/0:nope"));
    }

    #[tokio::test]
    async fn provider_fault_rejects_children_fetch() {
        let tree = sample_tree();
        tree.fail_children_of(Some("a"));
        let (view, _remote, _events) = new_view(tree);

        view.get_children(None).await.unwrap();
        let err = view.get_children(Some("0/0:a")).await.unwrap_err();

        assert!(matches!(err, TreeViewError::Provider(_)));
        assert!(view.get_children(None).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_declared_ids_leave_children_absent() {
        let tree = MemoryTree::new();
        tree.add(None, "x", TreeItem::new("x").with_id("same"));
        tree.add(None, "y", TreeItem::new("y").with_id("same"));
        let tree = Arc::new(tree);
        let (view, _remote, _events) = new_view(tree.clone());

        let err = view.get_children(None).await.unwrap_err();
        assert!(matches!(err, TreeViewError::DuplicateId { id } if id == "same"));

        // Nothing half-registered: the next request goes back to the provider.
        assert!(view.extension_element("1/same").is_none());
        let _ = view.get_children(None).await;
        assert_eq!(tree.calls.children(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_superseded_by_full_refresh_is_discarded() {
        let tree = sample_tree();
        let gate = tree.hold_children();
        let (view, remote, _events) = new_view(tree.clone());
        let view = Arc::new(view);

        let pending = tokio::spawn({
            let view = view.clone();
            async move { view.get_children(None).await }
        });
        tokio::task::yield_now().await;

        view.notify(Change::All);
        tokio::time::sleep(Duration::from_millis(300)).await;
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), None);
        assert!(view.extension_element("0/0:a").is_none());
        assert_eq!(remote.calls(), vec![RemoteCall::Refresh { items: None }]);
    }

    #[tokio::test]
    async fn resolve_tree_item_updates_tooltip_and_command_only() {
        let tree = sample_tree();
        tree.set_resolved_tooltip("a", "resolved tooltip");
        let (view, _remote, _events) = new_view(tree);
        view.get_children(None).await.unwrap();

        let item = view
            .resolve_tree_item("0/0:a", CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.tooltip.as_deref(), Some("resolved tooltip"));
        assert_eq!(item.label.as_deref(), Some("a"));
        let cached = view.get_children(None).await.unwrap().unwrap();
        assert_eq!(cached[0].tooltip.as_deref(), Some("resolved tooltip"));
    }

    #[tokio::test]
    async fn resolve_tree_item_for_stale_handle_is_silent() {
        let (view, _remote, _events) = new_view(sample_tree());

        let item = view
            .resolve_tree_item("0/0:gone", CancellationToken::new())
            .await
            .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn resolve_tree_item_without_resolver_returns_nothing() {
        let tree = MemoryTree::new().without_resolver();
        tree.add(None, "a", TreeItem::new("a"));
        let (view, _remote, _events) = new_view(Arc::new(tree));
        view.get_children(None).await.unwrap();

        let item = view
            .resolve_tree_item("0/0:a", CancellationToken::new())
            .await
            .unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn stale_flag_refetches_cached_lists() {
        let tree = sample_tree();
        let (view, _remote, _events) = new_view(tree.clone());
        view.get_children(None).await.unwrap();
        view.get_children(Some("0/0:a")).await.unwrap();
        assert_eq!(tree.calls.children(), 2);

        view.flag_as_stale();
        tree.add(None, "c", TreeItem::new("c"));
        let roots = view.get_children(None).await.unwrap().unwrap();

        assert_eq!(handles(&roots), vec!["0/0:a", "0/0:b", "0/0:c"]);
        assert_eq!(tree.calls.children(), 3);
        // Root list trusted again; the rebuilt subtree under `a` is fetched on demand.
        view.get_children(None).await.unwrap();
        view.get_children(Some("0/0:a")).await.unwrap();
        assert_eq!(tree.calls.children(), 4);
    }

    #[tokio::test]
    async fn dispose_clears_state_and_notifies_remote() {
        let (view, remote, _events) = new_view(sample_tree());
        view.get_children(None).await.unwrap();

        view.dispose().await.unwrap();

        assert!(view.is_disposed());
        assert!(view.extension_element("0/0:a").is_none());
        assert_eq!(remote.calls(), vec![RemoteCall::DisposeTree]);
        let err = view.get_children(None).await.unwrap_err();
        assert!(err.is_stale_view());

        view.dispose().await.unwrap();
        assert_eq!(remote.calls().len(), 1);
    }
}
