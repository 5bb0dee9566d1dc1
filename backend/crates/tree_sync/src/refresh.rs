//! Debounced refresh engine.
//!
//! Change notifications are coalesced for a short window, then flushed as a
//! single `refresh` on the remote. Flushes never interleave: each one holds
//! the view's flush gate until the remote call has returned.

use crate::error::{Result, TreeViewError};
use crate::handle::allocate_handle;
use crate::node_cache::{NodeCache, NodeKey};
use crate::provider::TreeElement;
use crate::tree_view::Inner;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::future::join_all;
use indexmap::IndexSet;
use shared::{ItemDescriptor, TreeItemHandle};
use std::collections::BTreeMap;
use std::sync::Weak;
use std::time::Duration;

/// What the provider reports as changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<E> {
    All,
    Element(E),
    Elements(Vec<E>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshSignal<E> {
    Change(Change<E>),
    /// The view message changed and must be pushed with the next flush.
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Batching,
    Flushing,
}

/// Signals accumulated during one debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch<E: TreeElement> {
    pub all: bool,
    pub elements: IndexSet<E>,
    pub message: bool,
}

impl<E: TreeElement> Default for PendingBatch<E> {
    fn default() -> Self {
        Self {
            all: false,
            elements: IndexSet::new(),
            message: false,
        }
    }
}

impl<E: TreeElement> PendingBatch<E> {
    pub fn is_empty(&self) -> bool {
        !self.all && self.elements.is_empty() && !self.message
    }
}

/// Folds one signal into a batch. A full refresh absorbs any element changes.
pub fn merge<E: TreeElement>(mut pending: PendingBatch<E>, incoming: RefreshSignal<E>) -> PendingBatch<E> {
    match incoming {
        RefreshSignal::Change(Change::All) => {
            pending.all = true;
            pending.elements.clear();
        }
        RefreshSignal::Change(Change::Element(element)) => {
            if !pending.all {
                pending.elements.insert(element);
            }
        }
        RefreshSignal::Change(Change::Elements(elements)) => {
            if !pending.all {
                pending.elements.extend(elements);
            }
        }
        RefreshSignal::Message => pending.message = true,
    }
    pending
}

/// Cloneable handle a provider keeps to report changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier<E> {
    sender: UnboundedSender<RefreshSignal<E>>,
}

impl<E: TreeElement> ChangeNotifier<E> {
    pub(crate) fn new(sender: UnboundedSender<RefreshSignal<E>>) -> Self {
        Self { sender }
    }

    pub fn notify(&self, change: Change<E>) {
        if self.sender.unbounded_send(RefreshSignal::Change(change)).is_err() {
            log::debug!("change notification dropped: tree view is gone");
        }
    }

    pub fn refresh_all(&self) {
        self.notify(Change::All);
    }

    pub fn refresh(&self, element: E) {
        self.notify(Change::Element(element));
    }
}

/// Handles of the minimal set of cached nodes covering `elements`: nodes with
/// a cached ancestor in the same set are dropped. Uncached elements are
/// ignored. Order follows the first occurrence in `elements`.
pub fn handles_to_refresh<'a, E: TreeElement>(
    cache: &NodeCache<E>,
    elements: impl IntoIterator<Item = &'a E>,
) -> Vec<TreeItemHandle> {
    let keys: IndexSet<NodeKey> = elements
        .into_iter()
        .filter_map(|element| cache.key_for_element(element))
        .collect();
    keys.iter()
        .filter(|key| !cache.ancestors(**key).any(|ancestor| keys.contains(&ancestor)))
        .filter_map(|key| cache.get(*key))
        .map(|node| node.item.handle.clone())
        .collect()
}

pub(crate) async fn run_refresh_loop<E: TreeElement>(
    view: Weak<Inner<E>>,
    mut signals: UnboundedReceiver<RefreshSignal<E>>,
    debounce: Duration,
) {
    while let Some(first) = signals.next().await {
        let mut batch = merge(PendingBatch::default(), first);
        if let Some(inner) = view.upgrade() {
            inner.set_phase(RefreshPhase::Batching);
        }

        let window = tokio::time::sleep(debounce);
        tokio::pin!(window);
        let mut closed = false;
        loop {
            tokio::select! {
                _ = &mut window => break,
                signal = signals.next() => match signal {
                    Some(signal) => batch = merge(batch, signal),
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        let Some(inner) = view.upgrade() else {
            break;
        };
        inner.set_phase(RefreshPhase::Flushing);
        {
            let _gate = inner.flush_gate.lock().await;
            if let Err(err) = inner.flush(batch).await {
                log::error!("tree view '{}': refresh failed: {}", inner.view_id, err);
            }
        }
        inner.set_phase(RefreshPhase::Idle);
        if closed {
            break;
        }
    }
}

impl<E: TreeElement> Inner<E> {
    /// Applies one batch. Callers hold the flush gate.
    pub(crate) async fn flush(&self, batch: PendingBatch<E>) -> Result<()> {
        if batch.all {
            {
                let mut core = self.core();
                if core.disposed {
                    return Ok(());
                }
                core.cache.clear_all();
            }
            log::debug!("tree view '{}': full refresh", self.view_id);
            self.remote
                .refresh(&self.view_id, None)
                .await
                .map_err(TreeViewError::Remote)?;
        } else if !batch.elements.is_empty() {
            let handles = {
                let core = self.core();
                if core.disposed {
                    return Ok(());
                }
                handles_to_refresh(&core.cache, &batch.elements)
            };
            let results = join_all(handles.iter().map(|handle| self.refresh_node(handle))).await;

            let mut updated = BTreeMap::new();
            for (handle, result) in handles.into_iter().zip(results) {
                match result {
                    Ok(Some(item)) => {
                        updated.insert(handle, item);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        log::error!("tree view '{}': refreshing {} failed: {}", self.view_id, handle, err)
                    }
                }
            }
            if !updated.is_empty() {
                log::debug!("tree view '{}': refreshing {} node(s)", self.view_id, updated.len());
                self.remote
                    .refresh(&self.view_id, Some(updated))
                    .await
                    .map_err(TreeViewError::Remote)?;
            }
        }

        if batch.message {
            let message = self.core().state.message().to_string();
            self.remote
                .set_message(&self.view_id, &message)
                .await
                .map_err(TreeViewError::Remote)?;
        }
        Ok(())
    }

    /// Rebuilds one cached node from a fresh `get_tree_item` and drops its
    /// children. Returns the new descriptor, or `None` if the node went away.
    async fn refresh_node(&self, handle: &str) -> Result<Option<ItemDescriptor>> {
        let element = {
            let mut core = self.core();
            let Some(key) = core.cache.key_for_handle(handle) else {
                return Ok(None);
            };
            core.cache.clear_children(Some(key));
            match core.cache.get(key) {
                Some(node) => node.element.clone(),
                None => return Ok(None),
            }
        };

        let Some(tree_item) = self
            .provider
            .get_tree_item(&element)
            .await
            .map_err(TreeViewError::Provider)?
        else {
            return Ok(None);
        };

        let mut core = self.core();
        let Some(key) = core.cache.key_for_element(&element) else {
            return Ok(None);
        };
        let parent = core.cache.parent_of(key);
        let new_handle = allocate_handle(&core.cache, &element, &tree_item, parent);
        let new_key = core.cache.replace(key, tree_item, new_handle)?;
        Ok(core.cache.get(new_key).map(|node| node.item.clone()))
    }
}
