//! Reveal: make an arbitrary element visible in the renderer.
//!
//! The ancestor chain is resolved bottom-up (cache first, provider parent
//! lookup otherwise), then each level is made present in the cache top-down
//! so the renderer receives handles consistent with what `get_children` would
//! have produced.

use crate::error::{Result, TreeViewError};
use crate::node_cache::NodeKey;
use crate::provider::{ParentResolver, TreeElement};
use crate::tree_view::TreeView;
use shared::{RevealOptions, RevealTarget, TreeItemHandle};

impl<E: TreeElement> TreeView<E> {
    /// Reveals `element`, or asks the renderer to reveal the view itself for `None`.
    ///
    /// Provider faults and inconsistent parent chains are logged and abandon
    /// the reveal without an error. A missing parent resolver and renderer
    /// failures are reported.
    pub async fn reveal(&self, element: Option<E>, options: RevealOptions) -> Result<()> {
        let inner = &self.inner;
        inner.core().ensure_live(&inner.view_id)?;
        let Some(resolver) = inner.provider.parent_resolver() else {
            return Err(TreeViewError::MissingParentResolver(inner.view_id.clone()));
        };
        let options = options.clamped();

        let target = match element {
            None => None,
            Some(element) => {
                drop(inner.flush_gate.lock().await);
                match self.resolve_reveal_target(resolver, &element).await {
                    Ok(target) => Some(target),
                    Err(err @ TreeViewError::MalformedReveal(_)) => {
                        log::warn!("tree view '{}': cannot reveal {:?}: {}", inner.view_id, element, err);
                        return Ok(());
                    }
                    Err(err) if err.is_stale_view() => return Err(err),
                    Err(err) => {
                        log::error!("tree view '{}': reveal of {:?} failed: {}", inner.view_id, element, err);
                        return Ok(());
                    }
                }
            }
        };

        inner
            .remote
            .reveal(&inner.view_id, target, options)
            .await
            .map_err(TreeViewError::Remote)
    }

    /// `reveal` addressed by handle, as the renderer does.
    pub async fn reveal_handle(
        &self,
        handle: Option<&TreeItemHandle>,
        options: RevealOptions,
    ) -> Result<()> {
        let element = match handle {
            Some(handle) => Some(
                self.extension_element(handle)
                    .ok_or_else(|| TreeViewError::UnknownHandle(handle.clone()))?,
            ),
            None => None,
        };
        self.reveal(element, options).await
    }

    async fn resolve_reveal_target(
        &self,
        resolver: &dyn ParentResolver<E>,
        element: &E,
    ) -> Result<RevealTarget> {
        // Nearest first while walking up.
        let mut ancestors: Vec<E> = Vec::new();
        let mut current = element.clone();
        loop {
            let parent = match self.cached_parent(&current) {
                Some(parent) => parent,
                None => resolver
                    .get_parent(&current)
                    .await
                    .map_err(TreeViewError::Provider)?,
            };
            let Some(parent) = parent else {
                break;
            };
            if parent == *element || ancestors.contains(&parent) {
                return Err(TreeViewError::MalformedReveal(format!(
                    "{parent:?} appears twice in its own parent chain"
                )));
            }
            ancestors.push(parent.clone());
            current = parent;
        }
        ancestors.reverse();

        let mut parent_key = None;
        let mut parent_chain = Vec::with_capacity(ancestors.len());
        for ancestor in &ancestors {
            let key = self.ensure_cached(parent_key, ancestor).await?;
            parent_chain.push(self.descriptor(key)?);
            parent_key = Some(key);
        }
        let key = self.ensure_cached(parent_key, element).await?;
        Ok(RevealTarget {
            item: self.descriptor(key)?,
            parent_chain,
        })
    }

    /// `Some(parent)` when `element` is cached (`Some(None)` for a root), `None` otherwise.
    fn cached_parent(&self, element: &E) -> Option<Option<E>> {
        let core = self.inner.core();
        let key = core.cache.key_for_element(element)?;
        Some(
            core.cache
                .parent_of(key)
                .and_then(|parent| core.cache.get(parent))
                .map(|node| node.element.clone()),
        )
    }

    /// Makes `element` present under `parent`, fetching the parent's children
    /// when it is not cached there yet.
    async fn ensure_cached(&self, parent: Option<NodeKey>, element: &E) -> Result<NodeKey> {
        let parent_handle = {
            let core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            if let Some(key) = core.cache.key_for_element(element) {
                if core.cache.parent_of(key) == parent {
                    return Ok(key);
                }
            }
            match parent {
                Some(key) => Some(
                    core.cache
                        .get(key)
                        .map(|node| node.item.handle.clone())
                        .ok_or_else(|| {
                            TreeViewError::MalformedReveal("an ancestor was refreshed while revealing".to_string())
                        })?,
                ),
                None => None,
            }
        };

        self.inner.fetch_children(parent_handle.as_deref(), true).await?;

        let core = self.inner.core();
        match core.cache.key_for_element(element) {
            Some(key) if core.cache.parent_of(key) == parent => Ok(key),
            _ => Err(TreeViewError::MalformedReveal(format!(
                "{element:?} is not among the children of {}",
                parent_handle.as_deref().unwrap_or("the root")
            ))),
        }
    }

    fn descriptor(&self, key: NodeKey) -> Result<shared::ItemDescriptor> {
        self.inner
            .core()
            .cache
            .get(key)
            .map(|node| node.item.clone())
            .ok_or_else(|| TreeViewError::MalformedReveal("node disappeared while revealing".to_string()))
    }
}
