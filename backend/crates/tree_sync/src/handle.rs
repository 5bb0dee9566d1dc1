//! Handle allocation.
//!
//! Items with a declared id get `1/<id>`. Everything else is keyed by label
//! (or resource basename) under its parent's handle, `<parent>/<n>:<label>`,
//! where `n` is the first suffix not owned by a live node.

use crate::node_cache::{NodeCache, NodeKey};
use crate::provider::{TreeElement, TreeItem};
use shared::{TreeItemHandle, uri_basename};

pub const ID_HANDLE_PREFIX: &str = "1";
pub const LABEL_HANDLE_PREFIX: &str = "0";

/// Computes the handle `element` gets under `parent`. Does not register anything.
pub fn allocate_handle<E: TreeElement>(
    cache: &NodeCache<E>,
    element: &E,
    item: &TreeItem,
    parent: Option<NodeKey>,
) -> TreeItemHandle {
    if let Some(id) = &item.id {
        return format!("{ID_HANDLE_PREFIX}/{id}");
    }

    // Same element under the same parent keeps whatever handle it already has.
    if let Some(existing) = cache.node_for_element(element) {
        if existing.parent == parent {
            return existing.item.handle.clone();
        }
    }

    let prefix = parent
        .and_then(|key| cache.get(key))
        .map_or(LABEL_HANDLE_PREFIX, |node| node.handle());
    let key = escape_segment(label_key(item));

    (0usize..)
        .map(|counter| format!("{prefix}/{counter}:{key}"))
        .find(|candidate| !cache.contains_handle(candidate))
        .unwrap_or_default()
}

fn label_key(item: &TreeItem) -> &str {
    item.label
        .as_deref()
        .or_else(|| item.resource_uri.as_deref().and_then(uri_basename))
        .unwrap_or("")
}

/// Doubles every `/` so a label can never be mistaken for a path separator.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('/', "//")
}
