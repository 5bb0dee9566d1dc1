//! Per-view index of resolved tree nodes.
//!
//! Nodes live in a generational arena. `element -> key` and `handle -> key`
//! stay bijective for every live node, and a key held across an await is
//! detectably stale once its node has been removed.

use crate::error::{Result, TreeViewError};
use crate::provider::{TreeElement, TreeItem};
use shared::{ItemDescriptor, TreeItemHandle};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

new_key_type! {
    pub struct NodeKey;
}

#[derive(Debug, Clone)]
struct ChildList {
    keys: Vec<NodeKey>,
    /// Trust generation at the time the list was fetched.
    generation: u64,
}

#[derive(Debug)]
pub struct TreeNode<E> {
    pub element: E,
    /// Item as the provider declared it; source for lazy resolution.
    pub tree_item: TreeItem,
    /// Snapshot sent to the renderer.
    pub item: ItemDescriptor,
    /// Non-owning link to the node this one was spliced under.
    pub parent: Option<NodeKey>,
    children: Option<ChildList>,
}

impl<E> TreeNode<E> {
    pub fn handle(&self) -> &str {
        &self.item.handle
    }
}

#[derive(Debug)]
pub struct NodeCache<E: TreeElement> {
    nodes: SlotMap<NodeKey, TreeNode<E>>,
    by_element: HashMap<E, NodeKey>,
    by_handle: HashMap<TreeItemHandle, NodeKey>,
    roots: Option<ChildList>,
    /// Bumped by `clear_all`; fetches started under an older epoch are discarded.
    epoch: u64,
    /// Bumped by `mark_untrusted`; child lists from older generations are re-fetched.
    generation: u64,
}

impl<E: TreeElement> Default for NodeCache<E> {
    fn default() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            by_element: HashMap::new(),
            by_handle: HashMap::new(),
            roots: None,
            epoch: 0,
            generation: 0,
        }
    }
}

impl<E: TreeElement> NodeCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, key: NodeKey) -> Option<&TreeNode<E>> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut TreeNode<E>> {
        self.nodes.get_mut(key)
    }

    pub fn key_for_handle(&self, handle: &str) -> Option<NodeKey> {
        self.by_handle.get(handle).copied()
    }

    pub fn key_for_element(&self, element: &E) -> Option<NodeKey> {
        self.by_element.get(element).copied()
    }

    pub fn contains_handle(&self, handle: &str) -> bool {
        self.by_handle.contains_key(handle)
    }

    pub fn element(&self, handle: &str) -> Option<&E> {
        self.key_for_handle(handle)
            .and_then(|key| self.nodes.get(key))
            .map(|node| &node.element)
    }

    pub fn node_for_element(&self, element: &E) -> Option<&TreeNode<E>> {
        self.key_for_element(element).and_then(|key| self.nodes.get(key))
    }

    pub fn parent_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|node| node.parent)
    }

    /// Strict ancestors of `key`, nearest first.
    pub fn ancestors(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        std::iter::successors(self.parent_of(key), move |current| self.parent_of(*current))
    }

    /// Cached child list of `parent` (roots for `None`), if fetched and still trusted.
    pub fn children(&self, parent: Option<NodeKey>) -> Option<&[NodeKey]> {
        self.child_list(parent)
            .filter(|list| list.generation == self.generation)
            .map(|list| list.keys.as_slice())
    }

    pub fn descriptors(&self, keys: &[NodeKey]) -> Vec<ItemDescriptor> {
        keys.iter()
            .filter_map(|key| self.nodes.get(*key))
            .map(|node| node.item.clone())
            .collect()
    }

    /// Drops the current child list of `parent` and starts an empty one that
    /// `register` appends to. Returns `false` if `parent` is no longer cached.
    pub fn begin_children(&mut self, parent: Option<NodeKey>) -> bool {
        if parent.is_some_and(|key| !self.nodes.contains_key(key)) {
            return false;
        }
        self.clear_children(parent);
        let list = Some(ChildList {
            keys: Vec::new(),
            generation: self.generation,
        });
        match parent {
            None => self.roots = list,
            Some(key) => {
                if let Some(node) = self.nodes.get_mut(key) {
                    node.children = list;
                }
            }
        }
        true
    }

    /// Appends a new node to the child list opened by `begin_children`.
    pub fn register(
        &mut self,
        parent: Option<NodeKey>,
        element: E,
        tree_item: TreeItem,
        handle: TreeItemHandle,
    ) -> Result<NodeKey> {
        if let Some(owner) = self.key_for_handle(&handle) {
            let same_element = self.nodes.get(owner).is_some_and(|node| node.element == element);
            if !same_element {
                return Err(TreeViewError::DuplicateId {
                    id: tree_item.id.unwrap_or(handle),
                });
            }
        }
        if let Some(previous) = self.key_for_element(&element) {
            log::warn!("element {:?} was already cached, replacing its old node", element);
            self.remove(previous);
        }

        let parent_handle = parent
            .and_then(|key| self.nodes.get(key))
            .map(|node| node.item.handle.clone());
        let item = tree_item.to_descriptor(handle.clone(), parent_handle);
        let key = self.nodes.insert(TreeNode {
            element: element.clone(),
            tree_item,
            item,
            parent,
            children: None,
        });
        self.by_element.insert(element, key);
        self.by_handle.insert(handle, key);

        let generation = self.generation;
        let list = match parent {
            None => &mut self.roots,
            Some(parent_key) => match self.nodes.get_mut(parent_key) {
                Some(node) => &mut node.children,
                None => return Ok(key),
            },
        };
        list.get_or_insert_with(|| ChildList {
            keys: Vec::new(),
            generation,
        })
        .keys
        .push(key);
        Ok(key)
    }

    /// Builds a fresh node for the element at `old`, keeps its slot in the
    /// parent's child list and disposes the old node with its whole subtree.
    pub fn replace(
        &mut self,
        old: NodeKey,
        tree_item: TreeItem,
        handle: TreeItemHandle,
    ) -> Result<NodeKey> {
        let Some(existing) = self.nodes.get(old) else {
            return Err(TreeViewError::UnknownHandle(handle));
        };
        if self.key_for_handle(&handle).is_some_and(|owner| owner != old) {
            return Err(TreeViewError::DuplicateId {
                id: tree_item.id.unwrap_or(handle),
            });
        }
        let parent = existing.parent;
        let parent_handle = existing.item.parent_handle.clone();

        self.clear_children(Some(old));
        let Some(existing) = self.nodes.remove(old) else {
            return Err(TreeViewError::UnknownHandle(handle));
        };
        self.by_handle.remove(&existing.item.handle);
        log::trace!("disposed node {}", existing.item.handle);

        let item = tree_item.to_descriptor(handle.clone(), parent_handle);
        let key = self.nodes.insert(TreeNode {
            element: existing.element.clone(),
            tree_item,
            item,
            parent,
            children: None,
        });
        self.by_element.insert(existing.element, key);
        self.by_handle.insert(handle, key);

        if let Some(list) = self.child_list_mut(parent) {
            if let Some(slot) = list.keys.iter_mut().find(|slot| **slot == old) {
                *slot = key;
            }
        }
        Ok(key)
    }

    /// Forgets the children of `parent` (the roots for `None`) and all their descendants.
    pub fn clear_children(&mut self, parent: Option<NodeKey>) {
        let list = match parent {
            None => self.roots.take(),
            Some(key) => self.nodes.get_mut(key).and_then(|node| node.children.take()),
        };
        if let Some(list) = list {
            for child in list.keys {
                self.remove_subtree(child);
            }
        }
    }

    /// Removes `key` and its descendants, and unlinks it from its parent's list.
    pub fn remove(&mut self, key: NodeKey) {
        let parent = self.parent_of(key);
        if let Some(list) = self.child_list_mut(parent) {
            list.keys.retain(|child| *child != key);
        }
        self.remove_subtree(key);
    }

    /// Disposes every node. In-flight fetches observe the epoch change and discard their results.
    pub fn clear_all(&mut self) {
        let disposed = self.nodes.len();
        self.nodes.clear();
        self.by_element.clear();
        self.by_handle.clear();
        self.roots = None;
        self.epoch += 1;
        log::trace!("cleared node cache ({} node(s) disposed)", disposed);
    }

    /// Cached child lists stop answering `children` until re-fetched.
    pub fn mark_untrusted(&mut self) {
        self.generation += 1;
    }

    fn remove_subtree(&mut self, key: NodeKey) {
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let Some(node) = self.nodes.remove(key) else {
                continue;
            };
            if let Some(children) = node.children {
                pending.extend(children.keys);
            }
            if self.by_handle.get(&node.item.handle) == Some(&key) {
                self.by_handle.remove(&node.item.handle);
            }
            if self.by_element.get(&node.element) == Some(&key) {
                self.by_element.remove(&node.element);
            }
            log::trace!("disposed node {}", node.item.handle);
        }
    }

    fn child_list(&self, parent: Option<NodeKey>) -> Option<&ChildList> {
        match parent {
            None => self.roots.as_ref(),
            Some(key) => self.nodes.get(key).and_then(|node| node.children.as_ref()),
        }
    }

    fn child_list_mut(&mut self, parent: Option<NodeKey>) -> Option<&mut ChildList> {
        match parent {
            None => self.roots.as_mut(),
            Some(key) => self.nodes.get_mut(key).and_then(|node| node.children.as_mut()),
        }
    }
}
