//! View state mirrored from the renderer (selection, focus, visibility,
//! checkboxes, expansion) and view metadata pushed to it (message, title,
//! description, badge).
//!
//! Every setter compares against the stored value first. Events and remote
//! calls only happen on an actual change.

use crate::error::{Result, TreeViewError};
use crate::provider::{CheckboxState, TreeElement};
use crate::refresh::RefreshSignal;
use crate::tree_view::{TreeView, TreeViewEvent};
use indexmap::IndexSet;
use shared::{CheckboxDescriptor, CheckboxUpdate, CollapsibleState, TreeItemHandle, ViewBadge};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionDelta {
    pub selection_changed: bool,
    pub focus_changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    visible: bool,
    selected: IndexSet<TreeItemHandle>,
    focused: Option<TreeItemHandle>,
    message: String,
    title: String,
    description: Option<String>,
    badge: Option<ViewBadge>,
}

impl ViewState {
    /// Selection is compared in order: the same handles in a different order count as a change.
    pub fn set_selection(
        &mut self,
        selected: IndexSet<TreeItemHandle>,
        focused: Option<TreeItemHandle>,
    ) -> SelectionDelta {
        let delta = SelectionDelta {
            selection_changed: !self.selected.iter().eq(selected.iter()),
            focus_changed: self.focused != focused,
        };
        self.selected = selected;
        self.focused = focused;
        delta
    }

    pub fn set_visible(&mut self, visible: bool) -> bool {
        std::mem::replace(&mut self.visible, visible) != visible
    }

    pub fn set_message(&mut self, message: String) -> bool {
        replace_if_changed(&mut self.message, message)
    }

    pub fn set_title(&mut self, title: String) -> bool {
        replace_if_changed(&mut self.title, title)
    }

    pub fn set_description(&mut self, description: Option<String>) -> bool {
        replace_if_changed(&mut self.description, description)
    }

    pub fn set_badge(&mut self, badge: Option<ViewBadge>) -> bool {
        replace_if_changed(&mut self.badge, badge)
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn badge(&self) -> Option<&ViewBadge> {
        self.badge.as_ref()
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl<E: TreeElement> TreeView<E> {
    /// Applies the renderer's selection and focus. Handles that no longer
    /// resolve are dropped; with single selection only the first survivor is kept.
    pub fn set_selection_and_focus(
        &self,
        selected_handles: Vec<TreeItemHandle>,
        focused_handle: Option<TreeItemHandle>,
    ) -> Result<()> {
        let inner = &self.inner;
        let (delta, selection, active) = {
            let mut core = inner.core();
            core.ensure_live(&inner.view_id)?;
            let mut selected: IndexSet<TreeItemHandle> = selected_handles
                .into_iter()
                .filter(|handle| core.cache.contains_handle(handle))
                .collect();
            if !inner.options.can_select_many {
                selected.truncate(1);
            }
            let focused = focused_handle.filter(|handle| core.cache.contains_handle(handle));
            let delta = core.state.set_selection(selected, focused);
            let selection: Vec<E> = core
                .state
                .selected()
                .filter_map(|handle| core.cache.element(handle).cloned())
                .collect();
            let active = core
                .state
                .focused()
                .and_then(|handle| core.cache.element(handle).cloned());
            (delta, selection, active)
        };

        if delta.selection_changed {
            inner.emit(TreeViewEvent::SelectionChanged { selection });
        }
        if delta.focus_changed {
            inner.emit(TreeViewEvent::ActiveItemChanged { active });
        }
        Ok(())
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        let changed = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            core.state.set_visible(visible)
        };
        if changed {
            self.inner.emit(TreeViewEvent::VisibilityChanged { visible });
        }
        Ok(())
    }

    /// Records an expand or collapse from the renderer. Unknown handles are ignored.
    pub fn set_expanded(&self, handle: &str, expanded: bool) -> Result<()> {
        let element = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            let Some(node) = core
                .cache
                .key_for_handle(handle)
                .and_then(|key| core.cache.get_mut(key))
            else {
                return Ok(());
            };
            let state = if expanded {
                CollapsibleState::Expanded
            } else {
                CollapsibleState::Collapsed
            };
            node.item.collapsible_state = state;
            node.tree_item.collapsible_state = state;
            node.element.clone()
        };

        self.inner.emit(if expanded {
            TreeViewEvent::ElementExpanded { element }
        } else {
            TreeViewEvent::ElementCollapsed { element }
        });
        Ok(())
    }

    /// Updates cached checkbox state and emits one event for the whole batch.
    pub fn set_checkbox_state(&self, updates: Vec<CheckboxUpdate>) -> Result<()> {
        let items = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            let mut items = Vec::with_capacity(updates.len());
            for update in updates {
                let Some(key) = core.cache.key_for_handle(&update.handle) else {
                    continue;
                };
                let Some(node) = core.cache.get_mut(key) else {
                    continue;
                };
                node.item
                    .checkbox
                    .get_or_insert_with(CheckboxDescriptor::default)
                    .is_checked = update.is_checked;
                node.tree_item
                    .checkbox
                    .get_or_insert_with(CheckboxDescriptor::default)
                    .is_checked = update.is_checked;
                items.push((node.element.clone(), CheckboxState::from(update.is_checked)));
            }
            items
        };

        if !items.is_empty() {
            self.inner.emit(TreeViewEvent::CheckboxStateChanged { items });
        }
        Ok(())
    }

    /// Stores the message; it reaches the renderer with the next debounced flush.
    pub fn set_message(&self, message: impl Into<String>) -> Result<()> {
        let changed = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            core.state.set_message(message.into())
        };
        if changed {
            self.inner.signal(RefreshSignal::Message);
        }
        Ok(())
    }

    pub async fn set_title(&self, title: impl Into<String>) -> Result<()> {
        let pushed = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            core.state
                .set_title(title.into())
                .then(|| (core.state.title().to_string(), core.state.description().map(str::to_string)))
        };
        self.push_title(pushed).await
    }

    pub async fn set_description(&self, description: Option<String>) -> Result<()> {
        let pushed = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            core.state
                .set_description(description)
                .then(|| (core.state.title().to_string(), core.state.description().map(str::to_string)))
        };
        self.push_title(pushed).await
    }

    async fn push_title(&self, pushed: Option<(String, Option<String>)>) -> Result<()> {
        let Some((title, description)) = pushed else {
            return Ok(());
        };
        self.inner
            .remote
            .set_title(&self.inner.view_id, &title, description.as_deref())
            .await
            .map_err(TreeViewError::Remote)
    }

    pub async fn set_badge(&self, badge: Option<ViewBadge>) -> Result<()> {
        let changed = {
            let mut core = self.inner.core();
            core.ensure_live(&self.inner.view_id)?;
            core.state.set_badge(badge.clone())
        };
        if !changed {
            return Ok(());
        }
        self.inner
            .remote
            .set_badge(&self.inner.view_id, badge.as_ref())
            .await
            .map_err(TreeViewError::Remote)
    }

    pub fn visible(&self) -> bool {
        self.inner.core().state.visible()
    }

    /// Selected elements in selection order.
    pub fn selection(&self) -> Vec<E> {
        let core = self.inner.core();
        core.state
            .selected()
            .filter_map(|handle| core.cache.element(handle).cloned())
            .collect()
    }

    pub fn active_element(&self) -> Option<E> {
        let core = self.inner.core();
        core.state
            .focused()
            .and_then(|handle| core.cache.element(handle).cloned())
    }

    pub fn message(&self) -> String {
        self.inner.core().state.message().to_string()
    }

    pub fn title(&self) -> String {
        self.inner.core().state.title().to_string()
    }

    pub fn description(&self) -> Option<String> {
        self.inner.core().state.description().map(str::to_string)
    }

    pub fn badge(&self) -> Option<ViewBadge> {
        self.inner.core().state.badge().cloned()
    }
}
