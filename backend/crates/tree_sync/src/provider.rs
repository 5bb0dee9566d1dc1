//! Provider capability surface consumed by a tree view.
//!
//! `TreeDataProvider` is required. Parent resolution, lazy item resolution and
//! drag and drop are optional capabilities, exposed through accessor methods so
//! a view checks for them without knowing the concrete provider type.

use crate::data_transfer::DataTransfer;
use async_trait::async_trait;
use shared::{
    AccessibilityInformation, CheckboxDescriptor, CollapsibleState, CommandDescriptor,
    ItemDescriptor, ThemeIcon, TreeItemHandle,
};
use std::fmt::Debug;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

/// Host data-model element. Identity is `Eq + Hash`; hosts whose objects only
/// have reference identity wrap them in a pointer-comparing newtype.
pub trait TreeElement: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> TreeElement for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Item as declared by the provider, before a handle is assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeItem {
    /// Declared identity. When present the handle is derived from it alone.
    pub id: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub resource_uri: Option<String>,
    pub tooltip: Option<String>,
    pub command: Option<CommandDescriptor>,
    pub context_value: Option<String>,
    pub icon: Option<String>,
    pub icon_dark: Option<String>,
    pub theme_icon: Option<ThemeIcon>,
    pub collapsible_state: CollapsibleState,
    pub accessibility_information: Option<AccessibilityInformation>,
    pub checkbox: Option<CheckboxDescriptor>,
}

impl TreeItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn from_resource(resource_uri: impl Into<String>) -> Self {
        Self {
            resource_uri: Some(resource_uri.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_collapsible_state(mut self, state: CollapsibleState) -> Self {
        self.collapsible_state = state;
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn with_checkbox(mut self, is_checked: bool) -> Self {
        self.checkbox = Some(CheckboxDescriptor {
            is_checked,
            ..Default::default()
        });
        self
    }

    /// Snapshot sent to the renderer once the item has a handle.
    pub fn to_descriptor(
        &self,
        handle: TreeItemHandle,
        parent_handle: Option<TreeItemHandle>,
    ) -> ItemDescriptor {
        ItemDescriptor {
            handle,
            parent_handle,
            label: self.label.clone(),
            description: self.description.clone(),
            resource_uri: self.resource_uri.clone(),
            tooltip: self.tooltip.clone(),
            command: self.command.clone(),
            context_value: self.context_value.clone(),
            icon: self.icon.clone(),
            icon_dark: self.icon_dark.clone(),
            theme_icon: self.theme_icon.clone(),
            collapsible_state: self.collapsible_state,
            accessibility_information: self.accessibility_information.clone(),
            checkbox: self.checkbox.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckboxState {
    Unchecked,
    Checked,
}

impl From<bool> for CheckboxState {
    fn from(is_checked: bool) -> Self {
        if is_checked {
            CheckboxState::Checked
        } else {
            CheckboxState::Unchecked
        }
    }
}

#[async_trait]
pub trait TreeDataProvider: Send + Sync + 'static {
    type Element: TreeElement;

    /// Children of `element`, or the roots when `element` is `None`.
    async fn get_children(
        &self,
        element: Option<&Self::Element>,
    ) -> anyhow::Result<Option<Vec<Self::Element>>>;

    /// `Ok(None)` drops the element from the rendered tree.
    async fn get_tree_item(&self, element: &Self::Element) -> anyhow::Result<Option<TreeItem>>;

    fn parent_resolver(&self) -> Option<&dyn ParentResolver<Self::Element>> {
        None
    }

    fn item_resolver(&self) -> Option<&dyn ItemResolver<Self::Element>> {
        None
    }

    fn drag_source(&self) -> Option<&dyn DragSource<Self::Element>> {
        None
    }

    fn drop_target(&self) -> Option<&dyn DropTarget<Self::Element>> {
        None
    }
}

/// Needed for `reveal`.
#[async_trait]
pub trait ParentResolver<E>: Send + Sync {
    async fn get_parent(&self, element: &E) -> anyhow::Result<Option<E>>;
}

/// Fills in the resolvable fields (tooltip, command) on demand.
#[async_trait]
pub trait ItemResolver<E>: Send + Sync {
    async fn resolve_tree_item(
        &self,
        item: TreeItem,
        element: &E,
        token: CancellationToken,
    ) -> anyhow::Result<Option<TreeItem>>;
}

#[async_trait]
pub trait DragSource<E>: Send + Sync {
    async fn handle_drag(
        &self,
        source: &[E],
        transfer: &mut DataTransfer,
        token: CancellationToken,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DropTarget<E>: Send + Sync {
    /// `target` is `None` when dropping onto the tree root.
    async fn handle_drop(
        &self,
        target: Option<&E>,
        transfer: &DataTransfer,
        token: CancellationToken,
    ) -> anyhow::Result<()>;
}
