//! Error types for tree view synchronization.

use thiserror::Error;

/// Result type alias for tree view operations.
pub type Result<T, E = TreeViewError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum TreeViewError {
    /// The view was disposed or never registered. Callers drop their local state.
    #[error("tree view '{0}' is not registered")]
    StaleView(String),

    #[error("no tree item with handle '{0}' found")]
    UnknownHandle(String),

    /// A provider hook failed while resolving children, items or parents.
    #[error("tree data provider failed: {0:#}")]
    Provider(#[source] anyhow::Error),

    /// The host model declared the same id for two live elements.
    #[error("element with id '{id}' is already registered")]
    DuplicateId { id: String },

    /// An ancestor step does not contain the child it claims to.
    #[error("cannot reveal element: {0}")]
    MalformedReveal(String),

    #[error("tree view '{0}' needs a provider that resolves parents to reveal elements")]
    MissingParentResolver(String),

    #[error("drag controller failed: {0}")]
    Drag(String),

    #[error("drop controller failed: {0:#}")]
    Drop(#[source] anyhow::Error),

    #[error("remote tree view call failed: {0:#}")]
    Remote(#[source] anyhow::Error),
}

impl TreeViewError {
    /// Whether the caller should discard its state for the view instead of retrying.
    pub fn is_stale_view(&self) -> bool {
        matches!(self, TreeViewError::StaleView(_))
    }
}
