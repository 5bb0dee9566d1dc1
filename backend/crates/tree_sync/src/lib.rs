//! Host-side tree view synchronization.
//!
//! A [`TreeView`] mirrors a provider-owned tree into a remote renderer. It
//! hands out stable string handles for provider elements, caches resolved
//! nodes, coalesces change notifications into debounced refreshes, resolves
//! ancestor chains for reveal, mirrors selection and focus state, and bridges
//! drag and drop payloads in both directions.

mod data_transfer;
mod drag_drop;
mod error;
mod handle;
mod node_cache;
mod provider;
mod refresh;
mod remote;
mod reveal;
mod state_sync;
mod tree_view;

#[cfg(test)]
mod testing;

pub use data_transfer::{DataTransfer, DataTransferFile, DataTransferItem, FileDataSource};
pub use drag_drop::{DropOutcome, DropRequest};
pub use error::{Result, TreeViewError};
pub use handle::{ID_HANDLE_PREFIX, LABEL_HANDLE_PREFIX, allocate_handle, escape_segment};
pub use node_cache::{NodeCache, NodeKey, TreeNode};
pub use provider::{
    CheckboxState, DragSource, DropTarget, ItemResolver, ParentResolver, TreeDataProvider,
    TreeElement, TreeItem,
};
pub use refresh::{
    Change, ChangeNotifier, PendingBatch, RefreshPhase, RefreshSignal, handles_to_refresh, merge,
};
pub use remote::TreeViewsRemote;
pub use state_sync::{SelectionDelta, ViewState};
pub use tree_view::{TreeView, TreeViewEvent, TreeViewOptions};

// Tokio-util's token is part of the public signatures.
pub use tokio_util::sync::CancellationToken;
