//! Drag and drop bridge.
//!
//! A drag started in this view registers its in-flight transfer under the
//! renderer's operation id. A drop into the same view consumes that entry so
//! the drag source runs once per operation. The renderer drags one thing at a
//! time, so only the latest drag is kept; starting a new one evicts it.

use crate::data_transfer::{DataTransfer, FileDataSource};
use crate::error::{Result, TreeViewError};
use crate::provider::{TreeDataProvider, TreeElement};
use crate::remote::TreeViewsRemote;
use crate::tree_view::TreeView;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use shared::{DataTransferDto, TreeItemHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type PendingTransfer = Shared<BoxFuture<'static, std::result::Result<DataTransfer, String>>>;

/// The most recent drag transfer and its operation id.
#[derive(Default)]
pub(crate) struct DragRegistry {
    latest: Option<(String, PendingTransfer)>,
}

impl DragRegistry {
    fn insert(&mut self, operation_id: String, transfer: PendingTransfer) {
        if let Some((previous, _)) = self.latest.replace((operation_id, transfer)) {
            log::trace!("drag operation {} evicted", previous);
        }
    }

    fn take(&mut self, operation_id: &str) -> Option<PendingTransfer> {
        match &self.latest {
            Some((id, _)) if id == operation_id => self.latest.take().map(|(_, transfer)| transfer),
            _ => None,
        }
    }

    fn remove(&mut self, operation_id: &str) {
        self.take(operation_id);
    }

    pub(crate) fn len(&self) -> usize {
        usize::from(self.latest.is_some())
    }

    pub(crate) fn clear(&mut self) {
        self.latest = None;
    }
}

/// Drop request as received from the renderer.
#[derive(Debug, Clone, Default)]
pub struct DropRequest {
    pub request_id: u64,
    pub transfer: DataTransferDto,
    pub target_handle: Option<TreeItemHandle>,
    pub operation_id: Option<String>,
    pub source_view_id: Option<String>,
    pub source_handles: Option<Vec<TreeItemHandle>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Handled,
    /// The provider does not accept drops.
    NoController,
    /// The target handle no longer resolves.
    UnknownTarget,
}

/// Fetches dropped file bytes from the renderer on first access.
struct RemoteFileData {
    remote: Arc<dyn TreeViewsRemote>,
    view_id: String,
    request_id: u64,
}

#[async_trait]
impl FileDataSource for RemoteFileData {
    async fn fetch(&self, item_id: &str) -> anyhow::Result<Vec<u8>> {
        self.remote
            .resolve_drop_file_data(&self.view_id, self.request_id, item_id)
            .await
    }
}

fn start_drag<E: TreeElement>(
    provider: Arc<dyn TreeDataProvider<Element = E>>,
    elements: Vec<E>,
    token: CancellationToken,
) -> PendingTransfer {
    async move {
        let mut transfer = DataTransfer::new();
        if let Some(source) = provider.drag_source() {
            source
                .handle_drag(&elements, &mut transfer, token)
                .await
                .map_err(|err| format!("{err:#}"))?;
        }
        Ok(transfer)
    }
    .boxed()
    .shared()
}

impl<E: TreeElement> TreeView<E> {
    /// Runs the drag source for `source_handles` and returns what the
    /// renderer should carry. `Ok(None)` when there is nothing to drag or the
    /// operation was cancelled.
    pub async fn handle_drag(
        &self,
        source_handles: &[TreeItemHandle],
        operation_id: &str,
        token: CancellationToken,
    ) -> Result<Option<DataTransferDto>> {
        let elements = self.extension_elements(source_handles)?;
        if token.is_cancelled()
            || elements.is_empty()
            || self.inner.provider.drag_source().is_none()
        {
            return Ok(None);
        }

        let pending = start_drag(self.inner.provider.clone(), elements, token.clone());
        self.inner
            .core()
            .drags
            .insert(operation_id.to_string(), pending.clone());

        let transfer = pending.await;
        if transfer.is_err() || token.is_cancelled() {
            self.inner.core().drags.remove(operation_id);
        }
        let transfer = transfer.map_err(TreeViewError::Drag)?;
        if token.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(transfer.to_dto()))
    }

    /// Delivers a drop to the provider. Items of a drag that started in this
    /// view are merged in before the provider sees the transfer.
    pub async fn handle_drop(
        &self,
        request: DropRequest,
        token: CancellationToken,
    ) -> Result<DropOutcome> {
        self.inner.core().ensure_live(&self.inner.view_id)?;
        let Some(target) = self.inner.provider.drop_target() else {
            return Ok(DropOutcome::NoController);
        };
        let element = match &request.target_handle {
            Some(handle) => match self.extension_element(handle) {
                Some(element) => Some(element),
                None => {
                    log::debug!("tree view '{}': drop onto stale handle {}", self.inner.view_id, handle);
                    return Ok(DropOutcome::UnknownTarget);
                }
            },
            None => None,
        };

        let files = Arc::new(RemoteFileData {
            remote: self.inner.remote.clone(),
            view_id: self.inner.view_id.clone(),
            request_id: request.request_id,
        });
        let mut transfer = DataTransfer::from_dto(request.transfer, files);

        let same_view = request.source_view_id.as_deref() == Some(self.inner.view_id.as_str());
        if let (true, Some(source_handles)) = (same_view, &request.source_handles) {
            self.add_source_items(
                &mut transfer,
                source_handles,
                request.operation_id.as_deref(),
                token.clone(),
            )
            .await?;
        }

        target
            .handle_drop(element.as_ref(), &transfer, token)
            .await
            .map_err(TreeViewError::Drop)?;
        Ok(DropOutcome::Handled)
    }

    async fn add_source_items(
        &self,
        transfer: &mut DataTransfer,
        source_handles: &[TreeItemHandle],
        operation_id: Option<&str>,
        token: CancellationToken,
    ) -> Result<()> {
        let registered = operation_id.and_then(|id| self.inner.core().drags.take(id));
        let extra = match registered {
            Some(pending) => pending.await.map_err(TreeViewError::Drag)?,
            None => {
                let elements = self.extension_elements(source_handles)?;
                if elements.is_empty() {
                    return Ok(());
                }
                start_drag(self.inner.provider.clone(), elements, token)
                    .await
                    .map_err(TreeViewError::Drag)?
            }
        };
        transfer.merge(extra);
        Ok(())
    }

    /// Number of drags still waiting for a drop.
    pub fn pending_drags(&self) -> usize {
        self.inner.core().drags.len()
    }
}
