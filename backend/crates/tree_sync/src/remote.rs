use async_trait::async_trait;
use shared::{ItemDescriptor, RevealOptions, RevealTarget, TreeItemHandle, ViewBadge};
use std::collections::BTreeMap;

/// Outbound surface of the renderer that displays the trees.
#[async_trait]
pub trait TreeViewsRemote: Send + Sync + 'static {
    /// `items: None` invalidates the whole tree; the renderer re-fetches the root.
    async fn refresh(
        &self,
        view_id: &str,
        items: Option<BTreeMap<TreeItemHandle, ItemDescriptor>>,
    ) -> anyhow::Result<()>;

    async fn reveal(
        &self,
        view_id: &str,
        target: Option<RevealTarget>,
        options: RevealOptions,
    ) -> anyhow::Result<()>;

    async fn set_message(&self, view_id: &str, message: &str) -> anyhow::Result<()>;

    async fn set_title(
        &self,
        view_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn set_badge(&self, view_id: &str, badge: Option<&ViewBadge>) -> anyhow::Result<()>;

    async fn dispose_tree(&self, view_id: &str) -> anyhow::Result<()>;

    /// Bytes of one file entry of the drop identified by `request_id`.
    async fn resolve_drop_file_data(
        &self,
        view_id: &str,
        request_id: u64,
        item_id: &str,
    ) -> anyhow::Result<Vec<u8>>;
}
