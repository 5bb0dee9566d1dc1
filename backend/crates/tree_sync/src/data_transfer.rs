//! Drag and drop payloads.
//!
//! File entries received from the renderer do not carry their bytes. Each one
//! fetches them on first access through a `FileDataSource` and caches the result.

use async_trait::async_trait;
use indexmap::IndexMap;
use shared::{DataTransferDto, DataTransferFileDto, DataTransferItemDto};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;

static NEXT_HOST_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Resolves the bytes of a file entry by its transfer item id.
#[async_trait]
pub trait FileDataSource: Send + Sync {
    async fn fetch(&self, item_id: &str) -> anyhow::Result<Vec<u8>>;
}

enum FileData {
    Ready(Arc<[u8]>),
    Lazy {
        cell: OnceCell<Arc<[u8]>>,
        source: Arc<dyn FileDataSource>,
    },
}

#[derive(Clone)]
pub struct DataTransferFile {
    id: String,
    name: String,
    uri: Option<String>,
    data: Arc<FileData>,
}

impl DataTransferFile {
    /// File whose bytes are already held by the host.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let id = format!("host-{}", NEXT_HOST_FILE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            name: name.into(),
            uri: None,
            data: Arc::new(FileData::Ready(bytes.into())),
        }
    }

    fn lazy(dto: DataTransferFileDto, source: Arc<dyn FileDataSource>) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            uri: dto.uri,
            data: Arc::new(FileData::Lazy {
                cell: OnceCell::new(),
                source,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Whether the bytes are available without a round trip.
    pub fn is_resolved(&self) -> bool {
        match self.data.as_ref() {
            FileData::Ready(_) => true,
            FileData::Lazy { cell, .. } => cell.initialized(),
        }
    }

    pub async fn data(&self) -> anyhow::Result<Arc<[u8]>> {
        match self.data.as_ref() {
            FileData::Ready(bytes) => Ok(bytes.clone()),
            FileData::Lazy { cell, source } => {
                let bytes = cell
                    .get_or_try_init(|| async {
                        let bytes = source.fetch(&self.id).await?;
                        log::trace!("fetched {} byte(s) for transfer item {}", bytes.len(), self.id);
                        Ok::<_, anyhow::Error>(Arc::<[u8]>::from(bytes))
                    })
                    .await?;
                Ok(bytes.clone())
            }
        }
    }
}

impl fmt::Debug for DataTransferFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTransferFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum DataTransferItem {
    Text(String),
    File(DataTransferFile),
}

impl DataTransferItem {
    pub fn as_string(&self) -> &str {
        match self {
            DataTransferItem::Text(text) => text,
            DataTransferItem::File(_) => "",
        }
    }

    pub fn as_file(&self) -> Option<&DataTransferFile> {
        match self {
            DataTransferItem::File(file) => Some(file),
            DataTransferItem::Text(_) => None,
        }
    }
}

/// Ordered mime type -> items map. Mime types are compared case-insensitively.
/// A mime type may carry several items, e.g. one `files` entry per dropped file.
#[derive(Debug, Clone, Default)]
pub struct DataTransfer {
    items: IndexMap<String, Vec<DataTransferItem>>,
}

impl DataTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dto(dto: DataTransferDto, source: Arc<dyn FileDataSource>) -> Self {
        let mut transfer = Self::new();
        for item in dto.items {
            let value = match item.file {
                Some(file) => DataTransferItem::File(DataTransferFile::lazy(file, source.clone())),
                None => DataTransferItem::Text(item.as_string),
            };
            transfer.append(item.mime_type, value);
        }
        transfer
    }

    pub fn to_dto(&self) -> DataTransferDto {
        DataTransferDto {
            items: self
                .iter()
                .map(|(mime_type, item)| DataTransferItemDto {
                    mime_type: mime_type.to_string(),
                    as_string: item.as_string().to_string(),
                    file: item.as_file().map(|file| DataTransferFileDto {
                        id: file.id.clone(),
                        name: file.name.clone(),
                        uri: file.uri.clone(),
                    }),
                })
                .collect(),
        }
    }

    /// Replaces everything held for `mime_type` with `item`.
    pub fn set(&mut self, mime_type: impl AsRef<str>, item: DataTransferItem) {
        self.items.insert(mime_type.as_ref().to_lowercase(), vec![item]);
    }

    /// Adds `item` after whatever `mime_type` already holds.
    pub fn append(&mut self, mime_type: impl AsRef<str>, item: DataTransferItem) {
        self.items
            .entry(mime_type.as_ref().to_lowercase())
            .or_default()
            .push(item);
    }

    pub fn set_text(&mut self, mime_type: impl AsRef<str>, text: impl Into<String>) {
        self.set(mime_type, DataTransferItem::Text(text.into()));
    }

    /// First item for `mime_type`.
    pub fn get(&self, mime_type: &str) -> Option<&DataTransferItem> {
        self.get_all(mime_type).first()
    }

    pub fn get_all(&self, mime_type: &str) -> &[DataTransferItem] {
        self.items
            .get(&mime_type.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every item, grouped by mime type in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataTransferItem)> {
        self.items
            .iter()
            .flat_map(|(mime, items)| items.iter().map(move |item| (mime.as_str(), item)))
    }

    /// Number of distinct mime types.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends every item of `other` after the items already held.
    pub fn merge(&mut self, other: DataTransfer) {
        for (mime_type, items) in other.items {
            self.items.entry(mime_type).or_default().extend(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FileDataSource for CountingSource {
        async fn fetch(&self, item_id: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(item_id.as_bytes().to_vec())
        }
    }

    fn dto() -> DataTransferDto {
        DataTransferDto {
            items: vec![
                DataTransferItemDto {
                    mime_type: "Text/Plain".to_string(),
                    as_string: "hello".to_string(),
                    file: None,
                },
                DataTransferItemDto {
                    mime_type: "files".to_string(),
                    as_string: String::new(),
                    file: Some(DataTransferFileDto {
                        id: "item-1".to_string(),
                        name: "a.txt".to_string(),
                        uri: None,
                    }),
                },
            ],
        }
    }

    #[tokio::test]
    async fn file_bytes_are_fetched_lazily_once() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let transfer = DataTransfer::from_dto(dto(), source.clone());

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        let file = transfer.get("files").and_then(DataTransferItem::as_file).unwrap();
        assert!(!file.is_resolved());

        assert_eq!(&*file.data().await.unwrap(), b"item-1");
        assert_eq!(&*file.data().await.unwrap(), b"item-1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(file.is_resolved());
    }

    #[tokio::test]
    async fn mime_types_are_case_insensitive() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let transfer = DataTransfer::from_dto(dto(), source);

        assert_eq!(transfer.get("text/plain").unwrap().as_string(), "hello");
        assert_eq!(transfer.get("TEXT/PLAIN").unwrap().as_string(), "hello");
    }

    #[test]
    fn merge_appends_and_keeps_order() {
        let mut transfer = DataTransfer::new();
        transfer.set_text("text/plain", "first");
        transfer.set_text("text/uri-list", "file:///a");

        let mut extra = DataTransfer::new();
        extra.set_text("text/plain", "second");
        extra.set_text("application/x-tree", "[\"0/0:a\"]");
        transfer.merge(extra);

        let entries: Vec<(&str, &str)> = transfer
            .iter()
            .map(|(mime, item)| (mime, item.as_string()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("text/plain", "first"),
                ("text/plain", "second"),
                ("text/uri-list", "file:///a"),
                ("application/x-tree", "[\"0/0:a\"]"),
            ]
        );
        assert_eq!(transfer.get("text/plain").unwrap().as_string(), "first");
        assert_eq!(transfer.len(), 3);
    }

    #[test]
    fn set_replaces_every_item_of_a_mime_type() {
        let mut transfer = DataTransfer::new();
        transfer.append("files", DataTransferItem::File(DataTransferFile::from_bytes("a", vec![1])));
        transfer.append("files", DataTransferItem::File(DataTransferFile::from_bytes("b", vec![2])));
        transfer.set_text("files", "none");

        assert_eq!(transfer.get_all("files").len(), 1);
        assert!(transfer.get("files").unwrap().as_file().is_none());
    }

    #[tokio::test]
    async fn several_dropped_files_share_one_mime_type() {
        let file = |id: &str, name: &str| DataTransferItemDto {
            mime_type: "files".to_string(),
            as_string: String::new(),
            file: Some(DataTransferFileDto {
                id: id.to_string(),
                name: name.to_string(),
                uri: None,
            }),
        };
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let transfer = DataTransfer::from_dto(
            DataTransferDto { items: vec![file("f1", "a.txt"), file("f2", "b.txt")] },
            source,
        );

        let names: Vec<&str> = transfer
            .get_all("files")
            .iter()
            .filter_map(DataTransferItem::as_file)
            .map(DataTransferFile::name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(transfer.iter().count(), 2);
        assert_eq!(transfer.to_dto().items.len(), 2);

        let second = transfer.get_all("files")[1].as_file().unwrap();
        assert_eq!(&*second.data().await.unwrap(), b"f2");
    }

    #[test]
    fn dto_keeps_file_metadata_without_bytes() {
        let mut transfer = DataTransfer::new();
        transfer.set("files", DataTransferItem::File(DataTransferFile::from_bytes("b.bin", vec![1, 2])));

        let dto = transfer.to_dto();
        let file = dto.items[0].file.as_ref().unwrap();
        assert_eq!(file.name, "b.bin");
        assert!(file.id.starts_with("host-"));
        assert_eq!(dto.items[0].as_string, "");
    }
}
