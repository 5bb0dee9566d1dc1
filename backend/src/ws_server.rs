use crate::registry::ViewRegistry;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use shared::{
    DownMsg, DownMsgEnvelope, ItemDescriptor, RevealOptions, RevealTarget, TreeItemHandle,
    UpMsg, UpMsgRequest, ViewBadge,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tree_sync::TreeViewsRemote;

const FILE_DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound side of the renderer connection. One renderer at a time; a new
/// connection replaces the previous one.
pub struct WsRemote {
    /// Current renderer, tagged with its connection id.
    renderer_tx: RwLock<Option<(u64, mpsc::Sender<String>)>>,
    pending_file_data: RwLock<HashMap<u64, oneshot::Sender<Option<String>>>>,
    next_query_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl WsRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            renderer_tx: RwLock::new(None),
            pending_file_data: RwLock::new(HashMap::new()),
            next_query_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.renderer_tx.read().await.is_some()
    }

    /// Makes `tx` the renderer, replacing any previous one. Returns the
    /// connection id to pass to `detach`.
    async fn attach(&self, tx: mpsc::Sender<String>) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.renderer_tx.write().await.replace((connection_id, tx));
        if let Some((previous_id, _)) = previous {
            log::info!("Renderer connection {} replaced by {}", previous_id, connection_id);
        }
        connection_id
    }

    /// Forgets the renderer if `connection_id` is still the current one.
    async fn detach(&self, connection_id: u64) {
        let mut renderer_tx = self.renderer_tx.write().await;
        if !matches!(renderer_tx.as_ref(), Some((current, _)) if *current == connection_id) {
            return;
        }
        *renderer_tx = None;
        drop(renderer_tx);
        // Waiting drops fail with "channel closed" instead of running into the timeout.
        self.pending_file_data.write().await.clear();
    }

    async fn send(&self, envelope: &DownMsgEnvelope) -> Result<()> {
        let renderer_tx = self.renderer_tx.read().await;
        let Some(tx) = renderer_tx.as_ref().map(|(_, tx)| tx.clone()) else {
            log::debug!("No renderer connected, dropping {:?}", envelope.msg);
            return Ok(());
        };
        drop(renderer_tx);

        let json = serde_json::to_string(envelope)?;
        tx.send(json).await.context("Failed to send to renderer")?;
        Ok(())
    }

    async fn notify(&self, msg: DownMsg) -> Result<()> {
        self.send(&DownMsgEnvelope { id: None, msg }).await
    }

    pub async fn reply(&self, id: u64, msg: DownMsg) -> Result<()> {
        self.send(&DownMsgEnvelope { id: Some(id), msg }).await
    }

    /// Completes a pending `resolve_drop_file_data` request.
    pub async fn complete_file_query(&self, query_id: u64, data: Option<String>) {
        match self.pending_file_data.write().await.remove(&query_id) {
            Some(tx) => {
                let _ = tx.send(data);
            }
            None => log::warn!("File data for unknown query {}", query_id),
        }
    }
}

#[async_trait]
impl TreeViewsRemote for WsRemote {
    async fn refresh(
        &self,
        view_id: &str,
        items: Option<BTreeMap<TreeItemHandle, ItemDescriptor>>,
    ) -> Result<()> {
        self.notify(DownMsg::Refresh {
            view_id: view_id.to_string(),
            items,
        })
        .await
    }

    async fn reveal(
        &self,
        view_id: &str,
        target: Option<RevealTarget>,
        options: RevealOptions,
    ) -> Result<()> {
        self.notify(DownMsg::Reveal {
            view_id: view_id.to_string(),
            target,
            options,
        })
        .await
    }

    async fn set_message(&self, view_id: &str, message: &str) -> Result<()> {
        self.notify(DownMsg::SetMessage {
            view_id: view_id.to_string(),
            message: message.to_string(),
        })
        .await
    }

    async fn set_title(&self, view_id: &str, title: &str, description: Option<&str>) -> Result<()> {
        self.notify(DownMsg::SetTitle {
            view_id: view_id.to_string(),
            title: title.to_string(),
            description: description.map(str::to_string),
        })
        .await
    }

    async fn set_badge(&self, view_id: &str, badge: Option<&ViewBadge>) -> Result<()> {
        self.notify(DownMsg::SetBadge {
            view_id: view_id.to_string(),
            badge: badge.cloned(),
        })
        .await
    }

    async fn dispose_tree(&self, view_id: &str) -> Result<()> {
        self.notify(DownMsg::DisposeTree {
            view_id: view_id.to_string(),
        })
        .await
    }

    async fn resolve_drop_file_data(
        &self,
        view_id: &str,
        request_id: u64,
        item_id: &str,
    ) -> Result<Vec<u8>> {
        if !self.is_connected().await {
            return Err(anyhow!("No renderer connected"));
        }
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        self.pending_file_data.write().await.insert(query_id, response_tx);

        let sent = self
            .notify(DownMsg::ResolveDropFileData {
                view_id: view_id.to_string(),
                request_id,
                item_id: item_id.to_string(),
                query_id,
            })
            .await;
        if let Err(err) = sent {
            self.pending_file_data.write().await.remove(&query_id);
            return Err(err);
        }

        let response = tokio::time::timeout(FILE_DATA_TIMEOUT, response_rx).await;
        self.pending_file_data.write().await.remove(&query_id);
        let data = response
            .context("Timeout waiting for dropped file data")?
            .context("File data channel closed")?
            .with_context(|| format!("Renderer has no data for transfer item {item_id}"))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("Failed to decode base64 file data")
    }
}

pub async fn start_server(
    addr: &str,
    registry: Arc<ViewRegistry>,
    remote: Arc<WsRemote>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    log::info!("WebSocket server listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("New connection from {}", peer);
        let registry = registry.clone();
        let remote = remote.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry, remote).await {
                log::error!("Connection error: {}", e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<ViewRegistry>,
    remote: Arc<WsRemote>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let connection_id = remote.attach(tx).await;
    log::info!("Renderer connected ({})", connection_id);
    // Whatever a previous renderer was shown is gone; start from the roots.
    registry.refresh_all();

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                ws_tx.send(Message::Text(msg.into())).await?;
            }
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(Message::Text(text)) => dispatch(&text, &registry, &remote),
                    Ok(Message::Close(_)) => {
                        log::info!("Renderer disconnected");
                        break;
                    }
                    Err(e) => {
                        log::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            else => break,
        }
    }

    remote.detach(connection_id).await;
    Ok(())
}

/// Requests run on their own task: a drop waits for file data that arrives
/// on this same connection.
fn dispatch(text: &str, registry: &Arc<ViewRegistry>, remote: &Arc<WsRemote>) {
    let request = match serde_json::from_str::<UpMsgRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Ignoring malformed request: {}", e);
            return;
        }
    };

    if let UpMsg::DropFileData { query_id, data } = request.msg {
        let remote = remote.clone();
        tokio::spawn(async move { remote.complete_file_query(query_id, data).await });
        return;
    }

    let registry = registry.clone();
    let remote = remote.clone();
    tokio::spawn(async move {
        let response = registry.handle(request.msg).await;
        if let Err(e) = remote.reply(request.id, response).await {
            log::error!("Failed to reply to request {}: {}", request.id, e);
        }
    });
}
