//! WebSocket endpoint: one pipeline per connection.

use crate::backend::Backends;
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineConfig, SessionContext};
use crate::protocol::ServerMessage;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Shared by every connection.
#[derive(Clone)]
pub struct AppState {
    backends: Backends,
    config: Arc<Config>,
    pipeline: PipelineConfig,
    next_session: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config, backends: Backends) -> Self {
        Self {
            backends,
            pipeline: PipelineConfig::from_config(&config),
            config: Arc::new(config),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = state.next_session_id();
    let ctx = Arc::new(SessionContext::new(id, state.config.pipeline.history_cap));
    let (inbound_tx, inbound_rx) = mpsc::channel(state.config.pipeline.recognition_buffer);
    let (outbox_tx, outbox_rx) = mpsc::channel(state.config.server.outbox_buffer);

    let handle = Pipeline::new(ctx, state.backends.clone(), state.pipeline.clone())
        .spawn(inbound_rx, outbox_tx);

    // Returning drops both queue ends, which winds the pipeline down.
    let (sink, stream) = socket.split();
    relay(sink, stream, inbound_tx, outbox_rx)
        .instrument(tracing::info_span!("session", id))
        .await;
    handle.wait().await;
}

/// Run the outbox writer as its own task and forward client frames until
/// either side closes. A stalled ingestor never holds back outgoing audio.
async fn relay<W, R>(
    sink: W,
    stream: R,
    inbound_tx: mpsc::Sender<String>,
    outbox_rx: mpsc::Receiver<ServerMessage>,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    let mut writer = tokio::spawn(write_outbox(sink, outbox_rx).in_current_span());

    tokio::select! {
        () = read_inbound(stream, inbound_tx) => {
            // Inbound is closed now; the pipeline drains and closes the outbox.
            if let Err(e) = writer.await {
                tracing::warn!(error = %e, "Outbox writer failed");
            }
        }
        result = &mut writer => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Outbox writer failed");
            }
        }
    }
}

async fn write_outbox<W>(mut sink: W, mut outbox_rx: mpsc::Receiver<ServerMessage>)
where
    W: Sink<Message> + Unpin,
{
    while let Some(message) = outbox_rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode server message");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            tracing::debug!("Socket send failed");
            return;
        }
    }
    tracing::debug!("Outbox closed");
}

async fn read_inbound<R>(mut stream: R, inbound_tx: mpsc::Sender<String>)
where
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if inbound_tx.send(text).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                tracing::debug!(bytes = bytes.len(), "Ignoring binary frame");
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("Client disconnected");
                return;
            }
            // Ping/pong is answered by axum.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Socket receive failed");
                return;
            }
        }
    }
}

/// Listen on `config.server.bind` until Ctrl-C.
pub async fn serve(config: Config, backends: Backends) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, backends = ?backends, "Listening");

    axum::serve(listener, router(AppState::new(config, backends)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
