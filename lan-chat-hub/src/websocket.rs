//! WebSocket front end for read-only dashboards.
//!
//! Observers carry no username: they receive the roster frame on connect,
//! every roster change, and every chat line. Inbound frames are ignored.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{hub::HubContext, recipient::ConnectionHandle};

/// Upgrades a request on any path into an observer connection.
pub fn router(ctx: Arc<HubContext>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/*path", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(ctx): State<Arc<HubContext>>,
) -> Response {
    ws.on_upgrade(move |socket| observe(socket, peer, ctx))
}

async fn observe(socket: WebSocket, peer: SocketAddr, ctx: Arc<HubContext>) {
    let id = ctx.registry.next_id();
    let (handle, outbox) = ConnectionHandle::websocket(id);
    let eviction = handle.eviction();
    let (sink, stream) = socket.split();
    let writer_task = tokio::spawn(write_frames(sink, outbox, peer));

    if !ctx.broadcaster.admit_observer(handle).await {
        writer_task.abort();
        return;
    }
    info!(peer = %peer, connection = %id, "websocket observer connected");

    wait_for_close(stream, &ctx, &eviction, peer).await;

    ctx.registry.deregister(id).await;
    writer_task.abort();
    info!(peer = %peer, connection = %id, "websocket observer closed");
}

async fn wait_for_close(
    mut stream: SplitStream<WebSocket>,
    ctx: &HubContext,
    eviction: &CancellationToken,
    peer: SocketAddr,
) {
    loop {
        let frame = select! {
            _ = ctx.shutdown.cancelled() => return,
            _ = eviction.cancelled() => {
                warn!(peer = %peer, "observer stopped reading; dropping connection");
                return;
            }
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(Message::Text(text))) => {
                debug!(peer = %peer, len = text.len(), "ignoring inbound text frame");
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(peer = %peer, ?err, "websocket read failed");
                return;
            }
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<String>,
    peer: SocketAddr,
) {
    while let Some(text) = outbox.recv().await {
        if let Err(err) = sink.send(Message::Text(text)).await {
            debug!(peer = %peer, ?err, "failed to deliver frame to observer");
            return;
        }
    }
    if let Err(err) = sink.close().await {
        debug!(peer = %peer, ?err, "failed to close websocket");
    }
}
