//! Line-oriented TCP front end.
//!
//! A connection moves through `AwaitingUsername → Active → Closed`. The
//! first line names the participant; every later line becomes a chat
//! broadcast. Outbound lines are written by a separate task draining the
//! connection's outbox so slow sockets never stall the read loop.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    hub::HubContext,
    message::{
        self, LineError, MAX_LINE_BYTES, chat_line, departure_announcement, device_report,
        join_announcement,
    },
    recipient::{ConnectionHandle, ConnectionId},
    registry::ClientRecord,
};

/// Accepts TCP clients until the hub shuts down.
pub async fn serve(listener: TcpListener, ctx: Arc<HubContext>) -> Result<()> {
    loop {
        select! {
            _ = ctx.shutdown.cancelled() => break,
            accept_result = listener.accept() => handle_accept_result(accept_result, &ctx),
        }
    }
    debug!("tcp accept loop stopped");
    Ok(())
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, ctx: &Arc<HubContext>) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, ctx),
        Err(err) => warn!(error = ?err, "failed to accept tcp connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, ctx: &Arc<HubContext>) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        debug!(peer = %peer, "tcp connection accepted");
        handle_connection(stream, peer, ctx).await;
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<HubContext>) {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let username = match await_username(&mut reader, &ctx).await {
        Ok(Some(username)) => username,
        Ok(None) => {
            debug!(peer = %peer, "connection closed before a username arrived");
            return;
        }
        Err(err) => {
            warn!(peer = %peer, error = %err, "rejecting connection during handshake");
            return;
        }
    };

    let device = ctx.lookup.lookup(peer.ip()).await;
    let record = ClientRecord::new(username, peer.ip(), device);
    let id = ctx.registry.next_id();
    let (handle, outbox) = ConnectionHandle::tcp(id);
    let eviction = handle.eviction();
    let writer_task = tokio::spawn(write_lines(writer, outbox, peer));

    if !ctx.registry.register_tcp(handle, record.clone()).await {
        writer_task.abort();
        return;
    }
    info!(peer = %peer, connection = %id, username = %record.username, device = ?record.device, "client joined");

    ctx.broadcaster.broadcast(&join_announcement(&record.username)).await;
    ctx.broadcaster.broadcast(&device_report(&record)).await;
    ctx.broadcaster.notify_roster_change().await;

    if let Err(err) = run_session(&mut reader, &ctx, &eviction, &record.username).await {
        warn!(peer = %peer, username = %record.username, error = %err, "closing connection");
    }

    close_connection(&ctx, id, peer).await;
    writer_task.abort();
}

async fn await_username<R>(reader: &mut R, ctx: &HubContext) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let line = select! {
        _ = ctx.shutdown.cancelled() => return Ok(None),
        line = message::read_line(reader, MAX_LINE_BYTES) => line?,
    };
    let Some(line) = line else {
        return Ok(None);
    };

    let username = line.trim();
    if username.is_empty() {
        return Err(LineError::EmptyUsername);
    }
    Ok(Some(username.to_string()))
}

async fn run_session<R>(
    reader: &mut R,
    ctx: &HubContext,
    eviction: &CancellationToken,
    username: &str,
) -> Result<(), LineError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = select! {
            _ = ctx.shutdown.cancelled() => return Ok(()),
            _ = eviction.cancelled() => {
                warn!(username, "client stopped reading; dropping connection");
                return Ok(());
            }
            line = message::read_line(reader, MAX_LINE_BYTES) => line?,
        };
        let Some(text) = line else {
            return Ok(());
        };
        ctx.broadcaster.broadcast(&chat_line(username, text.trim())).await;
    }
}

async fn close_connection(ctx: &HubContext, id: ConnectionId, peer: SocketAddr) {
    if let Some(record) = ctx.registry.deregister(id).await {
        info!(peer = %peer, connection = %id, username = %record.username, "client disconnected");
        ctx.broadcaster.broadcast(&departure_announcement(&record.username)).await;
        ctx.broadcaster.notify_roster_change().await;
    }
}

async fn write_lines(mut writer: OwnedWriteHalf, mut outbox: mpsc::Receiver<String>, peer: SocketAddr) {
    while let Some(line) = outbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(peer = %peer, ?err, "failed to deliver line to client");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(peer = %peer, ?err, "failed to shut down tcp writer");
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
