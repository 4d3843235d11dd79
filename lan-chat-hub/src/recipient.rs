//! Outbound side of a connection.
//!
//! Every registered connection owns a bounded outbox drained by a writer
//! task in its transport adapter. The broadcast path only ever sees a
//! [`ConnectionHandle`] and calls [`ConnectionHandle::deliver`]; framing
//! differences between transports stay inside [`Recipient`].

use std::{fmt, time::Duration};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

/// Frames a single connection may have queued before delivery suspends.
pub const OUTBOX_CAPACITY: usize = 256;

/// Longest a single delivery may wait on a full outbox.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::WebSocket => f.write_str("websocket"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection outbox is closed")]
    Closed,
    #[error("connection outbox stayed full for {0:?}")]
    TimedOut(Duration),
}

/// Queue feeding one connection's writer task.
///
/// A delivery that times out evicts the outbox: its token is cancelled so
/// the owning adapter tears the connection down, and later deliveries fail
/// fast with [`DeliveryError::Closed`].
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
    timeout: Duration,
    evicted: CancellationToken,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        Self::with_limits(OUTBOX_CAPACITY, DELIVERY_TIMEOUT)
    }

    pub fn with_limits(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let evicted = CancellationToken::new();
        (Self { tx, timeout, evicted }, rx)
    }

    async fn push(&self, frame: String) -> Result<(), DeliveryError> {
        if self.evicted.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx
            .send_timeout(frame, self.timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
                SendTimeoutError::Timeout(_) => {
                    self.evicted.cancel();
                    DeliveryError::TimedOut(self.timeout)
                }
            })
    }
}

/// Closed set of transports a message can be delivered over.
#[derive(Debug, Clone)]
pub enum Recipient {
    /// Queued text is one already-terminated line.
    Tcp(Outbox),
    /// Queued text is the payload of one text frame.
    WebSocket(Outbox),
}

impl Recipient {
    pub fn kind(&self) -> TransportKind {
        match self {
            Recipient::Tcp(_) => TransportKind::Tcp,
            Recipient::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    pub async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        match self {
            Recipient::Tcp(outbox) => outbox.push(frame_line(text)).await,
            Recipient::WebSocket(outbox) => outbox.push(text.to_owned()).await,
        }
    }

    fn outbox(&self) -> &Outbox {
        match self {
            Recipient::Tcp(outbox) | Recipient::WebSocket(outbox) => outbox,
        }
    }
}

/// Turns arbitrary text into exactly one newline-terminated line.
pub fn frame_line(text: &str) -> String {
    let mut line: String = text
        .chars()
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c })
        .collect();
    line.push('\n');
    line
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    recipient: Recipient,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, recipient: Recipient) -> Self {
        Self { id, recipient }
    }

    /// Handle plus the receiving end its TCP writer task drains.
    pub fn tcp(id: ConnectionId) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::channel();
        (Self::new(id, Recipient::Tcp(outbox)), rx)
    }

    /// Handle plus the receiving end its WebSocket writer task drains.
    pub fn websocket(id: ConnectionId) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::channel();
        (Self::new(id, Recipient::WebSocket(outbox)), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.recipient.kind()
    }

    pub async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        self.recipient.deliver(text).await
    }

    /// Cancelled once a delivery to this connection timed out. The
    /// transport adapter watches it and closes the connection.
    pub fn eviction(&self) -> CancellationToken {
        self.recipient.outbox().evicted.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_line_replaces_embedded_breaks() {
        assert_eq!(frame_line("one\ntwo\r\nthree"), "one two  three\n");
        assert_eq!(frame_line(""), "\n");
    }

    #[tokio::test]
    async fn tcp_delivery_queues_terminated_line() {
        let (handle, mut rx) = ConnectionHandle::tcp(ConnectionId::new(1));
        handle.deliver("hello").await.expect("deliver");
        assert_eq!(rx.recv().await.as_deref(), Some("hello\n"));
        assert_eq!(handle.kind(), TransportKind::Tcp);
    }

    #[tokio::test]
    async fn websocket_delivery_keeps_text_verbatim() {
        let (handle, mut rx) = ConnectionHandle::websocket(ConnectionId::new(2));
        handle.deliver("[USER_LIST]:").await.expect("deliver");
        assert_eq!(rx.recv().await.as_deref(), Some("[USER_LIST]:"));
    }

    #[tokio::test]
    async fn delivery_to_dropped_receiver_reports_closed() {
        let (handle, rx) = ConnectionHandle::tcp(ConnectionId::new(3));
        drop(rx);
        assert_eq!(handle.deliver("lost").await, Err(DeliveryError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn full_outbox_times_out_and_evicts() {
        let (outbox, _rx) = Outbox::with_limits(1, Duration::from_millis(50));
        let handle = ConnectionHandle::new(ConnectionId::new(4), Recipient::WebSocket(outbox));
        let eviction = handle.eviction();
        handle.deliver("first").await.expect("first fits");
        assert!(!eviction.is_cancelled());

        assert_eq!(
            handle.deliver("second").await,
            Err(DeliveryError::TimedOut(Duration::from_millis(50)))
        );
        assert!(eviction.is_cancelled());

        let started = tokio::time::Instant::now();
        assert_eq!(handle.deliver("third").await, Err(DeliveryError::Closed));
        assert!(started.elapsed() < Duration::from_millis(10));
    }
}
