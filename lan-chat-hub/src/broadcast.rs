use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{recipient::ConnectionHandle, registry::Registry};

/// Deliveries allowed in flight during one fan-out pass.
pub const FANOUT_LIMIT: usize = 32;

/// Fan-out engine over the registry.
///
/// Passes run one at a time behind `order`, so every recipient sees
/// messages in the order the passes started. The recipient list is copied
/// out of the registry first and deliveries happen without the registry
/// lock held. A failing recipient is logged and skipped; cleanup is left to
/// that connection's own read loop, which a timed-out delivery wakes through
/// the handle's eviction token.
pub struct Broadcaster {
    registry: Arc<Registry>,
    order: Mutex<()>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            order: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn broadcast(&self, message: &str) {
        let _turn = self.order.lock().await;
        let recipients = self.registry.all_recipients().await;
        debug!(recipients = recipients.len(), text = message, "broadcasting");
        fan_out(recipients, message).await;
    }

    /// Pushes the current roster frame to every WebSocket observer.
    pub async fn notify_roster_change(&self) {
        let _turn = self.order.lock().await;
        let (roster, observers) = self.registry.roster_view().await;
        let frame = roster.to_frame();
        debug!(observers = observers.len(), frame = %frame, "broadcasting roster");
        fan_out(observers, &frame).await;
    }

    /// Registers an observer and sends it the roster it joined with.
    ///
    /// Both steps share one turn so a concurrent roster change cannot
    /// reach the observer ahead of its initial snapshot.
    pub async fn admit_observer(&self, handle: ConnectionHandle) -> bool {
        let _turn = self.order.lock().await;
        if !self.registry.register_ws(handle.clone()).await {
            return false;
        }
        let frame = self.registry.snapshot().await.to_frame();
        if let Err(error) = handle.deliver(&frame).await {
            warn!(connection = %handle.id(), %error, "failed to deliver roster");
        }
        true
    }
}

async fn fan_out(recipients: Vec<ConnectionHandle>, text: &str) {
    stream::iter(recipients)
        .for_each_concurrent(FANOUT_LIMIT, |recipient| async move {
            if let Err(error) = recipient.deliver(text).await {
                warn!(
                    connection = %recipient.id(),
                    kind = %recipient.kind(),
                    %error,
                    "failed to deliver message"
                );
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc, time::Instant};

    use super::*;
    use crate::{
        enrichment::DeviceInfo,
        recipient::{ConnectionHandle, ConnectionId, DELIVERY_TIMEOUT, OUTBOX_CAPACITY},
        registry::ClientRecord,
    };

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    async fn add_participant(
        registry: &Registry,
        username: &str,
        ip: &str,
    ) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = registry.next_id();
        let (handle, rx) = ConnectionHandle::tcp(id);
        let record = ClientRecord::new(username, ip.parse().expect("ip"), DeviceInfo::unavailable());
        assert!(registry.register_tcp(handle, record).await);
        (id, rx)
    }

    async fn add_observer(registry: &Registry) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = registry.next_id();
        let (handle, rx) = ConnectionHandle::websocket(id);
        assert!(registry.register_ws(handle).await);
        (id, rx)
    }

    #[tokio::test]
    async fn failing_recipient_does_not_block_others() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (_, mut first) = add_participant(&registry, "alice", "10.0.0.5").await;
        let (_, second) = add_participant(&registry, "bob", "10.0.0.6").await;
        let (_, mut third) = add_observer(&registry).await;
        drop(second);

        broadcaster.broadcast("hello").await;

        assert_eq!(drain(&mut first), vec!["hello\n"]);
        assert_eq!(drain(&mut third), vec!["hello"]);
        assert_eq!(registry.all_recipients().await.len(), 3);
    }

    #[tokio::test]
    async fn roster_changes_reach_observers_only() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (_, mut participant) = add_participant(&registry, "bob", "10.0.0.6").await;
        let (_, mut observer) = add_observer(&registry).await;
        add_participant(&registry, "alice", "10.0.0.5").await;

        broadcaster.notify_roster_change().await;

        assert!(drain(&mut participant).is_empty());
        assert_eq!(
            drain(&mut observer),
            vec!["[USER_LIST]:alice,10.0.0.5;bob,10.0.0.6"]
        );
    }

    #[tokio::test]
    async fn admitted_observer_gets_snapshot_without_global_broadcast() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (_, mut existing) = add_observer(&registry).await;
        add_participant(&registry, "alice", "10.0.0.5").await;

        let id = registry.next_id();
        let (handle, mut newcomer) = ConnectionHandle::websocket(id);
        assert!(broadcaster.admit_observer(handle.clone()).await);
        assert!(!broadcaster.admit_observer(handle).await);

        assert_eq!(drain(&mut newcomer), vec!["[USER_LIST]:alice,10.0.0.5"]);
        assert!(drain(&mut existing).is_empty());
    }

    #[tokio::test]
    async fn recipient_sees_broadcasts_in_call_order() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_, mut rx) = add_observer(&registry).await;

        for n in 0..50 {
            broadcaster.broadcast(&format!("m{n}")).await;
        }

        let expected: Vec<String> = (0..50).map(|n| format!("m{n}")).collect();
        assert_eq!(drain(&mut rx), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_costs_one_timeout_then_is_skipped() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (stalled, _never_drained) = ConnectionHandle::tcp(registry.next_id());
        let eviction = stalled.eviction();
        let record = ClientRecord::new("slow", "10.0.0.9".parse().expect("ip"), DeviceInfo::unavailable());
        assert!(registry.register_tcp(stalled, record).await);
        let (_, mut observer) = add_observer(&registry).await;

        for n in 0..OUTBOX_CAPACITY {
            broadcaster.broadcast(&format!("fill-{n}")).await;
            observer.recv().await.expect("observer frame");
        }
        assert!(!eviction.is_cancelled());

        let started = Instant::now();
        broadcaster.broadcast("overflow").await;
        let waited = started.elapsed();
        assert!(waited >= DELIVERY_TIMEOUT && waited < DELIVERY_TIMEOUT * 2, "waited {waited:?}");
        assert!(eviction.is_cancelled());

        let started = Instant::now();
        for n in 0..10 {
            broadcaster.broadcast(&format!("after-{n}")).await;
        }
        assert!(started.elapsed() < Duration::from_millis(10));
        assert_eq!(drain(&mut observer).len(), 11);
    }

    #[tokio::test]
    async fn empty_registry_broadcast_is_a_no_op() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        broadcaster.broadcast("nobody listening").await;
        broadcaster.notify_roster_change().await;
    }
}
