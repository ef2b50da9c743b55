//! Correlator: funnels session callbacks into per-batch reply streams.
//!
//! Replies carry no request ID, so the correlator cannot route a reply to
//! the batch that caused it. Instead every in-flight batch holds a
//! `Subscription` and receives every accepted event; each batch filters for
//! the CIDs it still needs. Publication awaits each subscriber's bounded
//! stream in turn and gives up only when the run is cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cidcheck_core::{PeerIdentity, Reply};

use crate::session::{ReplyHandler, SessionError};

/// One item on a batch's reply stream.
#[derive(Debug)]
pub enum CorrelatorEvent {
    Reply(Reply),
    /// A reply arrived from a peer other than the target.
    Mismatch {
        expected: PeerIdentity,
        got: PeerIdentity,
    },
    TransportError(SessionError),
}

pub struct Correlator {
    target: PeerIdentity,
    subscribers: DashMap<u64, mpsc::Sender<Arc<CorrelatorEvent>>>,
    next_id: AtomicU64,
    capacity: usize,
    cancel: CancellationToken,
}

impl Correlator {
    pub fn new(target: PeerIdentity, capacity: usize, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            target,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            cancel,
        })
    }

    pub fn target(&self) -> &PeerIdentity {
        &self.target
    }

    /// Open a stream that sees every event published from now on.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            correlator: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    async fn publish(&self, event: CorrelatorEvent) {
        // Snapshot senders so no map shard is held across an await.
        let targets: Vec<(u64, mpsc::Sender<Arc<CorrelatorEvent>>)> = self
            .subscribers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        if targets.is_empty() {
            tracing::debug!(?event, "event with no batch in flight, dropping");
            return;
        }

        let event = Arc::new(event);
        for (id, tx) in targets {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("run cancelled, abandoning publication");
                    return;
                }
                res = tx.send(event.clone()) => {
                    if res.is_err() {
                        // Batch finished between snapshot and send.
                        self.subscribers.remove(&id);
                    }
                }
            }
        }
    }
}

impl ReplyHandler for Correlator {
    fn on_reply(&self, sender: PeerIdentity, reply: Reply) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if sender != self.target {
                tracing::warn!(
                    expected = %self.target,
                    got = %sender,
                    "reply from unexpected peer"
                );
                self.publish(CorrelatorEvent::Mismatch {
                    expected: self.target.clone(),
                    got: sender,
                })
                .await;
                return;
            }
            self.publish(CorrelatorEvent::Reply(reply)).await;
        })
    }

    fn on_transport_error(&self, error: SessionError) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::warn!(error = %error, "transport error");
            self.publish(CorrelatorEvent::TransportError(error)).await;
        })
    }
}

/// A batch's view of the shared stream. Unregisters on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<CorrelatorEvent>>,
    correlator: Arc<Correlator>,
}

impl Subscription {
    /// Next event; `None` once the correlator has dropped this stream.
    pub async fn recv(&mut self) -> Option<Arc<CorrelatorEvent>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.correlator.subscribers.remove(&self.id);
    }
}
