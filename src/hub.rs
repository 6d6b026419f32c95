// src/hub.rs
// Broadcast hub: a single actor task owns the observer map and processes
// register/unregister/broadcast events from channels. Producers never touch
// the map; delivery is best-effort, and a slow observer is dropped rather
// than stalling the broadcaster or its peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound queue capacity per observer. Overflow drops the observer.
pub const OBSERVER_QUEUE_CAPACITY: usize = 32;

/// Capacity of the hub's broadcast input channel. A saturated channel drops
/// the update on the producer side instead of blocking it.
const BROADCAST_CHANNEL_CAPACITY: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 16;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// The only payload the hub broadcasts.
#[derive(Debug, Serialize)]
pub struct AnalyticsUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub total_visits: u64,
}

impl AnalyticsUpdate {
    pub fn new(total_visits: u64) -> Self {
        Self {
            kind: "analytics_update",
            total_visits,
        }
    }
}

/// One registered observer: an id plus the sending half of its bounded
/// outbound queue. The hub owns the sender; the connection's write loop owns
/// the receiver and exits when the hub drops its half.
#[derive(Debug)]
pub struct ObserverConn {
    pub id: u64,
    sender: mpsc::Sender<String>,
}

impl ObserverConn {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        Self::with_capacity(OBSERVER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            sender: tx,
        };
        (conn, rx)
    }
}

/// Outcome of a publish attempt, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Queued,
    /// Zero observers: serialization was skipped entirely.
    NoObservers,
    /// The broadcast channel itself was saturated; update dropped.
    ChannelFull,
}

/// Cloneable handle producers and the transport layer use to reach the hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ObserverConn>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<String>,
    observer_count: Arc<AtomicUsize>,
}

impl HubHandle {
    pub async fn register(&self, conn: ObserverConn) {
        if self.register_tx.send(conn).await.is_err() {
            tracing::error!("hub is gone; cannot register observer");
        }
    }

    /// Idempotent: unregistering an already-removed observer is a no-op.
    pub async fn unregister(&self, id: u64) {
        if self.unregister_tx.send(id).await.is_err() {
            tracing::error!("hub is gone; cannot unregister observer");
        }
    }

    /// Fan an analytics update out to all observers. Never blocks the
    /// caller: with no observers this skips serialization entirely, and a
    /// saturated broadcast channel drops the update.
    pub fn publish_analytics(&self, total_visits: u64) -> Publish {
        if self.observer_count.load(Ordering::Acquire) == 0 {
            tracing::debug!("no observers connected, skipping broadcast");
            return Publish::NoObservers;
        }

        // Serialized once, shared by every observer queue.
        let message = match serde_json::to_string(&AnalyticsUpdate::new(total_visits)) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize analytics update");
                return Publish::ChannelFull;
            }
        };

        match self.broadcast_tx.try_send(message) {
            Ok(()) => Publish::Queued,
            Err(_) => {
                tracing::warn!("broadcast channel is full, dropping analytics update");
                Publish::ChannelFull
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observer_count.load(Ordering::Acquire)
    }
}

/// Spawn the hub's control loop. Runs for the life of the process; there is
/// no stop contract beyond process exit (the task ends if every handle is
/// dropped).
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (register_tx, register_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (unregister_tx, unregister_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CHANNEL_CAPACITY);
    let observer_count = Arc::new(AtomicUsize::new(0));

    let handle = HubHandle {
        register_tx,
        unregister_tx,
        broadcast_tx,
        observer_count: observer_count.clone(),
    };

    let task = tokio::spawn(run_loop(
        register_rx,
        unregister_rx,
        broadcast_rx,
        observer_count,
    ));

    (handle, task)
}

async fn run_loop(
    mut register_rx: mpsc::Receiver<ObserverConn>,
    mut unregister_rx: mpsc::Receiver<u64>,
    mut broadcast_rx: mpsc::Receiver<String>,
    observer_count: Arc<AtomicUsize>,
) {
    // All mutation happens here; nothing else ever sees this map.
    let mut observers: HashMap<u64, mpsc::Sender<String>> = HashMap::new();

    loop {
        tokio::select! {
            conn = register_rx.recv() => {
                let Some(ObserverConn { id, sender }) = conn else { break };
                observers.insert(id, sender);
                observer_count.store(observers.len(), Ordering::Release);
                tracing::info!(id, total = observers.len(), "observer connected");
            }
            id = unregister_rx.recv() => {
                let Some(id) = id else { break };
                if observers.remove(&id).is_some() {
                    observer_count.store(observers.len(), Ordering::Release);
                    tracing::info!(id, total = observers.len(), "observer disconnected");
                }
            }
            message = broadcast_rx.recv() => {
                let Some(message) = message else { break };
                let mut dropped = Vec::new();
                for (id, sender) in &observers {
                    // Non-blocking: a full queue sacrifices that observer.
                    if sender.try_send(message.clone()).is_err() {
                        dropped.push(*id);
                    }
                }
                for id in dropped {
                    observers.remove(&id);
                    tracing::warn!(id, "observer queue full, dropping connection");
                }
                observer_count.store(observers.len(), Ordering::Release);
            }
        }
    }
}
