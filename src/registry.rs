// ============================================================================
// Sink Registry - per-user push channel fan-out
// ============================================================================
//
// In-process map from user id to the set of live push sinks. Fan-out is
// non-blocking: a full sink drops the frame, a slow client never stalls a
// delivery worker. The map guard is never held across I/O; senders are
// cloned out under the read lock and offered to afterwards.
//
// ============================================================================

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound frame queue capacity per sink.
pub const SINK_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("max connections reached: {0}")]
    CapacityExceeded(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The user has no live sinks at this replica.
    #[error("no active connections for user")]
    NoRecipient,
    /// Every sink refused the frame (full or closing).
    #[error("all sinks refused the frame")]
    AllSinksRefused,
}

enum Offer {
    Accepted,
    Full,
    Closed,
}

/// One live push channel bound to a connected client.
///
/// The sender half lives here; the edge handler owns the receiver. Closing
/// the sink drops the sender, which the handler observes as end-of-stream.
pub struct Sink {
    id: uuid::Uuid,
    user_id: String,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    /// Unix seconds of the last written frame or heartbeat.
    last_activity: AtomicI64,
}

impl Sink {
    fn new(user_id: String, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            tx: Mutex::new(Some(tx)),
            last_activity: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Record activity on the channel; keeps the sink off the eviction list.
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    fn offer(&self, frame: &str) -> Offer {
        let sender = match self.tx.lock().expect("sink lock poisoned").clone() {
            Some(sender) => sender,
            None => return Offer::Closed,
        };

        match sender.try_send(frame.to_string()) {
            Ok(()) => Offer::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    fn close(&self) {
        self.tx.lock().expect("sink lock poisoned").take();
    }

    fn idle_secs(&self, now_secs: i64) -> i64 {
        now_secs - self.last_activity.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn set_last_activity(&self, secs: i64) {
        self.last_activity.store(secs, Ordering::Relaxed);
    }
}

/// Registry of live sinks across all users on this replica.
pub struct SinkRegistry {
    connections: RwLock<HashMap<String, Vec<Arc<Sink>>>>,
    total: AtomicUsize,
    max_connections: usize,
    stale_timeout: Duration,
}

impl SinkRegistry {
    pub fn new(max_connections: usize, stale_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            max_connections,
            stale_timeout,
        }
    }

    /// Allocate a sink for `user_id`. Fails when the global connection cap
    /// is reached. Returns the shared handle and the receiver half the edge
    /// handler streams from.
    pub fn register(
        &self,
        user_id: &str,
    ) -> Result<(Arc<Sink>, mpsc::Receiver<String>), RegisterError> {
        let mut connections = self.connections.write().expect("registry lock poisoned");

        let total = self.total.load(Ordering::Relaxed);
        if total >= self.max_connections {
            return Err(RegisterError::CapacityExceeded(self.max_connections));
        }

        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        let sink = Arc::new(Sink::new(user_id.to_string(), tx));

        connections
            .entry(user_id.to_string())
            .or_default()
            .push(sink.clone());
        self.total.fetch_add(1, Ordering::Relaxed);

        info!(
            user_id = %user_id,
            total_connections = total + 1,
            "sink registered"
        );

        Ok((sink, rx))
    }

    /// Remove a sink and close its queue. Drops the user's map entry when
    /// the last sink goes away.
    pub fn unregister(&self, sink: &Sink) {
        let mut connections = self.connections.write().expect("registry lock poisoned");

        if let Some(sinks) = connections.get_mut(&sink.user_id) {
            let before = sinks.len();
            sinks.retain(|s| s.id != sink.id);
            let removed = before - sinks.len();
            if removed > 0 {
                self.total.fetch_sub(removed, Ordering::Relaxed);
            }
            if sinks.is_empty() {
                connections.remove(&sink.user_id);
            }
        }
        drop(connections);

        sink.close();

        info!(
            user_id = %sink.user_id,
            remaining = self.total.load(Ordering::Relaxed),
            "sink unregistered"
        );
    }

    /// Fan a serialized frame out to every sink of `user_id` with a
    /// non-blocking offer. Full sinks drop the frame; the send succeeds if
    /// at least one sink accepted it.
    pub fn send(&self, user_id: &str, frame: &str) -> Result<(), SendError> {
        let sinks: Vec<Arc<Sink>> = {
            let connections = self.connections.read().expect("registry lock poisoned");
            match connections.get(user_id) {
                Some(sinks) if !sinks.is_empty() => sinks.clone(),
                _ => return Err(SendError::NoRecipient),
            }
        };

        let mut accepted = 0usize;
        for sink in &sinks {
            match sink.offer(frame) {
                Offer::Accepted => accepted += 1,
                Offer::Full => {
                    warn!(user_id = %user_id, "sink queue full, dropping frame");
                }
                Offer::Closed => {
                    debug!(user_id = %user_id, "sink closing, skipping");
                }
            }
        }

        if accepted > 0 {
            Ok(())
        } else {
            Err(SendError::AllSinksRefused)
        }
    }

    pub fn active_connections(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Evict sinks idle past the liveness timeout. Returns the number of
    /// evicted sinks.
    pub fn evict_stale(&self) -> usize {
        let now_secs = Utc::now().timestamp();
        let stale_secs = self.stale_timeout.as_secs() as i64;

        let mut connections = self.connections.write().expect("registry lock poisoned");

        let mut evicted: Vec<Arc<Sink>> = Vec::new();
        connections.retain(|user_id, sinks| {
            sinks.retain(|sink| {
                let idle = sink.idle_secs(now_secs);
                if idle >= stale_secs {
                    info!(user_id = %user_id, idle_secs = idle, "evicting stale sink");
                    evicted.push(sink.clone());
                    false
                } else {
                    true
                }
            });
            !sinks.is_empty()
        });

        if !evicted.is_empty() {
            self.total.fetch_sub(evicted.len(), Ordering::Relaxed);
        }
        drop(connections);

        for sink in &evicted {
            sink.close();
        }

        evicted.len()
    }

    /// Periodic liveness maintenance; runs until cancelled.
    pub async fn run_maintenance(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("registry maintenance started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_stale();
                    if evicted > 0 {
                        warn!(count = evicted, "evicted stale sinks");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("registry maintenance stopped");
                    return;
                }
            }
        }
    }
}
