//! Buffer manager: captures subscription updates during a transport outage
//! and replays them in order on reconnect.

use crate::error::Result;
use crate::types::{BufferedUpdate, Sequence, Timestamp};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

use super::types::{
    BufferConfig, BufferEvent, BufferStats, ClearReason, EventListenerHandle, ListenerId,
    ReplaySummary,
};

/// Default per-listener event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Cancellable handle to the one-shot hard-timeout timer.
struct Watchdog {
    cancel: Sender<()>,
}

impl Watchdog {
    /// Wake the timer thread so it exits without firing.
    fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }
}

/// One buffering episode. Swapped in and out of the manager whole, so the
/// inactive state carries no residue between episodes.
struct Session {
    /// Guards against a stale watchdog firing into a later session.
    epoch: u64,
    started_at: Instant,
    /// Subscription id -> captured updates in insertion order. Keys are
    /// seeded at start so subscription counts are accurate before any
    /// update arrives.
    buffers: HashMap<String, Vec<BufferedUpdate>>,
    /// Last assigned sequence number, shared across all subscriptions.
    sequence: Sequence,
    /// Total buffered updates across all subscriptions.
    total: usize,
    watchdog: Watchdog,
}

impl Session {
    fn outage_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn oldest_update_age_ms(&self) -> u64 {
        let now = Timestamp::now();
        self.buffers
            .values()
            .flat_map(|list| list.iter())
            .map(|update| now.millis_since(update.timestamp))
            .max()
            .unwrap_or(0)
    }

    /// Shed the globally oldest entries regardless of subscription.
    ///
    /// Removes `max(1, max_total / 10)` entries, oldest timestamp first
    /// with sequence breaking ties in arrival order. Returns the number
    /// removed.
    fn evict_globally_oldest(&mut self, max_total: usize) -> usize {
        let target = (max_total / 10).max(1);

        let mut entries: Vec<(Timestamp, Sequence)> = self
            .buffers
            .values()
            .flat_map(|list| list.iter().map(|u| (u.timestamp, u.sequence)))
            .collect();
        entries.sort();

        let doomed: HashSet<Sequence> = entries
            .into_iter()
            .take(target)
            .map(|(_, sequence)| sequence)
            .collect();

        let mut removed = 0;
        for list in self.buffers.values_mut() {
            let before = list.len();
            list.retain(|u| !doomed.contains(&u.sequence));
            removed += before - list.len();
        }
        self.total -= removed;
        removed
    }
}

/// State shared with watchdog timer threads.
struct Shared {
    config: BufferConfig,
    /// The single active session, if any. Taken out whole at session end.
    session: Mutex<Option<Session>>,
    /// Attached event listeners by ID.
    listeners: RwLock<HashMap<ListenerId, Sender<BufferEvent>>>,
    /// Counter for generating listener IDs.
    next_listener_id: AtomicU64,
    /// Session epoch counter.
    epoch: AtomicU64,
    /// Set once by `close`; a closed manager starts no further sessions.
    closed: AtomicBool,
}

impl Shared {
    fn new(config: BufferConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Broadcast an event to all listeners. Listeners whose channel is full
    /// or disconnected are detached.
    fn emit(&self, event: BufferEvent) {
        let mut to_remove = Vec::new();

        {
            let listeners = self.listeners.read();
            for (id, sender) in listeners.iter() {
                if sender.try_send(event.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.listeners.write();
            for id in to_remove {
                listeners.remove(&id);
                warn!(listener = id.0, "detaching unresponsive event listener");
            }
        }
    }

    /// Watchdog fired: if the armed session is still the active one, force
    /// a clear with data loss. Losing the race to a stop or clear is a
    /// no-op.
    fn expire(&self, epoch: u64) {
        let session = {
            let mut guard = self.session.lock();
            let armed = guard.as_ref().is_some_and(|s| s.epoch == epoch);
            if armed {
                guard.take()
            } else {
                None
            }
        };

        let Some(session) = session else { return };

        let outage_ms = session.outage_ms();
        warn!(
            outage_ms,
            subscriptions = session.buffers.len(),
            updates = session.total,
            "hard outage threshold elapsed, discarding buffered updates"
        );
        self.emit(BufferEvent::ExtendedOutage {
            outage_ms,
            subscription_count: session.buffers.len(),
        });
        self.emit(BufferEvent::BufferCleared {
            reason: ClearReason::Timeout,
            update_count: session.total,
        });
    }
}

/// Buffers subscription updates across a transport outage and replays them
/// in capture order on reconnect.
///
/// At most one session is active at a time. All ingestion outside a session
/// is silently dropped; there is nothing to buffer toward.
pub struct BufferManager {
    inner: Arc<Shared>,
}

impl BufferManager {
    /// Create a manager with default configuration.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared::new(BufferConfig::default())),
        }
    }

    /// Create a manager with custom configuration.
    pub fn with_config(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Shared::new(config)),
        })
    }

    // --- Session lifecycle ---

    /// Begin a buffering episode for the given live subscriptions.
    ///
    /// Seeds an empty buffer per identifier and arms the hard-timeout
    /// watchdog. If a session is already active this is a logged no-op;
    /// starting twice never merges or restarts a session.
    pub fn start_buffering(&self, subscription_ids: Vec<String>) {
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!("start_buffering called on a closed manager, ignoring");
            return;
        }

        let subscription_count;
        {
            let mut guard = self.inner.session.lock();
            if guard.is_some() {
                warn!("buffering already active, ignoring start");
                return;
            }

            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let buffers: HashMap<String, Vec<BufferedUpdate>> = subscription_ids
                .into_iter()
                .map(|id| (id, Vec::new()))
                .collect();
            subscription_count = buffers.len();

            *guard = Some(Session {
                epoch,
                started_at: Instant::now(),
                buffers,
                sequence: Sequence(0),
                total: 0,
                watchdog: self.arm_watchdog(epoch),
            });
        }

        debug!(subscriptions = subscription_count, "buffering started");
        self.inner.emit(BufferEvent::BufferingStarted { subscription_count });
    }

    /// Spawn the one-shot hard-timeout timer for the session being started.
    fn arm_watchdog(&self, epoch: u64) -> Watchdog {
        let (cancel, parked) = bounded::<()>(1);
        let shared = Arc::clone(&self.inner);
        let timeout = shared.config.cleanup_timeout;

        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = parked.recv_timeout(timeout) {
                shared.expire(epoch);
            }
        });

        Watchdog { cancel }
    }

    /// End the session and replay each subscription's buffered updates in
    /// capture order through `deliver`.
    ///
    /// A failing delivery is caught and logged; the remaining subscriptions
    /// are still processed, and the reported replay volume counts attempted
    /// deliveries. The session is reset regardless of delivery outcomes.
    /// Without an active session this is a logged no-op.
    pub fn stop_and_replay<F>(&self, mut deliver: F) -> ReplaySummary
    where
        F: FnMut(&str, Vec<BufferedUpdate>) -> Result<()>,
    {
        let Some(session) = self.inner.session.lock().take() else {
            warn!("stop_and_replay called with no active session");
            return ReplaySummary::default();
        };
        session.watchdog.cancel();

        let outage_ms = session.outage_ms();
        let tracked = session.buffers.len();
        debug!(
            outage_ms,
            buffered = session.total,
            "transport reconnected, replaying buffered updates"
        );

        if session.started_at.elapsed() > self.inner.config.buffer_duration {
            // Soft threshold crossed, but the transport did recover:
            // flag it and replay anyway.
            self.inner.emit(BufferEvent::ExtendedOutage {
                outage_ms,
                subscription_count: tracked,
            });
        }

        let mut summary = ReplaySummary::default();
        for (id, mut updates) in session.buffers {
            if updates.is_empty() {
                continue;
            }
            // Eviction may have left gaps but never reorders survivors.
            updates.sort_by_key(|u| u.sequence);

            let count = updates.len();
            summary.update_count += count;
            summary.subscription_count += 1;

            if let Err(e) = deliver(&id, updates) {
                warn!(
                    subscription = %id,
                    updates = count,
                    error = %e,
                    "replay delivery failed, continuing with remaining subscriptions"
                );
                summary.failed_subscriptions.push(id);
            }
        }

        self.inner.emit(BufferEvent::UpdatesReplayed {
            update_count: summary.update_count,
            subscription_count: summary.subscription_count,
        });
        summary
    }

    /// Discard any buffered state and reset to inactive.
    ///
    /// Idempotent: clearing an inactive manager still emits `BufferCleared`
    /// with a zero count.
    pub fn clear(&self) {
        self.clear_with(ClearReason::Manual);
    }

    fn clear_with(&self, reason: ClearReason) {
        let session = self.inner.session.lock().take();
        let update_count = session.as_ref().map_or(0, |s| s.total);
        if let Some(session) = &session {
            session.watchdog.cancel();
        }

        debug!(%reason, updates = update_count, "buffer cleared");
        self.inner.emit(BufferEvent::BufferCleared {
            reason,
            update_count,
        });
    }

    /// Terminal teardown: manual clear, then detach all listeners.
    ///
    /// Safe to call once at shutdown. Afterwards `start_buffering` is a
    /// logged no-op.
    pub fn close(&self) {
        self.clear();
        self.inner.listeners.write().clear();
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    // --- Ingestion ---

    /// Capture one update for `subscription_id`.
    ///
    /// No-op when no session is active. Applies global eviction when the
    /// total cap is reached (with an overflow notification) and rotates the
    /// oldest entry out of a full subscription silently.
    pub fn ingest(&self, subscription_id: &str, payload: Vec<u8>) {
        let mut dropped = 0;
        {
            let mut guard = self.inner.session.lock();
            let Some(session) = guard.as_mut() else { return };

            if session.total >= self.inner.config.max_total_updates {
                dropped = session.evict_globally_oldest(self.inner.config.max_total_updates);
            }

            let list = session.buffers.entry(subscription_id.to_string()).or_default();
            if list.len() >= self.inner.config.max_updates_per_subscription {
                // Routine rotation for one noisy subscription, not global
                // pressure: no overflow notification.
                list.remove(0);
                session.total -= 1;
            }

            session.sequence = session.sequence.next();
            list.push(BufferedUpdate {
                subscription_id: subscription_id.to_string(),
                payload,
                timestamp: Timestamp::now(),
                sequence: session.sequence,
            });
            session.total += 1;
        }

        if dropped > 0 {
            debug!(dropped, "global buffer pressure, evicted oldest updates");
            self.inner.emit(BufferEvent::BufferOverflow {
                dropped_count: dropped,
            });
        }
    }

    // --- Observability ---

    /// Whether a buffering session is active.
    pub fn is_active(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Point-in-time stats. Non-mutating; all counts are zero when
    /// inactive.
    pub fn stats(&self) -> BufferStats {
        let guard = self.inner.session.lock();
        match guard.as_ref() {
            Some(session) => BufferStats {
                active: true,
                outage_ms: session.outage_ms(),
                buffered_updates: session.total,
                subscription_count: session.buffers.len(),
                oldest_update_age_ms: session.oldest_update_age_ms(),
            },
            None => BufferStats::default(),
        }
    }

    /// Attach an event listener with the default channel capacity.
    pub fn listen(&self) -> EventListenerHandle {
        self.listen_with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Attach an event listener with a custom channel capacity.
    pub fn listen_with_capacity(&self, capacity: usize) -> EventListenerHandle {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(capacity);
        self.inner.listeners.write().insert(id, sender);
        EventListenerHandle { id, receiver }
    }

    /// Detach an event listener.
    pub fn unlisten(&self, id: ListenerId) {
        self.inner.listeners.write().remove(&id);
    }

    /// Number of attached event listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Quiet teardown: stop the timer thread without emitting events.
        if let Some(session) = self.inner.session.lock().take() {
            session.watchdog.cancel();
        }
    }
}
