use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::sync::{mpsc::UnboundedSender, Mutex};

use crate::{
    error::{Error, Result},
    model::election::ElectionId,
    scheduled_task::ScheduledTask,
};

/// Which side effect a fired marker triggers.
///
/// The variant order is the tie-break when several transitions share a fire
/// instant: the start transition is always applied before anything that
/// depends on it, and the end transition last.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransitionKind {
    /// Status to `Ongoing`, start emails to voters.
    Start,
    /// Monitor email to the creating admin, at the start instant.
    AdminMonitor,
    /// Reminder emails to voters who have not yet voted.
    Reminder,
    /// Status to `Completed`.
    End,
}

impl Display for TransitionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::AdminMonitor => "admin_monitor",
            Self::Reminder => "reminder",
            Self::End => "end",
        };
        write!(f, "{name}")
    }
}

/// One pending scheduled transition for one election.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct MarkerKey {
    pub election_id: ElectionId,
    pub kind: TransitionKind,
}

impl MarkerKey {
    pub fn new(election_id: ElectionId, kind: TransitionKind) -> Self {
        Self { election_id, kind }
    }
}

impl Display for MarkerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "election {}/{}", self.election_id, self.kind)
    }
}

/// A time-expiring store of transition markers.
///
/// All operations are idempotent with respect to the key; re-arming a key
/// first clears any outstanding marker for it. Expired keys are delivered
/// exactly once from the store's perspective, but consumers must tolerate
/// redelivery (e.g. a sweep re-firing after a crash between arm and fire),
/// so every handler downstream is idempotent in its own right.
///
/// Callers must not arm an already-due instant; fire the executor directly
/// instead, to avoid racing the expiry notification.
#[rocket::async_trait]
pub trait MarkerStore: Send + Sync {
    /// Store a marker that expires at `fire_at`, replacing any marker
    /// already armed for this key.
    async fn arm(&self, key: MarkerKey, fire_at: DateTime<Utc>) -> Result<()>;

    /// Remove a marker before it fires. Removing an absent key is a no-op.
    async fn disarm(&self, key: MarkerKey);

    /// Is a marker currently outstanding for this key?
    async fn is_armed(&self, key: MarkerKey) -> bool;

    /// Remove every outstanding marker. Used on shutdown.
    async fn disarm_all(&self);
}

/// Map from marker keys to their live timers.
type TimerMap = HashMap<MarkerKey, ScheduledTask<()>>;

/// The single-process marker store: one in-memory timer per armed key,
/// delivering expired keys over a channel.
///
/// Markers do not survive a restart; startup reconciliation re-derives them
/// from the persisted elections.
pub struct InMemoryMarkerStore {
    timers: Arc<Mutex<TimerMap>>,
    fired_tx: UnboundedSender<MarkerKey>,
}

impl InMemoryMarkerStore {
    /// Create an empty store whose expired keys are sent on `fired_tx`.
    pub fn new(fired_tx: UnboundedSender<MarkerKey>) -> Self {
        Self {
            timers: Default::default(),
            fired_tx,
        }
    }
}

#[rocket::async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn arm(&self, key: MarkerKey, fire_at: DateTime<Utc>) -> Result<()> {
        // Nobody is listening for expirations once the dispatch loop is
        // gone, so arming would silently drop the transition.
        if self.fired_tx.is_closed() {
            return Err(Error::MarkerStore(
                "the expiry channel is closed".to_string(),
            ));
        }
        // Hold the lock across replace-and-insert so a timer firing right
        // now blocks on its self-removal until the new timer is in place.
        let mut timers = self.timers.lock().await;
        if let Some(timer) = timers.remove(&key) {
            timer.cancel().await;
        }
        let map = Arc::clone(&self.timers);
        let tx = self.fired_tx.clone();
        let timer = ScheduledTask::new(
            async move {
                map.lock().await.remove(&key);
                if tx.send(key).is_err() {
                    warn!("Marker {key} fired after the scheduler shut down");
                }
            },
            fire_at,
        );
        timers.insert(key, timer);
        trace!("Armed marker {key} for {fire_at}");
        Ok(())
    }

    async fn disarm(&self, key: MarkerKey) {
        let timer = self.timers.lock().await.remove(&key);
        if let Some(timer) = timer {
            timer.cancel().await;
            trace!("Disarmed marker {key}");
        }
    }

    async fn is_armed(&self, key: MarkerKey) -> bool {
        self.timers.lock().await.contains_key(&key)
    }

    async fn disarm_all(&self) {
        let timers: Vec<_> = self.timers.lock().await.drain().collect();
        for (_, timer) in timers {
            timer.cancel().await;
        }
    }
}
