//! Time-driven election lifecycle scheduling.
//!
//! Elections move `Upcoming -> Ongoing -> Completed` at the instants given
//! by their date/time fields. The orchestrator arms one in-process marker
//! per pending transition; expired markers and a periodic reconciliation
//! sweep both funnel into the same idempotent executor, so a lost timer can
//! delay a transition but never lose or duplicate it.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, Utc};
use mongodb::Database;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{
        self,
        sync::mpsc::{self, UnboundedReceiver},
        task::JoinHandle,
    },
    Build, Orbit, Rocket,
};

use crate::{
    error::Result,
    model::{
        election::Election,
        repository::{ElectionRepository, MongoElectionRepository},
    },
    notification::{LogSink, NotificationSink},
    Config,
};

mod executor;
mod marker;
mod reconciler;
mod window;

#[cfg(test)]
mod testing;

pub use executor::{TransitionExecutor, TransitionOutcome};
pub use marker::{InMemoryMarkerStore, MarkerKey, MarkerStore, TransitionKind};
pub use reconciler::StatusReconciler;
pub use window::ElectionWindow;

/// Process-wide scheduler settings, read once at startup.
#[derive(Debug, Copy, Clone)]
pub struct SchedulerConfig {
    /// Reference timezone in which election date/time fields are read.
    pub timezone: FixedOffset,
    /// How long before the end instant the reminder fires.
    pub reminder_lead: Duration,
    /// How often the reconciliation sweep re-scans active elections.
    pub sweep_interval: std::time::Duration,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            timezone: config.timezone_offset(),
            reminder_lead: config.reminder_lead(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// The scheduler's public entry point, owning the marker store, the
/// executor and the reconciliation sweep.
///
/// Initialised once at startup (reconciling every non-terminal election),
/// mutated only via [`schedule_election_updates`] and the executor, and torn
/// down by [`shutdown`], which disarms all markers.
///
/// [`schedule_election_updates`]: ElectionScheduler::schedule_election_updates
/// [`shutdown`]: ElectionScheduler::shutdown
pub struct ElectionScheduler {
    markers: Arc<InMemoryMarkerStore>,
    executor: Arc<TransitionExecutor>,
    tz: FixedOffset,
    reminder_lead: Duration,
    dispatch_handle: JoinHandle<()>,
    sweep_handle: JoinHandle<()>,
}

impl ElectionScheduler {
    /// Start the scheduler: reconcile all persisted elections, then begin
    /// dispatching marker expirations and sweeping on the configured
    /// interval.
    pub async fn start(
        repo: Arc<dyn ElectionRepository>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let markers = Arc::new(InMemoryMarkerStore::new(fired_tx));
        let executor = Arc::new(TransitionExecutor::new(
            Arc::clone(&repo),
            sink,
            markers.clone(),
            config.timezone,
            config.reminder_lead,
        ));
        let reconciler = Arc::new(StatusReconciler::new(
            repo,
            Arc::clone(&executor),
            markers.clone(),
            config.timezone,
            config.reminder_lead,
        ));

        // Startup reconciliation: catch up on transitions that became due
        // while the process was down, and re-arm everything still future.
        reconciler.reconcile().await?;

        let dispatch_handle = Self::spawn_dispatch(Arc::clone(&executor), fired_rx);
        let sweep_handle = reconciler.spawn_sweep(config.sweep_interval);

        Ok(Self {
            markers,
            executor,
            tz: config.timezone,
            reminder_lead: config.reminder_lead,
            dispatch_handle,
            sweep_handle,
        })
    }

    /// (Re-)schedule one election's transitions. Called on creation and on
    /// any update that touches the timing fields; always idempotent by
    /// disarm-then-rearm.
    ///
    /// A malformed schedule is rejected here, before any marker is armed,
    /// so the caller can refuse the write that produced it.
    pub async fn schedule_election_updates(&self, election: &Election) -> Result<()> {
        let now = Utc::now();
        let window = ElectionWindow::compute(election, self.reminder_lead, self.tz, now)?;

        // Clear any markers from a previous version of the schedule.
        for kind in [
            TransitionKind::Start,
            TransitionKind::AdminMonitor,
            TransitionKind::Reminder,
            TransitionKind::End,
        ] {
            self.markers
                .disarm(MarkerKey::new(election.id, kind))
                .await;
        }

        // Anything already due is executed directly rather than armed with
        // a zero TTL, which would race the expiry notification.
        for (kind, _) in window.due(now) {
            self.executor.fire(election.id, kind).await?;
        }

        for (kind, at) in window.pending(now) {
            let key = MarkerKey::new(election.id, kind);
            if let Err(err) = self.markers.arm(key, at).await {
                warn!("Failed to arm {key}; the sweep will cover it: {err}");
            }
        }

        Ok(())
    }

    /// Stop sweeping and dispatching, and disarm every outstanding marker.
    pub async fn shutdown(&self) {
        self.sweep_handle.abort();
        self.dispatch_handle.abort();
        self.markers.disarm_all().await;
        info!("Election scheduler shut down");
    }

    /// Forward expired markers to the executor, forever.
    fn spawn_dispatch(
        executor: Arc<TransitionExecutor>,
        mut fired_rx: UnboundedReceiver<MarkerKey>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(key) = fired_rx.recv().await {
                match executor.fire(key.election_id, key.kind).await {
                    Ok(TransitionOutcome::Applied) => {}
                    Ok(TransitionOutcome::NoOp) => trace!("Marker {key} fired as a no-op"),
                    Err(err) => {
                        error!("Transition {key} failed; the sweep will retry: {err}")
                    }
                }
            }
        })
    }
}

/// A fairing that starts the election scheduler during Rocket ignition and
/// places it into managed state, then disarms it again on server shutdown.
/// Depends on the database and config being in managed state, so it must be
/// attached after the fairings responsible for those.
pub struct SchedulerFairing;

#[rocket::async_trait]
impl Fairing for SchedulerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election Scheduler",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        info!("Starting election scheduler...");
        let db = match rocket.state::<Database>() {
            Some(db) => db,
            None => {
                error!("Database was not available when starting the scheduler");
                return Err(rocket);
            }
        };
        let config = match rocket.state::<Config>() {
            Some(config) => config,
            None => {
                error!("Config was not available when starting the scheduler");
                return Err(rocket);
            }
        };

        let repo = Arc::new(MongoElectionRepository::from_db(db));
        let sink = Arc::new(LogSink);
        match ElectionScheduler::start(repo, sink, SchedulerConfig::from(config)).await {
            Ok(scheduler) => {
                info!("...election scheduler running!");
                Ok(rocket.manage(scheduler))
            }
            Err(err) => {
                error!("Failed to start election scheduler: {err}");
                Err(rocket)
            }
        }
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(scheduler) = rocket.state::<ElectionScheduler>() {
            scheduler.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use rocket::tokio::time::sleep;

    use crate::{
        error::Error,
        model::election::ElectionStatus,
        scheduler::testing::{MemoryRepository, RecordingSink},
    };

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            timezone: FixedOffset::east_opt(0).unwrap(),
            reminder_lead: Duration::hours(24),
            // Long enough that tests only exercise the marker path.
            sweep_interval: std::time::Duration::from_secs(600),
        }
    }

    #[rocket::async_test]
    async fn scheduling_arms_markers_for_future_transitions() {
        let now = Utc::now();
        let election = Election::example_between(
            7,
            ElectionStatus::Upcoming,
            now + Duration::hours(1),
            now + Duration::hours(48),
        );
        let repo = MemoryRepository::with(vec![]);
        let scheduler = ElectionScheduler::start(repo, RecordingSink::new(), config())
            .await
            .unwrap();

        scheduler.schedule_election_updates(&election).await.unwrap();
        // Idempotent on repeat.
        scheduler.schedule_election_updates(&election).await.unwrap();

        for kind in [
            TransitionKind::Start,
            TransitionKind::AdminMonitor,
            TransitionKind::Reminder,
            TransitionKind::End,
        ] {
            assert!(
                scheduler
                    .markers
                    .is_armed(MarkerKey::new(7, kind))
                    .await,
                "{kind} should be armed"
            );
        }
        scheduler.shutdown().await;
    }

    #[rocket::async_test]
    async fn malformed_schedule_is_rejected_without_arming() {
        let now = Utc::now();
        let mut election = Election::example_between(
            7,
            ElectionStatus::Upcoming,
            now + Duration::hours(1),
            now + Duration::hours(2),
        );
        election.start_time = "25:00:00".to_string();
        let repo = MemoryRepository::with(vec![]);
        let scheduler = ElectionScheduler::start(repo, RecordingSink::new(), config())
            .await
            .unwrap();

        let result = scheduler.schedule_election_updates(&election).await;
        assert!(matches!(result, Err(Error::MalformedSchedule(_))));
        for kind in [
            TransitionKind::Start,
            TransitionKind::AdminMonitor,
            TransitionKind::Reminder,
            TransitionKind::End,
        ] {
            assert!(!scheduler.markers.is_armed(MarkerKey::new(7, kind)).await);
        }
        scheduler.shutdown().await;
    }

    #[rocket::async_test]
    async fn overdue_transitions_are_fired_directly() {
        let now = Utc::now();
        let election = Election::example_between(
            7,
            ElectionStatus::Upcoming,
            now - Duration::hours(2),
            now - Duration::hours(1),
        );
        let repo = MemoryRepository::with(vec![]);
        let scheduler =
            ElectionScheduler::start(repo.clone(), RecordingSink::new(), config())
                .await
                .unwrap();

        // Created after startup, with dates already in the past.
        repo.insert(election.clone()).await;
        scheduler.schedule_election_updates(&election).await.unwrap();
        assert_eq!(repo.status_of(7).await, ElectionStatus::Completed);
        scheduler.shutdown().await;
    }

    #[rocket::async_test]
    async fn expired_marker_drives_the_transition_end_to_end() {
        // Whole-second resolution in the date/time fields means the armed
        // instant may round up to ~2s away.
        let now = Utc::now();
        let election = Election::example_between(
            7,
            ElectionStatus::Upcoming,
            now + Duration::seconds(2),
            now + Duration::hours(1),
        );
        let repo = MemoryRepository::with(vec![election]);
        let sink = RecordingSink::new();
        let scheduler = ElectionScheduler::start(repo.clone(), sink.clone(), config())
            .await
            .unwrap();

        assert_eq!(repo.status_of(7).await, ElectionStatus::Upcoming);
        sleep(std::time::Duration::from_secs(4)).await;

        assert_eq!(repo.status_of(7).await, ElectionStatus::Ongoing);
        assert_eq!(sink.recipients_of(TransitionKind::Start).await.len(), 3);
        assert_eq!(
            sink.recipients_of(TransitionKind::AdminMonitor).await,
            vec!["admin@example.com"]
        );
        scheduler.shutdown().await;
    }

    #[rocket::async_test]
    async fn shutdown_disarms_everything() {
        let now = Utc::now();
        let election = Election::example_between(
            7,
            ElectionStatus::Upcoming,
            now + Duration::hours(1),
            now + Duration::hours(48),
        );
        let repo = MemoryRepository::with(vec![election]);
        let scheduler = ElectionScheduler::start(repo, RecordingSink::new(), config())
            .await
            .unwrap();

        assert!(
            scheduler
                .markers
                .is_armed(MarkerKey::new(7, TransitionKind::Start))
                .await
        );
        scheduler.shutdown().await;
        assert!(
            !scheduler
                .markers
                .is_armed(MarkerKey::new(7, TransitionKind::Start))
                .await
        );
    }
}
