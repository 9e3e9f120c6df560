use std::sync::Arc;

use chrono::{Duration, FixedOffset, Utc};
use rocket::tokio::{self, task::JoinHandle, time::sleep};

use crate::{
    error::Result,
    model::{election::Election, repository::ElectionRepository},
    scheduler::{
        executor::TransitionExecutor,
        marker::{MarkerKey, MarkerStore},
        window::ElectionWindow,
    },
};

/// Compares every non-terminal election's persisted status against the
/// status implied by the current time, and corrects any drift.
///
/// Runs once at startup (recovering transitions whose markers did not
/// survive a restart) and then on a fixed interval. The sweep is the
/// authoritative correctness backstop; armed markers only exist to hit the
/// transition instants with low latency.
pub struct StatusReconciler {
    repo: Arc<dyn ElectionRepository>,
    executor: Arc<TransitionExecutor>,
    markers: Arc<dyn MarkerStore>,
    tz: FixedOffset,
    reminder_lead: Duration,
}

impl StatusReconciler {
    pub fn new(
        repo: Arc<dyn ElectionRepository>,
        executor: Arc<TransitionExecutor>,
        markers: Arc<dyn MarkerStore>,
        tz: FixedOffset,
        reminder_lead: Duration,
    ) -> Self {
        Self {
            repo,
            executor,
            markers,
            tz,
            reminder_lead,
        }
    }

    /// One full pass over all non-terminal elections.
    ///
    /// Fails only if the elections cannot be loaded at all; per-election
    /// problems are logged and skipped so one bad row cannot stall the rest.
    pub async fn reconcile(&self) -> Result<()> {
        let elections = self.repo.active_elections().await?;
        debug!("Reconciling {} active elections", elections.len());
        for election in &elections {
            if let Err(err) = self.reconcile_election(election).await {
                error!("Failed to reconcile election {}: {err}", election.id);
            }
        }
        Ok(())
    }

    /// Drive one election: fire everything already due, in chronological
    /// order (start strictly before end), and make sure every still-future
    /// transition has a marker armed.
    async fn reconcile_election(&self, election: &Election) -> Result<()> {
        let now = Utc::now();
        let window = ElectionWindow::compute(election, self.reminder_lead, self.tz, now)?;

        for (kind, at) in window.due(now) {
            trace!(
                "Election {}: {kind} was due at {at}; firing",
                election.id
            );
            self.executor.fire(election.id, kind).await?;
        }

        for (kind, at) in window.pending(now) {
            let key = MarkerKey::new(election.id, kind);
            if !self.markers.is_armed(key).await {
                if let Err(err) = self.markers.arm(key, at).await {
                    warn!("Failed to arm {key}; the next sweep will retry: {err}");
                }
            }
        }

        Ok(())
    }

    /// Run [`reconcile`](Self::reconcile) forever on the given interval.
    pub fn spawn_sweep(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if let Err(err) = reconciler.reconcile().await {
                    warn!("Periodic sweep failed; will retry next interval: {err}");
                }
            }
        })
    }
}
