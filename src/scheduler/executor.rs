use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use rocket::tokio::{self, sync::Mutex};

use crate::{
    error::Result,
    model::{
        election::{Election, ElectionId, ElectionStatus, Voter},
        repository::ElectionRepository,
    },
    notification::NotificationSink,
    scheduler::{
        marker::{MarkerKey, MarkerStore, TransitionKind},
        window::ElectionWindow,
    },
};

/// What a fired transition amounted to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status change and/or notifications were applied.
    Applied,
    /// The transition had already taken effect, or was not applicable.
    /// A normal outcome, not an error.
    NoOp,
}

/// Applies one transition to one election: persists the status change and
/// dispatches the associated notifications.
///
/// Both the marker expiry path and the reconciler funnel into [`fire`],
/// which may therefore be invoked any number of times for the same
/// `(election, kind)`; duplicates degrade to no-ops after the first.
///
/// [`fire`]: TransitionExecutor::fire
pub struct TransitionExecutor {
    repo: Arc<dyn ElectionRepository>,
    sink: Arc<dyn NotificationSink>,
    markers: Arc<dyn MarkerStore>,
    tz: FixedOffset,
    reminder_lead: Duration,
    /// Notification-only kinds already sent by this process. Start and end
    /// are deduplicated by the persisted status instead.
    fired_notifications: Mutex<HashSet<MarkerKey>>,
}

impl TransitionExecutor {
    pub fn new(
        repo: Arc<dyn ElectionRepository>,
        sink: Arc<dyn NotificationSink>,
        markers: Arc<dyn MarkerStore>,
        tz: FixedOffset,
        reminder_lead: Duration,
    ) -> Self {
        Self {
            repo,
            sink,
            markers,
            tz,
            reminder_lead,
            fired_notifications: Default::default(),
        }
    }

    /// Apply the given transition to the given election.
    ///
    /// Repository errors propagate (the periodic sweep retries them);
    /// notification failures are logged and absorbed.
    pub async fn fire(
        &self,
        election_id: ElectionId,
        kind: TransitionKind,
    ) -> Result<TransitionOutcome> {
        let election = match self.repo.find_election(election_id).await? {
            Some(election) => election,
            None => {
                warn!("Transition {kind} fired for unknown election {election_id}");
                return Ok(TransitionOutcome::NoOp);
            }
        };
        let now = Utc::now();
        let window = ElectionWindow::compute(&election, self.reminder_lead, self.tz, now)?;

        match kind {
            TransitionKind::Start => self.fire_start(&election, &window, now).await,
            TransitionKind::End => self.fire_end(&election, &window, now).await,
            TransitionKind::Reminder => self.fire_reminder(&election, &window, now).await,
            TransitionKind::AdminMonitor => self.fire_admin_monitor(&election, &window, now).await,
        }
    }

    async fn fire_start(
        &self,
        election: &Election,
        window: &ElectionWindow,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        if election.status >= ElectionStatus::Ongoing {
            debug!("Start of election {} has already been applied", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        // A stale marker from an edited schedule can fire early.
        if now < window.start {
            debug!("Start of election {} is not due yet", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        let advanced = self
            .repo
            .advance_status(election.id, ElectionStatus::Upcoming, ElectionStatus::Ongoing)
            .await?;
        if !advanced {
            debug!("Start of election {} lost the race; nothing to do", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        info!("Election {} is now ongoing", election.id);

        if election.email_notification {
            self.dispatch_voter_emails(election, TransitionKind::Start, election.voters.clone());
        }

        // The end marker was armed at schedule time, but a restart since
        // then may have lost it.
        let end_key = MarkerKey::new(election.id, TransitionKind::End);
        if window.end > now && !self.markers.is_armed(end_key).await {
            if let Err(err) = self.markers.arm(end_key, window.end).await {
                warn!(
                    "Failed to re-arm end of election {}; the sweep will cover it: {err}",
                    election.id
                );
            }
        }

        Ok(TransitionOutcome::Applied)
    }

    async fn fire_end(
        &self,
        election: &Election,
        window: &ElectionWindow,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        // A stale marker from an edited schedule can fire early.
        if now < window.end {
            debug!("End of election {} is not due yet", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        match election.status {
            ElectionStatus::Completed => {
                debug!("End of election {} has already been applied", election.id);
                Ok(TransitionOutcome::NoOp)
            }
            ElectionStatus::Upcoming => {
                // Never skip a state: let the next sweep apply start first.
                debug!(
                    "End of election {} is due but its start has not been applied yet; deferring",
                    election.id
                );
                Ok(TransitionOutcome::NoOp)
            }
            ElectionStatus::Ongoing => {
                let advanced = self
                    .repo
                    .advance_status(
                        election.id,
                        ElectionStatus::Ongoing,
                        ElectionStatus::Completed,
                    )
                    .await?;
                if !advanced {
                    debug!("End of election {} lost the race; nothing to do", election.id);
                    return Ok(TransitionOutcome::NoOp);
                }
                info!("Election {} is now completed", election.id);
                // Terminal: the notification dedup entries are no longer
                // needed, so they do not accumulate across elections.
                let mut fired = self.fired_notifications.lock().await;
                fired.remove(&MarkerKey::new(election.id, TransitionKind::Reminder));
                fired.remove(&MarkerKey::new(election.id, TransitionKind::AdminMonitor));
                Ok(TransitionOutcome::Applied)
            }
        }
    }

    async fn fire_reminder(
        &self,
        election: &Election,
        window: &ElectionWindow,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        if election.status == ElectionStatus::Completed
            || window.implied_status(now) != ElectionStatus::Ongoing
        {
            debug!(
                "Reminder for election {} is outside the voting window",
                election.id
            );
            return Ok(TransitionOutcome::NoOp);
        }
        // A stale marker from an edited schedule can fire early.
        if window.end - self.reminder_lead > now {
            debug!("Reminder for election {} is not due yet", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        let key = MarkerKey::new(election.id, TransitionKind::Reminder);
        if !self.fired_notifications.lock().await.insert(key) {
            debug!("Reminder for election {} has already been sent", election.id);
            return Ok(TransitionOutcome::NoOp);
        }

        if election.email_notification {
            let unvoted: Vec<Voter> = election
                .voters
                .iter()
                .filter(|voter| !voter.is_voted)
                .cloned()
                .collect();
            if unvoted.is_empty() {
                debug!("Every voter of election {} has voted; no reminders", election.id);
            } else {
                self.dispatch_voter_emails(election, TransitionKind::Reminder, unvoted);
            }
        }

        Ok(TransitionOutcome::Applied)
    }

    async fn fire_admin_monitor(
        &self,
        election: &Election,
        window: &ElectionWindow,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        if now < window.start {
            debug!("Admin monitor for election {} is not due yet", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        if now >= window.end {
            debug!("Admin monitor for election {} fired after its end", election.id);
            return Ok(TransitionOutcome::NoOp);
        }
        let key = MarkerKey::new(election.id, TransitionKind::AdminMonitor);
        if !self.fired_notifications.lock().await.insert(key) {
            debug!(
                "Admin monitor for election {} has already been sent",
                election.id
            );
            return Ok(TransitionOutcome::NoOp);
        }

        if election.email_notification {
            let sink = Arc::clone(&self.sink);
            let election = election.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.send_admin_monitor_email(&election).await {
                    warn!(
                        "Admin monitor email for election {} failed: {err}",
                        election.id
                    );
                }
            });
        }

        Ok(TransitionOutcome::Applied)
    }

    /// Fan an email out to the given voters, one send per recipient, without
    /// blocking the transition on delivery. One failing recipient does not
    /// prevent delivery attempts to the others.
    fn dispatch_voter_emails(
        &self,
        election: &Election,
        kind: TransitionKind,
        recipients: Vec<Voter>,
    ) {
        let sink = Arc::clone(&self.sink);
        let election = election.clone();
        tokio::spawn(async move {
            let total = recipients.len();
            let mut failures = 0usize;
            for voter in &recipients {
                let sent = match kind {
                    TransitionKind::Start => sink.send_start_email(&election, voter).await,
                    TransitionKind::Reminder => sink.send_reminder_email(&election, voter).await,
                    _ => return,
                };
                if let Err(err) = sent {
                    warn!("{kind} email for election {} failed: {err}", election.id);
                    failures += 1;
                }
            }
            if failures > 0 {
                warn!(
                    "{kind} emails for election {}: {failures} of {total} failed",
                    election.id
                );
            } else {
                debug!(
                    "{kind} emails for election {} dispatched to {total} voters",
                    election.id
                );
            }
        });
    }
}
