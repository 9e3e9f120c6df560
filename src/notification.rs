use thiserror::Error;

use crate::model::election::{Election, Voter};

/// A single email that could not be delivered.
///
/// Always absorbed by the transition executor: one failing recipient never
/// blocks delivery to the others, and never rolls back a status change.
#[derive(Debug, Error)]
#[error("failed to deliver to {recipient}: {reason}")]
pub struct NotificationError {
    pub recipient: String,
    pub reason: String,
}

/// The email-delivery collaborator.
///
/// Sends are per-recipient so the executor owns the fan-out and can isolate
/// individual delivery failures. Implementations compose and deliver the
/// actual messages; the scheduler never blocks a transition on them.
#[rocket::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Tell one voter that the election has opened.
    async fn send_start_email(
        &self,
        election: &Election,
        voter: &Voter,
    ) -> Result<(), NotificationError>;

    /// Remind one voter who has not yet voted that the election is closing.
    async fn send_reminder_email(
        &self,
        election: &Election,
        voter: &Voter,
    ) -> Result<(), NotificationError>;

    /// Tell the creating admin that their election has opened.
    async fn send_admin_monitor_email(&self, election: &Election) -> Result<(), NotificationError>;
}

/// A sink that only writes to the log; stands in until a real mailer is
/// wired up, and useful for local deployments.
pub struct LogSink;

#[rocket::async_trait]
impl NotificationSink for LogSink {
    async fn send_start_email(
        &self,
        election: &Election,
        voter: &Voter,
    ) -> Result<(), NotificationError> {
        info!(
            "[email] election {} started; notifying {}",
            election.id, voter.email
        );
        Ok(())
    }

    async fn send_reminder_email(
        &self,
        election: &Election,
        voter: &Voter,
    ) -> Result<(), NotificationError> {
        info!(
            "[email] election {} closing soon; reminding {}",
            election.id, voter.email
        );
        Ok(())
    }

    async fn send_admin_monitor_email(&self, election: &Election) -> Result<(), NotificationError> {
        info!(
            "[email] election {} started; monitor notice to {}",
            election.id, election.admin_email
        );
        Ok(())
    }
}
