//! In-memory collaborator fakes shared by the scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rocket::tokio::{sync::Mutex, time::sleep};

use crate::{
    error::Result,
    model::{
        election::{Election, ElectionId, ElectionStatus, Voter},
        repository::ElectionRepository,
    },
    notification::{NotificationError, NotificationSink},
    scheduler::marker::TransitionKind,
};

/// Give spawned notification dispatch tasks a chance to run.
pub async fn settle() {
    sleep(std::time::Duration::from_millis(50)).await;
}

/// An election repository over a hash map, recording every status write.
pub struct MemoryRepository {
    elections: Mutex<HashMap<ElectionId, Election>>,
    status_writes: Mutex<Vec<(ElectionId, ElectionStatus)>>,
}

impl MemoryRepository {
    pub fn with(elections: Vec<Election>) -> Arc<Self> {
        Arc::new(Self {
            elections: Mutex::new(
                elections
                    .into_iter()
                    .map(|election| (election.id, election))
                    .collect(),
            ),
            status_writes: Mutex::new(Vec::new()),
        })
    }

    pub async fn insert(&self, election: Election) {
        self.elections.lock().await.insert(election.id, election);
    }

    pub async fn status_of(&self, id: ElectionId) -> ElectionStatus {
        self.elections.lock().await[&id].status
    }

    pub async fn status_writes(&self) -> Vec<(ElectionId, ElectionStatus)> {
        self.status_writes.lock().await.clone()
    }
}

#[rocket::async_trait]
impl ElectionRepository for MemoryRepository {
    async fn find_election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.elections.lock().await.get(&id).cloned())
    }

    async fn active_elections(&self) -> Result<Vec<Election>> {
        Ok(self
            .elections
            .lock()
            .await
            .values()
            .filter(|election| election.status != ElectionStatus::Completed)
            .cloned()
            .collect())
    }

    async fn advance_status(
        &self,
        id: ElectionId,
        from: ElectionStatus,
        to: ElectionStatus,
    ) -> Result<bool> {
        let mut elections = self.elections.lock().await;
        match elections.get_mut(&id) {
            Some(election) if election.status == from => {
                election.status = to;
                self.status_writes.lock().await.push((id, to));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// One delivery attempt observed by the recording sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub kind: TransitionKind,
    pub recipient: String,
}

/// A notification sink that records successful sends and can be told to
/// fail for specific recipient addresses.
pub struct RecordingSink {
    sent: Mutex<Vec<SentEmail>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub async fn fail_for(&self, email: &str) {
        self.failing.lock().await.insert(email.to_string());
    }

    pub async fn recipients_of(&self, kind: TransitionKind) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|email| email.kind == kind)
            .map(|email| email.recipient.clone())
            .collect()
    }

    async fn deliver(
        &self,
        kind: TransitionKind,
        recipient: &str,
    ) -> std::result::Result<(), NotificationError> {
        if self.failing.lock().await.contains(recipient) {
            return Err(NotificationError {
                recipient: recipient.to_string(),
                reason: "simulated delivery failure".to_string(),
            });
        }
        self.sent.lock().await.push(SentEmail {
            kind,
            recipient: recipient.to_string(),
        });
        Ok(())
    }
}

#[rocket::async_trait]
impl NotificationSink for RecordingSink {
    async fn send_start_email(
        &self,
        _election: &Election,
        voter: &Voter,
    ) -> std::result::Result<(), NotificationError> {
        self.deliver(TransitionKind::Start, &voter.email).await
    }

    async fn send_reminder_email(
        &self,
        _election: &Election,
        voter: &Voter,
    ) -> std::result::Result<(), NotificationError> {
        self.deliver(TransitionKind::Reminder, &voter.email).await
    }

    async fn send_admin_monitor_email(
        &self,
        election: &Election,
    ) -> std::result::Result<(), NotificationError> {
        self.deliver(TransitionKind::AdminMonitor, &election.admin_email)
            .await
    }
}
