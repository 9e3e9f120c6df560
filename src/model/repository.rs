use mongodb::{bson::doc, Database};
use rocket::futures::TryStreamExt;

use crate::{
    error::Result,
    model::{
        election::{Election, ElectionId, ElectionStatus},
        mongodb::{election_id_filter, Coll},
    },
};

/// Access to persisted elections, as needed by the scheduler.
///
/// The full CRUD surface lives with the HTTP layer; the scheduler only ever
/// reads election rows and advances their status.
#[rocket::async_trait]
pub trait ElectionRepository: Send + Sync {
    /// Load a single election with its voters and creator.
    async fn find_election(&self, id: ElectionId) -> Result<Option<Election>>;

    /// Load every election that has not yet completed.
    async fn active_elections(&self) -> Result<Vec<Election>>;

    /// Advance an election's status, conditional on the expected prior
    /// status. Returns false if the election was not in the `from` status,
    /// e.g. because a concurrent transition got there first.
    async fn advance_status(
        &self,
        id: ElectionId,
        from: ElectionStatus,
        to: ElectionStatus,
    ) -> Result<bool>;
}

/// The production repository, over the `elections` collection.
pub struct MongoElectionRepository {
    elections: Coll<Election>,
}

impl MongoElectionRepository {
    pub fn from_db(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl ElectionRepository for MongoElectionRepository {
    async fn find_election(&self, id: ElectionId) -> Result<Option<Election>> {
        let election = self.elections.find_one(election_id_filter(id), None).await?;
        Ok(election)
    }

    async fn active_elections(&self) -> Result<Vec<Election>> {
        let filter = doc! {
            "status": {"$ne": ElectionStatus::Completed},
        };
        let elections = self
            .elections
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(elections)
    }

    async fn advance_status(
        &self,
        id: ElectionId,
        from: ElectionStatus,
        to: ElectionStatus,
    ) -> Result<bool> {
        let filter = doc! {
            "_id": id,
            "status": from,
        };
        let update = doc! {
            "$set": {
                "status": to,
            }
        };
        let result = self.elections.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }
}
