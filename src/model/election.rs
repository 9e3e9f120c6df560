use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Our election IDs are integers.
pub type ElectionId = u32;

/// States in the election lifecycle.
///
/// Strictly forward-moving: the ordering of the variants is the ordering of
/// the state machine, so "already at or past the target" is a comparison.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElectionStatus {
    /// Scheduled but not yet open for voting.
    Upcoming,
    /// Open for voting, between the start and end instants.
    Ongoing,
    /// Voting closed. Terminal.
    Completed,
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// A voter registered on an election, as embedded in the election document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub name: String,
    pub email: String,
    /// Whether this voter has already cast their vote; reminder emails go
    /// only to voters where this is still false.
    pub is_voted: bool,
}

/// An election as stored in the database.
///
/// The voting window is given as calendar dates plus `HH:MM:SS` time-of-day
/// strings; they are only combined into absolute instants by the scheduler's
/// window computation, which rejects malformed values outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    /// Election name.
    pub name: String,
    /// Lifecycle status.
    pub status: ElectionStatus,
    /// Calendar date on which voting opens.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    /// Time of day at which voting opens, `HH:MM:SS`.
    pub start_time: String,
    /// Calendar date on which voting closes.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    /// Time of day at which voting closes, `HH:MM:SS`.
    pub end_time: String,
    /// Gate on all notification side effects for this election.
    pub email_notification: bool,
    /// Email of the creating admin, recipient of the monitor notification.
    pub admin_email: String,
    /// Registered voters.
    pub voters: Vec<Voter>,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::TimeZone;

    impl Voter {
        pub fn example(name: &str, is_voted: bool) -> Self {
            Self {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                is_voted,
            }
        }
    }

    impl Election {
        /// An election whose window is given by absolute instants; the
        /// date/time fields are derived so that window computation under a
        /// UTC reference timezone yields `start` and `end` exactly.
        pub fn example_between(
            id: ElectionId,
            status: ElectionStatus,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Self {
            let midnight = |instant: DateTime<Utc>| {
                Utc.from_utc_datetime(
                    &instant
                        .date_naive()
                        .and_hms_opt(0, 0, 0)
                        .expect("midnight is always valid"),
                )
            };
            Self {
                id,
                name: format!("Election {id}"),
                status,
                start_date: midnight(start),
                start_time: start.format("%H:%M:%S").to_string(),
                end_date: midnight(end),
                end_time: end.format("%H:%M:%S").to_string(),
                email_notification: true,
                admin_email: "admin@example.com".to_string(),
                voters: vec![
                    Voter::example("Alice", false),
                    Voter::example("Bob", true),
                    Voter::example("Carol", false),
                ],
            }
        }
    }
}
