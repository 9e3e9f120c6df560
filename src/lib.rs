#[macro_use]
extern crate log;

use chrono::{Duration, FixedOffset};
use mongodb::{Client, Database};
use rocket::{fairing::AdHoc, Build, Rocket};
use serde::Deserialize;

pub mod error;
pub mod model;
pub mod notification;
pub mod scheduled_task;
pub mod scheduler;

#[cfg(not(test))]
static DATABASE: &str = "votehub";

#[cfg(test)]
static DATABASE: &str = "test";

pub async fn build() -> Result<Rocket<Build>, mongodb::error::Error> {
    let rocket = rocket::build();
    let figment = rocket.figment();

    let db_uri = figment
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    let client = Client::with_uri_str(&db_uri).await?;
    let db: Database = client.database(DATABASE);

    model::mongodb::ensure_indexes_exist(&db).await?;

    Ok(rocket
        .attach(AdHoc::config::<Config>())
        .manage(client)
        .manage(db)
        .attach(scheduler::SchedulerFairing))
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    timezone_offset: i32,
    #[serde(default = "defaults::sweep_interval")]
    sweep_interval: u64,
    #[serde(default = "defaults::reminder_lead")]
    reminder_lead: u64,
}

impl Config {
    /// Reference timezone for election date/time fields, as seconds east of
    /// UTC. Defaults to UTC.
    /// Configured via `TIMEZONE_OFFSET`.
    pub fn timezone_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset)
            .expect("`TIMEZONE_OFFSET` out of range (must be within +-86400 seconds)")
    }

    /// Seconds between reconciliation sweeps.
    /// Configured via `SWEEP_INTERVAL`.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval)
    }

    /// Seconds before an election's end at which voter reminders go out.
    /// Configured via `REMINDER_LEAD`.
    pub fn reminder_lead(&self) -> Duration {
        Duration::seconds(self.reminder_lead as i64)
    }
}

mod defaults {
    pub fn sweep_interval() -> u64 {
        60
    }

    pub fn reminder_lead() -> u64 {
        // 24 hours.
        86_400
    }
}
