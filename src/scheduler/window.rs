use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::{
    error::{Error, Result},
    model::election::{Election, ElectionStatus},
    scheduler::marker::TransitionKind,
};

/// The absolute instants of one election's lifecycle transitions.
///
/// Computed fresh from the election's date/time fields whenever needed;
/// instants in the past are valid and mean the transition is already due.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElectionWindow {
    /// Voting opens; the election becomes `Ongoing`.
    pub start: DateTime<Utc>,
    /// Voting closes; the election becomes `Completed`.
    pub end: DateTime<Utc>,
    /// Reminder emails to voters who have not yet voted.
    pub reminder: DateTime<Utc>,
    /// Monitor email to the creating admin, at the start instant.
    pub admin_monitor: DateTime<Utc>,
}

impl ElectionWindow {
    /// Combine the election's date and time-of-day fields into absolute
    /// instants in the reference timezone `tz`.
    ///
    /// The reminder instant is `reminder_lead` before the end, clamped to
    /// never precede `now`. A time-of-day that fails to parse as `HH:MM:SS`
    /// is a hard error; so is a window that ends at or before its start.
    pub fn compute(
        election: &Election,
        reminder_lead: Duration,
        tz: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let start = combine(election.start_date, &election.start_time, tz)?;
        let end = combine(election.end_date, &election.end_time, tz)?;
        if end <= start {
            return Err(Error::MalformedSchedule(format!(
                "election ends at {end}, not after its start at {start}"
            )));
        }
        let reminder = std::cmp::max(end - reminder_lead, now);
        Ok(Self {
            start,
            end,
            reminder,
            admin_monitor: start,
        })
    }

    /// The status this election should hold at `now`.
    pub fn implied_status(&self, now: DateTime<Utc>) -> ElectionStatus {
        if now < self.start {
            ElectionStatus::Upcoming
        } else if now < self.end {
            ElectionStatus::Ongoing
        } else {
            ElectionStatus::Completed
        }
    }

    /// All four transitions with their fire instants.
    fn transitions(&self) -> [(TransitionKind, DateTime<Utc>); 4] {
        [
            (TransitionKind::Start, self.start),
            (TransitionKind::AdminMonitor, self.admin_monitor),
            (TransitionKind::Reminder, self.reminder),
            (TransitionKind::End, self.end),
        ]
    }

    /// Transitions already due at `now`, in firing order: chronological,
    /// with start strictly before end when both are due.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(TransitionKind, DateTime<Utc>)> {
        let mut due: Vec<_> = self
            .transitions()
            .into_iter()
            .filter(|(_, at)| *at <= now)
            .collect();
        due.sort_by_key(|(kind, at)| (*at, *kind));
        due
    }

    /// Transitions still in the future at `now`, i.e. the ones to arm.
    pub fn pending(&self, now: DateTime<Utc>) -> Vec<(TransitionKind, DateTime<Utc>)> {
        self.transitions()
            .into_iter()
            .filter(|(_, at)| *at > now)
            .collect()
    }
}

/// Apply an `HH:MM:SS` time-of-day onto a calendar date in timezone `tz`.
fn combine(date: DateTime<Utc>, time: &str, tz: FixedOffset) -> Result<DateTime<Utc>> {
    let time_of_day = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .map_err(|_| Error::MalformedSchedule(format!("invalid time of day {time:?}")))?;
    let local = date.date_naive().and_time(time_of_day);
    let instant = tz
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| Error::MalformedSchedule(format!("ambiguous local datetime {local}")))?;
    Ok(instant.with_timezone(&Utc))
}
