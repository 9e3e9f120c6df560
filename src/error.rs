use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An election's date/time fields cannot be combined into a valid
    /// instant. Raised at schedule time so the offending write is rejected,
    /// never silently defaulted.
    #[error("Malformed schedule: {0}")]
    MalformedSchedule(String),
    /// The transition marker backend could not be reached while arming.
    /// Non-fatal: the periodic sweep covers the missed marker.
    #[error("Marker store unavailable: {0}")]
    MarkerStore(String),
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::MalformedSchedule(_) => Status::BadRequest,
            Self::MarkerStore(_) | Self::Db(_) => Status::InternalServerError,
        })
    }
}
