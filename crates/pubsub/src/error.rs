use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pub/Sub returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Broker is closed")]
    Closed,

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl Error {
    /// Whether retrying the same call cannot succeed.
    ///
    /// Client errors other than request timeout and rate limiting (bad
    /// credentials, missing subscription) and a closed broker are permanent.
    /// Transport failures and server errors are not.
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Status { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            Error::InvalidConfig(_) | Error::Closed => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
