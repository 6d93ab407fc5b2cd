use std::fmt;

use nest_sync_event_store::StorageError;
use thiserror::Error;

use crate::decoder::DecodeError;

/// Terminal disposition of a pulled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processed; the broker must not redeliver it
    Acknowledge,
    /// Not processed; the broker should redeliver it
    Release,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// One acknowledge or release call that did not go through.
#[derive(Debug, Error)]
#[error("failed to {action} {} message(s): {source}", .ack_ids.len())]
pub struct FailedDisposition {
    pub action: Disposition,
    pub ack_ids: Vec<String>,
    pub source: nest_sync_pubsub::Error,
}

/// The acknowledge and/or release round-trip of a batch failed.
///
/// The affected messages are left leased; the broker redelivers them once
/// their ack deadline expires.
#[derive(Debug, Error)]
#[error("{}", join_failures(.failures))]
pub struct DispositionError {
    pub failures: Vec<FailedDisposition>,
}

impl DispositionError {
    pub fn failed(&self, action: Disposition) -> bool {
        self.failures.iter().any(|f| f.action == action)
    }
}

fn join_failures(failures: &[FailedDisposition]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Disposition error: {0}")]
    Disposition(#[from] DispositionError),

    #[error("Broker error: {0}")]
    Broker(#[from] nest_sync_pubsub::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
