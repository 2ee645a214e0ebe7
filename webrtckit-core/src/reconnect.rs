//! Reconnection policy: failure classification and backoff schedule.

use serde::Serialize;
use std::time::Duration;

pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delays for the first attempts; later attempts keep doubling the last one.
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Upper bound on any single delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconnectionState {
    Stable,
    Reconnecting { attempt: u32 },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Transient ICE trouble; the existing transport can be restarted.
    Minor,
    /// The peer connection is unusable and must be rebuilt.
    Major,
    /// Unrecoverable; no reconnection is attempted.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionStrategy {
    IceRestart,
    FullReconnection,
}

impl FailureType {
    pub fn strategy(&self) -> Option<ReconnectionStrategy> {
        match self {
            Self::Minor => Some(ReconnectionStrategy::IceRestart),
            Self::Major => Some(ReconnectionStrategy::FullReconnection),
            Self::Fatal => None,
        }
    }
}

/// Delay before the given zero-based attempt.
pub fn backoff_delay(attempt: u32) -> Duration {
    if let Some(delay) = BACKOFF_SCHEDULE.get(attempt as usize) {
        return *delay;
    }
    let last = BACKOFF_SCHEDULE[BACKOFF_SCHEDULE.len() - 1];
    let exponent = (attempt - BACKOFF_SCHEDULE.len() as u32 + 1).min(16);
    last.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}
