use crate::shared_ring::Claim;
use std::io;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("failed to map ring file '{path}'")]
    Map {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("semaphore {op} failed")]
    Semaphore {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid ring '{path}': {reason}")]
    Layout { path: String, reason: &'static str },

    /// The claim is handed back; it can be consumed once the slot is ready.
    #[error("slot {} (cursor {}) consumed before it was ready", .claim.index(), .claim.cursor())]
    NotReady { claim: Claim },

    #[error("slot {} (cursor {}) not ready after {waited:?}", .claim.index(), .claim.cursor())]
    ReadyTimeout { claim: Claim, waited: Duration },

    #[error("slot {} (cursor {}) still occupied after {waited:?}", .claim.index(), .claim.cursor())]
    VacancyTimeout { claim: Claim, waited: Duration },
}

impl RingError {
    pub(crate) fn semaphore(op: &'static str) -> impl FnOnce(io::Error) -> RingError {
        move |source| RingError::Semaphore { op, source }
    }

    /// The unfinished claim carried by a refused or timed out slot operation.
    ///
    /// Its cursor and semaphore permit are already spent, so the caller must
    /// finish it (`publish`, or `wait_ready` then `consume`) or the slot is
    /// stranded.
    pub fn into_claim(self) -> Option<Claim> {
        match self {
            RingError::NotReady { claim }
            | RingError::ReadyTimeout { claim, .. }
            | RingError::VacancyTimeout { claim, .. } => Some(claim),
            _ => None,
        }
    }
}
