use crate::launch::Role;
use relay_icc::RingError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("failed to write log output")]
    Output(#[from] io::Error),

    #[error("scripted payload #{position} is the shutdown sentinel")]
    SentinelPayload { position: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to set up shared ring")]
    Setup(#[source] RingError),

    #[error("failed to spawn {role} process")]
    Spawn {
        role: Role,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for {role} process {pid}")]
    Wait {
        role: Role,
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to inject {role} sentinels")]
    Inject {
        role: Role,
        #[source]
        source: RingError,
    },
}
