//! Producer, worker and logger roles, and the orchestrator that runs them
//! as separate processes over two shared rings.

mod error;
mod launch;
mod logger;
mod orchestrator;
mod producer;
mod worker;

#[cfg(test)]
mod test_support;

pub use error::{OrchestratorError, RoleError};
pub use launch::{ExecLauncher, Launcher, LoggerArgs, PollArgs, ProducerArgs, Role, RoleCommand, WorkerArgs};
pub use logger::Logger;
pub use orchestrator::{ChildReport, Orchestrator, RunReport};
pub use producer::{Producer, TaskPlan};
pub use worker::Worker;
