//! Process lifecycle and shutdown protocol.
//!
//! ```text
//! Setup ─► Spawn ─► Drain producers ─► W task sentinels ─► Drain workers
//!                                      ─► L log sentinels ─► Drain loggers ─► Teardown
//! ```
//!
//! Sentinels for a stage are injected only after the stage feeding it has
//! fully exited, so every genuine value is queued ahead of them. Each
//! consumer exits on the first sentinel it takes and claims are unique, so
//! W sentinels stop exactly W workers and L sentinels exactly L loggers.
//!
//! The orchestrator is the only owner of the rings. They are created before
//! any child exists and dropped only after every child has been reaped or
//! killed, on error paths too.

use crate::error::OrchestratorError;
use crate::launch::{Launcher, LoggerArgs, PollArgs, ProducerArgs, Role, RoleCommand, WorkerArgs};
use crate::producer::TaskPlan;
use relay_config::RelayConfig;
use relay_events::{LogRecord, ProcessId, Sentinel, Task};
use relay_icc::{ReadyPoll, RingConfig, RingError, SharedRing};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Exit of one role process.
#[derive(Debug, Clone)]
pub struct ChildReport {
    pub role: Role,
    pub pid: u32,
    pub status: ExitStatus,
}

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub children: Vec<ChildReport>,
    pub task_sentinels: usize,
    pub log_sentinels: usize,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ChildReport> {
        self.children.iter().filter(|c| !c.status.success())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn count(&self, role: Role) -> usize {
        self.children.iter().filter(|c| c.role == role).count()
    }
}

struct Spawned {
    role: Role,
    child: Child,
}

pub struct Orchestrator<L: Launcher> {
    config: RelayConfig,
    launcher: L,
    task_ring: PathBuf,
    log_ring: PathBuf,
}

impl<L: Launcher> Orchestrator<L> {
    pub fn new(config: RelayConfig, launcher: L) -> Self {
        let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
        let tag = format!("relay-{}-{seq}", std::process::id());
        let task_ring = config.shm_dir.join(format!("{tag}-task.ring"));
        let log_ring = config.shm_dir.join(format!("{tag}-log.ring"));
        Orchestrator {
            config,
            launcher,
            task_ring,
            log_ring,
        }
    }

    /// Backing files of the task and log rings for this run.
    pub fn ring_paths(&self) -> (&PathBuf, &PathBuf) {
        (&self.task_ring, &self.log_ring)
    }

    fn poll_args(&self) -> PollArgs {
        PollArgs {
            poll_quantum_us: self.config.ring.poll_quantum_us,
            ready_timeout_ms: self.config.ring.ready_timeout_ms,
        }
    }

    fn ring_config(&self) -> RingConfig {
        RingConfig::new(self.config.ring.capacity).with_poll(ReadyPoll::new(
            self.config.ring.poll_quantum(),
            self.config.ring.ready_timeout(),
        ))
    }

    /// Every role command of the run: producers, then workers, then loggers.
    fn commands(&self) -> Vec<RoleCommand> {
        let pool = &self.config.pool;
        let poll = self.poll_args();

        let producers = (0..pool.producers).map(|i| {
            let plan = TaskPlan::from_config(&self.config.tasks, i);
            RoleCommand::Producer(ProducerArgs::from_plan(
                self.task_ring.clone(),
                i,
                &plan,
                poll.clone(),
            ))
        });
        let workers = (0..pool.workers).map(|_| {
            RoleCommand::Worker(WorkerArgs {
                task_ring: self.task_ring.clone(),
                log_ring: self.log_ring.clone(),
                poll: poll.clone(),
            })
        });
        let loggers = (0..pool.loggers).map(|_| {
            RoleCommand::Logger(LoggerArgs {
                log_ring: self.log_ring.clone(),
                poll: poll.clone(),
            })
        });

        producers.chain(workers).chain(loggers).collect()
    }

    /// Runs the pipeline to completion.
    ///
    /// Ring setup and spawn failures abort the run. A child exiting with a
    /// failure status does not: the shutdown sequence continues and the
    /// failure is recorded in the report.
    pub fn run(&self) -> Result<RunReport, OrchestratorError> {
        let me = ProcessId::current();
        let pool = &self.config.pool;

        // Setup
        let cfg = self.ring_config();
        let tasks =
            SharedRing::<Task>::create(&self.task_ring, cfg).map_err(OrchestratorError::Setup)?;
        let logs =
            SharedRing::<LogRecord>::create(&self.log_ring, cfg).map_err(OrchestratorError::Setup)?;
        info!(
            capacity = cfg.capacity,
            task_ring = %self.task_ring.display(),
            log_ring = %self.log_ring.display(),
            "rings created"
        );

        // Spawn
        let spawned = self.spawn_all()?;
        info!(
            producers = pool.producers,
            workers = pool.workers,
            loggers = pool.loggers,
            "pipeline started"
        );
        let (producers, rest): (Vec<_>, Vec<_>) =
            spawned.into_iter().partition(|s| s.role == Role::Producer);
        let (workers, loggers): (Vec<_>, Vec<_>) =
            rest.into_iter().partition(|s| s.role == Role::Worker);

        let mut children = Vec::with_capacity(pool.producers + pool.workers + pool.loggers);

        // Drain producers, then stop workers
        match drain(producers) {
            Ok(done) => children.extend(done),
            Err(e) => {
                abort(workers);
                abort(loggers);
                return Err(e);
            }
        }
        if let Err(source) = inject(&tasks, pool.workers, me) {
            abort(workers);
            abort(loggers);
            return Err(OrchestratorError::Inject {
                role: Role::Worker,
                source,
            });
        }
        debug!(count = pool.workers, "task sentinels injected");

        // Drain workers, then stop loggers
        match drain(workers) {
            Ok(done) => children.extend(done),
            Err(e) => {
                abort(loggers);
                return Err(e);
            }
        }
        if let Err(source) = inject(&logs, pool.loggers, me) {
            abort(loggers);
            return Err(OrchestratorError::Inject {
                role: Role::Logger,
                source,
            });
        }
        debug!(count = pool.loggers, "log sentinels injected");

        children.extend(drain(loggers)?);

        // Teardown
        drop(tasks);
        drop(logs);
        info!("rings released");

        let report = RunReport {
            children,
            task_sentinels: pool.workers,
            log_sentinels: pool.loggers,
        };
        for failed in report.failures() {
            warn!(role = %failed.role, pid = failed.pid, status = %failed.status, "child failed");
        }
        Ok(report)
    }

    /// Starts every role. On the first failure, children already started
    /// are killed and reaped before the error is returned.
    fn spawn_all(&self) -> Result<Vec<Spawned>, OrchestratorError> {
        let commands = self.commands();
        let mut spawned = Vec::with_capacity(commands.len());

        for cmd in &commands {
            let role = cmd.role();
            match self.launcher.launch(cmd) {
                Ok(child) => {
                    debug!(%role, pid = child.id(), "spawned");
                    spawned.push(Spawned { role, child });
                }
                Err(source) => {
                    error!(%role, error = %source, "spawn failed, stopping started children");
                    abort(spawned);
                    return Err(OrchestratorError::Spawn { role, source });
                }
            }
        }
        Ok(spawned)
    }
}

/// Publishes `count` sentinels through the regular claim protocol.
fn inject<T: Sentinel>(ring: &SharedRing<T>, count: usize, origin: ProcessId) -> Result<(), RingError> {
    for _ in 0..count {
        let claim = ring.claim_write()?;
        ring.publish(claim, T::sentinel(origin))?;
    }
    Ok(())
}

/// Waits for every child in `pool`. If one cannot be waited on, the rest
/// are killed and reaped before the error is returned.
fn drain(pool: Vec<Spawned>) -> Result<Vec<ChildReport>, OrchestratorError> {
    let mut reports = Vec::with_capacity(pool.len());
    let mut pending = pool.into_iter();
    while let Some(Spawned { role, mut child }) = pending.next() {
        let pid = child.id();
        match child.wait() {
            Ok(status) => {
                debug!(%role, pid, %status, "reaped");
                reports.push(ChildReport { role, pid, status });
            }
            Err(source) => {
                abort(pending.collect());
                return Err(OrchestratorError::Wait { role, pid, source });
            }
        }
    }
    Ok(reports)
}

fn abort(pool: Vec<Spawned>) {
    for Spawned { role, mut child } in pool {
        let pid = child.id();
        if let Err(e) = child.kill() {
            warn!(%role, pid, error = %e, "kill failed");
        }
        if let Err(e) = child.wait() {
            warn!(%role, pid, error = %e, "reap failed");
        }
    }
}
