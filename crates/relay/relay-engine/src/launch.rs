//! Starting role processes.
//!
//! The orchestrator never runs role logic itself. Each role is a separate OS
//! process started through a [`Launcher`]; the default [`ExecLauncher`]
//! re-executes the current binary with the role's command line, which the
//! binary parses back into a [`RoleCommand`] and hands to
//! [`RoleCommand::run`].

use crate::error::RoleError;
use crate::logger::Logger;
use crate::producer::{Producer, TaskPlan};
use crate::worker::Worker;
use clap::{Args, Subcommand};
use relay_events::{LogRecord, ProcessId, Task};
use relay_icc::{ReadyPoll, SharedRing};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Worker,
    Logger,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Producer => "producer",
            Role::Worker => "worker",
            Role::Logger => "logger",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct PollArgs {
    /// Sleep between readiness checks, in microseconds.
    #[arg(long, default_value_t = 1)]
    pub poll_quantum_us: u64,
    /// Give up on an unready slot after this many milliseconds.
    #[arg(long)]
    pub ready_timeout_ms: Option<u64>,
}

impl PollArgs {
    pub fn ready_poll(&self) -> ReadyPoll {
        ReadyPoll::new(
            Duration::from_micros(self.poll_quantum_us),
            self.ready_timeout_ms.map(Duration::from_millis),
        )
    }

    fn push_args(&self, args: &mut Vec<OsString>) {
        args.push(format!("--poll-quantum-us={}", self.poll_quantum_us).into());
        if let Some(ms) = self.ready_timeout_ms {
            args.push(format!("--ready-timeout-ms={ms}").into());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ProducerArgs {
    #[arg(long)]
    pub task_ring: PathBuf,
    /// Position in the producer pool, for diagnostics.
    #[arg(long)]
    pub index: usize,
    #[arg(long)]
    pub min_tasks: u64,
    #[arg(long)]
    pub max_tasks: u64,
    /// Comma separated payloads; replaces random generation.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub values: Option<Vec<i32>>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub poll: PollArgs,
}

impl ProducerArgs {
    pub fn from_plan(task_ring: PathBuf, index: usize, plan: &TaskPlan, poll: PollArgs) -> Self {
        let (min_tasks, max_tasks, values, seed) = match plan {
            TaskPlan::Fixed(values) => (0, 0, Some(values.clone()), None),
            TaskPlan::Random { min, max, seed } => (*min, *max, None, *seed),
        };
        ProducerArgs {
            task_ring,
            index,
            min_tasks,
            max_tasks,
            values,
            seed,
            poll,
        }
    }

    pub fn plan(&self) -> TaskPlan {
        match &self.values {
            Some(values) => TaskPlan::Fixed(values.clone()),
            None => TaskPlan::Random {
                min: self.min_tasks,
                max: self.max_tasks,
                seed: self.seed,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct WorkerArgs {
    #[arg(long)]
    pub task_ring: PathBuf,
    #[arg(long)]
    pub log_ring: PathBuf,
    #[command(flatten)]
    pub poll: PollArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LoggerArgs {
    #[arg(long)]
    pub log_ring: PathBuf,
    #[command(flatten)]
    pub poll: PollArgs,
}

/// Command line of one role process.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum RoleCommand {
    Producer(ProducerArgs),
    Worker(WorkerArgs),
    Logger(LoggerArgs),
}

impl RoleCommand {
    pub fn role(&self) -> Role {
        match self {
            RoleCommand::Producer(_) => Role::Producer,
            RoleCommand::Worker(_) => Role::Worker,
            RoleCommand::Logger(_) => Role::Logger,
        }
    }

    /// Arguments that parse back into `self`, subcommand name first.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![self.role().to_string().into()];
        match self {
            RoleCommand::Producer(p) => {
                args.push("--task-ring".into());
                args.push(p.task_ring.clone().into_os_string());
                args.push(format!("--index={}", p.index).into());
                args.push(format!("--min-tasks={}", p.min_tasks).into());
                args.push(format!("--max-tasks={}", p.max_tasks).into());
                if let Some(values) = &p.values {
                    let joined: Vec<String> = values.iter().map(i32::to_string).collect();
                    args.push(format!("--values={}", joined.join(",")).into());
                }
                if let Some(seed) = p.seed {
                    args.push(format!("--seed={seed}").into());
                }
                p.poll.push_args(&mut args);
            }
            RoleCommand::Worker(w) => {
                args.push("--task-ring".into());
                args.push(w.task_ring.clone().into_os_string());
                args.push("--log-ring".into());
                args.push(w.log_ring.clone().into_os_string());
                w.poll.push_args(&mut args);
            }
            RoleCommand::Logger(l) => {
                args.push("--log-ring".into());
                args.push(l.log_ring.clone().into_os_string());
                l.poll.push_args(&mut args);
            }
        }
        args
    }

    /// Attaches to the rings named on the command line and runs the role to
    /// completion in the calling process. Returns the number of items the
    /// role handled.
    pub fn run(&self) -> Result<u64, RoleError> {
        let me = ProcessId::current();
        match self {
            RoleCommand::Producer(p) => {
                debug!(index = p.index, pid = %me, "producer attaching");
                let tasks = SharedRing::<Task>::open(&p.task_ring, p.poll.ready_poll())?;
                Ok(Producer::new(&tasks, p.plan(), me).run()?)
            }
            RoleCommand::Worker(w) => {
                let tasks = SharedRing::<Task>::open(&w.task_ring, w.poll.ready_poll())?;
                let logs = SharedRing::<LogRecord>::open(&w.log_ring, w.poll.ready_poll())?;
                Ok(Worker::new(&tasks, &logs, me).run()?)
            }
            RoleCommand::Logger(l) => {
                let logs = SharedRing::<LogRecord>::open(&l.log_ring, l.poll.ready_poll())?;
                Logger::new(&logs, io::stdout().lock()).run()
            }
        }
    }
}

/// Starts a role as an independent process.
pub trait Launcher {
    fn launch(&self, role: &RoleCommand) -> io::Result<Child>;
}

/// Runs `program [prefix..] <role args>`, inheriting stdout and stderr.
#[derive(Debug, Clone)]
pub struct ExecLauncher {
    program: PathBuf,
    prefix: Vec<OsString>,
}

impl ExecLauncher {
    pub fn new(program: impl Into<PathBuf>, prefix: Vec<OsString>) -> Self {
        ExecLauncher {
            program: program.into(),
            prefix,
        }
    }

    /// Re-executes the running binary.
    pub fn current_exe(prefix: Vec<OsString>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, prefix))
    }
}

impl Launcher for ExecLauncher {
    fn launch(&self, role: &RoleCommand) -> io::Result<Child> {
        let args = role.to_args();
        debug!(program = %self.program.display(), ?args, "launching role");
        Command::new(&self.program)
            .args(&self.prefix)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
    }
}
