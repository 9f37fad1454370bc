use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use relay_config::RelayConfig;
use relay_engine::{ExecLauncher, Orchestrator, RoleCommand};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", version, about = "Multi-process task pipeline over shared-memory rings")]
struct Cli {
    /// Tracing filter directive. `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the rings, start every role and shut the pipeline down.
    Run(RunArgs),
    /// Run a single role against existing rings.
    #[command(hide = true)]
    Role {
        #[command(subcommand)]
        role: RoleCommand,
    },
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file. A missing file means defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    shm_dir: Option<PathBuf>,
    #[arg(long)]
    capacity: Option<usize>,
    #[arg(long)]
    producers: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    loggers: Option<usize>,
    #[arg(long)]
    min_tasks: Option<u64>,
    #[arg(long)]
    max_tasks: Option<u64>,
    /// Comma separated payloads emitted by every producer.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    values: Option<Vec<i32>>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    ready_timeout_ms: Option<u64>,
}

impl RunArgs {
    fn load(&self) -> anyhow::Result<RelayConfig> {
        let mut cfg = match &self.config {
            Some(path) if path.exists() => RelayConfig::load(path.display().to_string())?,
            _ => RelayConfig::default(),
        };

        if let Some(dir) = &self.shm_dir {
            cfg.shm_dir = dir.clone();
        }
        if let Some(c) = self.capacity {
            cfg.ring.capacity = c;
        }
        if let Some(ms) = self.ready_timeout_ms {
            cfg.ring.ready_timeout_ms = Some(ms);
        }
        if let Some(p) = self.producers {
            cfg.pool.producers = p;
        }
        if let Some(w) = self.workers {
            cfg.pool.workers = w;
        }
        if let Some(l) = self.loggers {
            cfg.pool.loggers = l;
        }
        if let Some(n) = self.min_tasks {
            cfg.tasks.min = n;
        }
        if let Some(m) = self.max_tasks {
            cfg.tasks.max = m;
        }
        if let Some(values) = &self.values {
            cfg.tasks.values = Some(values.clone());
        }
        if let Some(s) = self.seed {
            cfg.tasks.seed = Some(s);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: RunArgs, cli_level: Option<String>) -> anyhow::Result<()> {
    let cfg = args.load().context("invalid configuration")?;
    let level = cli_level.unwrap_or_else(|| cfg.log_level.clone());
    init_tracing(&level);

    // Children inherit the filter through the same flag.
    let prefix: Vec<OsString> = vec!["--log-level".into(), level.into(), "role".into()];
    let launcher = ExecLauncher::current_exe(prefix).context("cannot locate relay executable")?;

    let orchestrator = Orchestrator::new(cfg, launcher);
    let report = orchestrator.run().context("pipeline aborted")?;

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} role processes failed", report.children.len());
    }
    info!(children = report.children.len(), "pipeline finished");
    Ok(())
}

fn run_role(role: RoleCommand, cli_level: Option<String>) -> anyhow::Result<()> {
    init_tracing(cli_level.as_deref().unwrap_or("info"));
    let name = role.role();
    let count = role.run().with_context(|| format!("{name} failed"))?;
    info!(role = %name, pid = std::process::id(), count, "role finished");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args, cli.log_level),
        Command::Role { role } => run_role(role, cli.log_level),
    }
}
