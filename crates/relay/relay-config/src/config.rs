use relay_events::SENTINEL;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RelayConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: PathBuf,
    #[serde(default)]
    pub ring: RingSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub tasks: TaskSection,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RingSection {
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::poll_quantum_us")]
    pub poll_quantum_us: u64,
    /// Absent means readers poll an unready slot forever.
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PoolSection {
    #[serde(default = "defaults::producers")]
    pub producers: usize,
    #[serde(default = "defaults::workers")]
    pub workers: usize,
    #[serde(default = "defaults::loggers")]
    pub loggers: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TaskSection {
    #[serde(default = "defaults::min_tasks")]
    pub min: u64,
    #[serde(default = "defaults::max_tasks")]
    pub max: u64,
    /// Fixed payloads emitted by every producer instead of random ones.
    pub values: Option<Vec<i32>>,
    pub seed: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    use std::path::PathBuf;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn shm_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }

    pub fn capacity() -> usize {
        1024
    }

    pub fn poll_quantum_us() -> u64 {
        1
    }

    pub fn producers() -> usize {
        5
    }

    pub fn workers() -> usize {
        10
    }

    pub fn loggers() -> usize {
        2
    }

    pub fn min_tasks() -> u64 {
        10_000
    }

    pub fn max_tasks() -> u64 {
        100_000
    }
}

impl Default for RingSection {
    fn default() -> Self {
        RingSection {
            capacity: defaults::capacity(),
            poll_quantum_us: defaults::poll_quantum_us(),
            ready_timeout_ms: None,
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        PoolSection {
            producers: defaults::producers(),
            workers: defaults::workers(),
            loggers: defaults::loggers(),
        }
    }
}

impl Default for TaskSection {
    fn default() -> Self {
        TaskSection {
            min: defaults::min_tasks(),
            max: defaults::max_tasks(),
            values: None,
            seed: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            log_level: defaults::log_level(),
            shm_dir: defaults::shm_dir(),
            ring: RingSection::default(),
            pool: PoolSection::default(),
            tasks: TaskSection::default(),
        }
    }
}

impl RingSection {
    pub fn poll_quantum(&self) -> Duration {
        Duration::from_micros(self.poll_quantum_us)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let relay_config: RelayConfig = toml::from_str(s)?;
        relay_config.validate()?;
        Ok(relay_config)
    }

    /// Checks the cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.ring.capacity == 0 || self.ring.capacity > i32::MAX as usize {
            return invalid(format!(
                "ring.capacity must be in 1..={}, got {}",
                i32::MAX,
                self.ring.capacity
            ));
        }
        if self.pool.workers == 0 {
            return invalid("pool.workers must be at least 1".into());
        }
        if self.pool.loggers == 0 {
            return invalid("pool.loggers must be at least 1".into());
        }
        if self.tasks.min > self.tasks.max {
            return invalid(format!(
                "tasks.min ({}) exceeds tasks.max ({})",
                self.tasks.min, self.tasks.max
            ));
        }
        if let Some(values) = &self.tasks.values {
            if values.is_empty() {
                return invalid("tasks.values is empty, omit it for random payloads".into());
            }
            if values.contains(&SENTINEL) {
                return invalid(format!(
                    "tasks.values may not contain {SENTINEL}, it is the shutdown sentinel"
                ));
            }
        }
        Ok(())
    }
}
