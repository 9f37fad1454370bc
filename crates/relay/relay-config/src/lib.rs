mod config;

pub use config::{ConfigError, PoolSection, RelayConfig, RingSection, TaskSection};
