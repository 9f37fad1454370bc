use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_config::TaskSection;
use crate::error::RoleError;
use relay_events::{ProcessId, SENTINEL, Task};
use relay_icc::{RingError, SharedRing};
use tracing::{debug, info};

/// What a producer emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPlan {
    /// A count drawn from `min..=max`, each payload drawn from `0..i32::MAX`.
    /// The range excludes the sentinel.
    Random {
        min: u64,
        max: u64,
        seed: Option<u64>,
    },
    /// Exactly these payloads, in order.
    Fixed(Vec<i32>),
}

impl TaskPlan {
    /// Plan for the producer at `index` in the pool. A configured seed is
    /// offset by the index so producers do not emit identical streams.
    pub fn from_config(tasks: &TaskSection, index: usize) -> Self {
        match &tasks.values {
            Some(values) => TaskPlan::Fixed(values.clone()),
            None => TaskPlan::Random {
                min: tasks.min,
                max: tasks.max,
                seed: tasks.seed.map(|s| s.wrapping_add(index as u64)),
            },
        }
    }
}

pub struct Producer<'a> {
    tasks: &'a SharedRing<Task>,
    plan: TaskPlan,
    id: ProcessId,
}

impl<'a> Producer<'a> {
    pub fn new(tasks: &'a SharedRing<Task>, plan: TaskPlan, id: ProcessId) -> Self {
        Producer { tasks, plan, id }
    }

    /// Publishes every task in the plan and returns how many were written.
    ///
    /// Never publishes a sentinel: a fixed plan containing one is refused
    /// before anything is written.
    pub fn run(&mut self) -> Result<u64, RoleError> {
        let written = match &self.plan {
            TaskPlan::Fixed(values) => {
                if let Some(position) = values.iter().position(|&v| v == SENTINEL) {
                    return Err(RoleError::SentinelPayload { position });
                }
                for &payload in values {
                    self.emit(payload)?;
                }
                values.len() as u64
            }
            TaskPlan::Random { min, max, seed } => {
                let mut rng = match seed {
                    Some(s) => StdRng::seed_from_u64(*s),
                    None => StdRng::from_os_rng(),
                };
                let n = rng.random_range(*min..=*max);
                debug!(producer = %self.id, n, "drew task count");
                for _ in 0..n {
                    self.emit(rng.random_range(0..i32::MAX))?;
                }
                n
            }
        };

        info!(producer = %self.id, written, "producer done");
        Ok(written)
    }

    #[inline]
    fn emit(&self, payload: i32) -> Result<(), RingError> {
        let claim = self.tasks.claim_write()?;
        self.tasks.publish(claim, Task::new(self.id, payload))
    }
}
