//! Time budgets enforced by the watchdog

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest budget accepted for either phase
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Wall-clock budgets for initialization and for each run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Budget for materializing the interpreter and preloading packages
    #[serde(with = "humantime_serde")]
    pub init: Duration,

    /// Budget for a single run, including on-demand package loads
    #[serde(with = "humantime_serde")]
    pub run: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(60),
            run: Duration::from_secs(15),
        }
    }
}

impl Timeouts {
    pub fn new(init: Duration, run: Duration) -> Self {
        Self { init, run }
    }

    /// Short budgets for quick exercises
    pub fn strict() -> Self {
        Self {
            init: Duration::from_secs(20),
            run: Duration::from_secs(5),
        }
    }

    /// Generous budgets for data-heavy lessons (pandas, matplotlib)
    pub fn permissive() -> Self {
        Self {
            init: Duration::from_secs(180),
            run: Duration::from_secs(120),
        }
    }

    /// Initialization includes fetching the runtime, so it must outlast a run
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.run.is_zero() {
            return Err(SandboxError::Config(
                "run timeout must be greater than zero".to_string(),
            ));
        }
        if self.init > MAX_BUDGET || self.run > MAX_BUDGET {
            return Err(SandboxError::Config(format!(
                "timeouts may not exceed {:?} (init {:?}, run {:?})",
                MAX_BUDGET, self.init, self.run
            )));
        }
        if self.init <= self.run {
            return Err(SandboxError::Config(format!(
                "init timeout ({:?}) must be longer than run timeout ({:?})",
                self.init, self.run
            )));
        }
        Ok(())
    }
}
