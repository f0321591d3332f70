//! Watchdog - bounds the wall-clock time of initialization and of each run
//!
//! The session driver owns one `Watchdog` and races [`Watchdog::expired`]
//! against host events. At most one timer is armed at a time, and every armed
//! timer ends exactly once: cancelled by a terminal event, or fired.

use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Deadline used when `now + budget` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What the armed timer is guarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchPhase {
    Init,
    Run,
}

/// Lifetime counters; `armed == cancelled + fired (+1 while armed)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogStats {
    pub armed: u64,
    pub cancelled: u64,
    pub fired: u64,
}

impl WatchdogStats {
    /// Timers armed but not yet cancelled or fired
    pub fn outstanding(&self) -> u64 {
        self.armed - self.cancelled - self.fired
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    phase: WatchPhase,
    budget: Duration,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct Watchdog {
    armed: Option<ArmedTimer>,
    stats: WatchdogStats,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `phase`. A timer that is still armed is cancelled first.
    pub fn arm(&mut self, phase: WatchPhase, budget: Duration) {
        if self.cancel().is_some() {
            debug!("Re-arming watchdog; previous timer cancelled");
        }
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.armed = Some(ArmedTimer {
            phase,
            budget,
            deadline,
        });
        self.stats.armed += 1;
        debug!(?phase, ?budget, "Watchdog armed");
    }

    /// Cancel the armed timer, returning its phase
    pub fn cancel(&mut self) -> Option<WatchPhase> {
        let timer = self.armed.take()?;
        self.stats.cancelled += 1;
        debug!(phase = ?timer.phase, "Watchdog cancelled");
        Some(timer.phase)
    }

    /// Record that the armed timer fired, returning its phase and budget
    pub fn fire(&mut self) -> Option<(WatchPhase, Duration)> {
        let timer = self.armed.take()?;
        self.stats.fired += 1;
        warn!(phase = ?timer.phase, budget = ?timer.budget, "Watchdog fired");
        Some((timer.phase, timer.budget))
    }

    pub fn armed_phase(&self) -> Option<WatchPhase> {
        self.armed.map(|timer| timer.phase)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }

    /// Resolves when the armed deadline passes; pends forever when disarmed
    pub async fn expired(&self) -> WatchPhase {
        match self.armed {
            Some(timer) => {
                sleep_until(timer.deadline).await;
                timer.phase
            }
            None => std::future::pending().await,
        }
    }
}
