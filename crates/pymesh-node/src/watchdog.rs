//! Single-leader watchdog
//!
//! A leader that has never seen another router is most likely cut off by a
//! radio or partition fault. Once that condition has held without a break for
//! the configured dwell, the node restarts itself.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::WatchdogConfig;

/// Tracks how long this node has been a lone leader
#[derive(Debug, Clone)]
pub struct SingleLeaderWatchdog {
    config: WatchdogConfig,
    since: Option<Instant>,
}

impl SingleLeaderWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            since: None,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// How long the condition has held so far
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    /// Feed one tick's observation; true when a restart is due
    ///
    /// Any tick where the node is not a lone leader resets the timer. The
    /// timer also resets when it fires.
    pub fn observe(&mut self, single_leader: bool, now: Instant) -> bool {
        if !self.config.enabled || !single_leader {
            if self.since.take().is_some() {
                debug!("Single-leader condition cleared");
            }
            return false;
        }

        let since = *self.since.get_or_insert_with(|| {
            debug!(dwell_secs = self.config.dwell.as_secs(), "Single-leader condition started");
            now
        });
        let elapsed = now.saturating_duration_since(since);
        if elapsed < self.config.dwell {
            return false;
        }

        warn!(elapsed_secs = elapsed.as_secs(), "Lone leader for too long, restart due");
        self.since = None;
        true
    }

    pub fn reset(&mut self) {
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_fires_after_dwell() {
        let mut watchdog = SingleLeaderWatchdog::new(WatchdogConfig::default());
        let t0 = Instant::now();

        assert!(!watchdog.observe(true, t0));
        assert!(!watchdog.observe(true, t0 + secs(170)));
        assert_eq!(watchdog.elapsed(t0 + secs(170)), secs(170));
        assert!(watchdog.observe(true, t0 + secs(180)));

        // timer starts over after firing
        assert_eq!(watchdog.elapsed(t0 + secs(180)), Duration::ZERO);
        assert!(!watchdog.observe(true, t0 + secs(190)));
    }

    #[test]
    fn test_interruption_resets() {
        let mut watchdog = SingleLeaderWatchdog::new(WatchdogConfig::default());
        let t0 = Instant::now();

        watchdog.observe(true, t0);
        watchdog.observe(true, t0 + secs(170));
        assert!(!watchdog.observe(false, t0 + secs(175)));
        assert!(!watchdog.observe(true, t0 + secs(180)));
        assert!(!watchdog.observe(true, t0 + secs(359)));
        assert!(watchdog.observe(true, t0 + secs(360)));
    }

    #[test]
    fn test_disabled_never_fires() {
        let mut watchdog = SingleLeaderWatchdog::new(WatchdogConfig::disabled());
        let t0 = Instant::now();
        watchdog.observe(true, t0);
        assert!(!watchdog.observe(true, t0 + secs(3600)));
    }
}
