//! # Round Timer Coordinator
//!
//! Gives near-simultaneous joiners of the same location a shared countdown.
//!
//! The first non-silent position request for a location name starts a round
//! `countdown_ms` in the future. Requests for the same name within
//! `grace_ms` of that first request get the same deadline; after that a new
//! round starts. Entries are keyed by location *name*, so two records that
//! share a name share a countdown.
//!
//! ```text
//! t=0      Paris  -> new round, deadline 10000
//! t=5000   Paris  -> deadline 10000 (within grace)
//! t=16000  Paris  -> new round, deadline 26000
//! ```
//!
//! Expiry is lazy: an entry older than `retention_ms` is ignored on read and
//! removed by [`RoundTimers::sweep`].

use log::info;
use std::collections::HashMap;

use crate::common::config::RoundConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RoundEntry {
    created_at: i64,
    deadline: i64,
}

/// Shared round deadlines, keyed by location name.
#[derive(Debug)]
pub struct RoundTimers {
    countdown_ms: i64,
    grace_ms: i64,
    retention_ms: i64,
    rounds: HashMap<String, RoundEntry>,
}

impl Default for RoundTimers {
    fn default() -> Self {
        Self::new(&RoundConfig::default())
    }
}

impl RoundTimers {
    pub fn new(config: &RoundConfig) -> Self {
        Self {
            countdown_ms: config.countdown_ms,
            grace_ms: config.grace_ms,
            retention_ms: config.retention_ms,
            rounds: HashMap::new(),
        }
    }

    /// Deadline (epoch ms) at which the round for `name` starts.
    ///
    /// Starts a new round if there is none or the current one was started
    /// more than `grace_ms` before `now`; otherwise returns the current
    /// deadline unchanged.
    pub fn request_round_start(&mut self, name: &str, now: i64) -> i64 {
        if let Some(entry) = self.rounds.get(name) {
            if now - entry.created_at <= self.grace_ms {
                return entry.deadline;
            }
        }

        info!(
            "⏱️  Setting round start time for {} location(s) to {} ms in the future",
            name, self.countdown_ms
        );
        let entry = RoundEntry {
            created_at: now,
            deadline: now + self.countdown_ms,
        };
        self.rounds.insert(name.to_string(), entry);
        entry.deadline
    }

    /// Drop entries older than the retention period. Returns how many went.
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.rounds.len();
        let retention_ms = self.retention_ms;
        self.rounds
            .retain(|_, entry| now - entry.created_at < retention_ms);
        before - self.rounds.len()
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_deadline_within_grace() {
        let mut timers = RoundTimers::default();

        assert_eq!(timers.request_round_start("Paris", 0), 10_000);
        assert_eq!(timers.request_round_start("Paris", 5_000), 10_000);
        assert_eq!(timers.request_round_start("Paris", 15_000), 10_000);
    }

    #[test]
    fn test_new_deadline_after_grace() {
        let mut timers = RoundTimers::default();
        let t = 1_700_000_000_000;

        let first = timers.request_round_start("Paris", t);
        let again = timers.request_round_start("Paris", t + 1_000);
        let later = timers.request_round_start("Paris", t + 16_000);

        assert_eq!(first, t + 10_000);
        assert_eq!(again, first);
        assert_eq!(later, t + 16_000 + 10_000);
    }

    #[test]
    fn test_names_are_independent() {
        let mut timers = RoundTimers::default();

        assert_eq!(timers.request_round_start("Paris", 0), 10_000);
        assert_eq!(timers.request_round_start("Rome", 3_000), 13_000);
        assert_eq!(timers.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let mut timers = RoundTimers::default();
        timers.request_round_start("Paris", 0);
        timers.request_round_start("Rome", 30_000);

        assert_eq!(timers.sweep(59_999), 0);
        assert_eq!(timers.sweep(60_000), 1);
        assert_eq!(timers.len(), 1);

        // a swept name starts afresh
        assert_eq!(timers.request_round_start("Paris", 61_000), 71_000);
    }

    #[test]
    fn test_custom_config() {
        let config = RoundConfig {
            countdown_ms: 3_000,
            grace_ms: 1_000,
            retention_ms: 5_000,
            sweep_interval_secs: 1,
        };
        let mut timers = RoundTimers::new(&config);

        assert_eq!(timers.request_round_start("Oslo", 0), 3_000);
        assert_eq!(timers.request_round_start("Oslo", 1_000), 3_000);
        assert_eq!(timers.request_round_start("Oslo", 1_001), 4_001);
    }
}
