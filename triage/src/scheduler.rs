//! Per-item reclassification state machine
//!
//! ```text
//! Idle --signal--> Polling(0)
//! Polling(n) --changed--> Dispatching
//! Polling(n) --unchanged, n < max--> Polling(n+1)   (after `interval`)
//! Polling(max) --unchanged--> Dispatching           (degraded)
//! Dispatching --finish--> Idle
//! any --item missing / abort--> Idle
//! ```
//!
//! The scheduler only decides; the pipeline owns the timers and the
//! classification jobs. Each activation carries a ticket so that a timer or
//! job belonging to an aborted activation is recognised as stale.

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::SchedulerConfig;

pub type Ticket = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { attempt: u32 },
    Dispatching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            interval: Duration::from_millis(250),
        }
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            interval: config.poll_interval(),
        }
    }
}

/// What one poll saw in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The item is no longer in the document
    Missing,
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Commit the fingerprint and classify. `degraded` when the retry
    /// budget ran out without seeing a change.
    Dispatch { degraded: bool, attempts: u32 },
    /// Poll again after `delay`
    Retry { attempt: u32, delay: Duration },
    /// The item disappeared; its bookkeeping was dropped
    Abort,
    /// The ticket does not belong to a polling activation
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Activation {
    state: PollState,
    ticket: Ticket,
}

#[derive(Debug, Default)]
pub struct ReclassificationScheduler {
    policy: RetryPolicy,
    active: HashMap<String, Activation>,
    next_ticket: Ticket,
}

impl ReclassificationScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            active: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self, item_id: &str) -> PollState {
        self.active
            .get(item_id)
            .map(|a| a.state)
            .unwrap_or(PollState::Idle)
    }

    /// Number of items polling or dispatching
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Handle an external change signal. Starts `Polling(0)` and returns its
    /// ticket, or `None` when the item already has a running activation
    /// (that activation will observe the latest content).
    pub fn signal(&mut self, item_id: &str) -> Option<Ticket> {
        if let Some(existing) = self.active.get(item_id) {
            debug!(item_id = %item_id, state = ?existing.state, "Coalescing change signal");
            return None;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.active.insert(
            item_id.to_string(),
            Activation {
                state: PollState::Polling { attempt: 0 },
                ticket,
            },
        );
        Some(ticket)
    }

    /// Advance a polling activation with what the document currently shows.
    pub fn poll(&mut self, item_id: &str, ticket: Ticket, observation: Observation) -> PollDecision {
        let activation = match self.active.get_mut(item_id) {
            Some(a) if a.ticket == ticket => a,
            _ => return PollDecision::Stale,
        };

        let attempt = match activation.state {
            PollState::Polling { attempt } => attempt,
            _ => return PollDecision::Stale,
        };

        match observation {
            Observation::Missing => {
                self.active.remove(item_id);
                PollDecision::Abort
            }
            Observation::Changed => {
                activation.state = PollState::Dispatching;
                PollDecision::Dispatch {
                    degraded: false,
                    attempts: attempt + 1,
                }
            }
            Observation::Unchanged if attempt < self.policy.max_retries => {
                activation.state = PollState::Polling {
                    attempt: attempt + 1,
                };
                PollDecision::Retry {
                    attempt: attempt + 1,
                    delay: self.policy.interval,
                }
            }
            Observation::Unchanged => {
                activation.state = PollState::Dispatching;
                PollDecision::Dispatch {
                    degraded: true,
                    attempts: attempt + 1,
                }
            }
        }
    }

    /// Complete a dispatch. Returns false when the activation was aborted
    /// (or replaced) while the classification was in flight.
    pub fn finish(&mut self, item_id: &str, ticket: Ticket) -> bool {
        match self.active.get(item_id) {
            Some(a) if a.ticket == ticket && a.state == PollState::Dispatching => {
                self.active.remove(item_id);
                true
            }
            _ => false,
        }
    }

    /// Drop an item's activation, whatever its state.
    pub fn abort(&mut self, item_id: &str) -> bool {
        self.active.remove(item_id).is_some()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_dispatches_immediately() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        assert_eq!(scheduler.state("a"), PollState::Polling { attempt: 0 });

        let decision = scheduler.poll("a", ticket, Observation::Changed);
        assert_eq!(
            decision,
            PollDecision::Dispatch {
                degraded: false,
                attempts: 1
            }
        );
        assert_eq!(scheduler.state("a"), PollState::Dispatching);

        assert!(scheduler.finish("a", ticket));
        assert_eq!(scheduler.state("a"), PollState::Idle);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_unchanged_polls_terminate_after_max_plus_one() {
        for max_retries in [0, 1, 3, 10] {
            let policy = RetryPolicy {
                max_retries,
                interval: Duration::from_millis(250),
            };
            let mut scheduler = ReclassificationScheduler::new(policy);
            let ticket = scheduler.signal("a").unwrap();

            let mut polls = 0;
            let decision = loop {
                polls += 1;
                match scheduler.poll("a", ticket, Observation::Unchanged) {
                    PollDecision::Retry { attempt, delay } => {
                        assert_eq!(attempt, polls);
                        assert_eq!(delay, Duration::from_millis(250));
                    }
                    other => break other,
                }
                assert!(polls <= max_retries, "scheduler kept polling");
            };

            assert_eq!(polls, max_retries + 1);
            assert_eq!(
                decision,
                PollDecision::Dispatch {
                    degraded: true,
                    attempts: max_retries + 1
                }
            );
        }
    }

    #[test]
    fn test_change_after_some_retries() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        scheduler.poll("a", ticket, Observation::Unchanged);
        scheduler.poll("a", ticket, Observation::Unchanged);
        assert_eq!(scheduler.state("a"), PollState::Polling { attempt: 2 });

        assert_eq!(
            scheduler.poll("a", ticket, Observation::Changed),
            PollDecision::Dispatch {
                degraded: false,
                attempts: 3
            }
        );
    }

    #[test]
    fn test_missing_item_aborts() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        assert_eq!(
            scheduler.poll("a", ticket, Observation::Missing),
            PollDecision::Abort
        );
        assert_eq!(scheduler.state("a"), PollState::Idle);
    }

    #[test]
    fn test_duplicate_signals_coalesce() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        assert!(scheduler.signal("a").is_none());

        scheduler.poll("a", ticket, Observation::Changed);
        assert!(scheduler.signal("a").is_none());
        assert_eq!(scheduler.active_count(), 1);

        assert!(scheduler.signal("b").is_some());
        assert_eq!(scheduler.active_count(), 2);
    }

    #[test]
    fn test_stale_ticket_after_abort() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let old = scheduler.signal("a").unwrap();
        assert!(scheduler.abort("a"));

        let new = scheduler.signal("a").unwrap();
        assert_ne!(old, new);
        assert_eq!(
            scheduler.poll("a", old, Observation::Changed),
            PollDecision::Stale
        );
        assert_eq!(scheduler.state("a"), PollState::Polling { attempt: 0 });
    }

    #[test]
    fn test_finish_after_abort_is_rejected() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        scheduler.poll("a", ticket, Observation::Changed);
        scheduler.abort("a");
        assert!(!scheduler.finish("a", ticket));
    }

    #[test]
    fn test_poll_while_dispatching_is_stale() {
        let mut scheduler = ReclassificationScheduler::new(RetryPolicy::default());
        let ticket = scheduler.signal("a").unwrap();
        scheduler.poll("a", ticket, Observation::Changed);
        assert_eq!(
            scheduler.poll("a", ticket, Observation::Changed),
            PollDecision::Stale
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = SchedulerConfig {
            max_retries: 4,
            poll_interval_ms: 100,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.interval, Duration::from_millis(100));
    }
}
