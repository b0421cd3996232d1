//! Per-signer sybil state machine.
//!
//! Once the IP a transaction arrives from is associated with more than
//! `association_threshold` distinct signers, every submission from that IP is
//! evaluated against the signer's record:
//!
//! ```text
//!   Clean ──first trigger──▶ Tracked(now)
//!   Tracked(t) / Restored(t)
//!       now - t >= tx_interval ──▶ Tracked(now)            (window reset)
//!       otherwise              ──▶ Managed(now)  + ban      (re-triggered)
//!   Managed(b)
//!       now - b >= manage_duration ──▶ Restored(now - tx_interval) + unban
//!       otherwise                  ──▶ Managed(b)           (ban stays)
//! ```
//!
//! `Restored` re-arms tracking one full interval in the past, so the first
//! trigger after a restoration only restarts the window instead of banning
//! again straight away.
//!
//! Transitions are driven by request arrival only. There is no background
//! sweep: a managed signer whose IP goes quiet stays managed until its next
//! qualifying submission is evaluated.
//!
//! Each transition runs under the map's per-key entry lock, so two concurrent
//! re-triggers for the same signer yield exactly one [`Decision::Managed`].
//! [`AbuseDetector::evaluate_with`] runs its callback under the same lock, so
//! the staging gate sees decisions for one signer in transition order.

use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use txguard_core::address::Address;
use txguard_core::error::ConfigError;

use crate::config::GuardConfig;

/// Tracking record of a flagged signer. Signers without a record are clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AgentState {
    /// Seen above threshold; window started at `interval_start`.
    Tracked { interval_start: DateTime<Utc> },
    /// Excluded from staging since `since`.
    Managed { since: DateTime<Utc> },
    /// Released from management; tracking re-armed at `interval_start`.
    Restored { interval_start: DateTime<Utc> },
}

impl AgentState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tracked { .. } => "tracked",
            Self::Managed { .. } => "managed",
            Self::Restored { .. } => "restored",
        }
    }
}

/// Outcome of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The IP's association count did not exceed the threshold.
    BelowThreshold,
    /// A clean signer started being tracked.
    Tracked,
    /// The window elapsed without a re-trigger; restarted.
    IntervalReset,
    /// Re-triggered within the window; ban from staging.
    Managed,
    /// Still inside the management period.
    StillManaged { remaining: TimeDelta },
    /// Management period over; lift the staging ban.
    Restored,
}

impl Decision {
    /// Short event name used in log records.
    pub fn event(&self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::Tracked => "track",
            Self::IntervalReset => "interval_reset",
            Self::Managed => "manage",
            Self::StillManaged { .. } => "still_managed",
            Self::Restored => "restore",
        }
    }
}

/// The sybil state machine over all flagged signers.
#[derive(Debug)]
pub struct AbuseDetector {
    association_threshold: usize,
    tx_interval: TimeDelta,
    manage_duration: TimeDelta,
    records: DashMap<Address, AgentState>,
}

impl AbuseDetector {
    /// Build a detector from validated policy settings.
    pub fn new(config: &GuardConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            association_threshold: config.association_threshold,
            tx_interval: config.tx_interval()?,
            manage_duration: config.manage_duration()?,
            records: DashMap::new(),
        })
    }

    /// Whether an IP with `associated` distinct signers qualifies for evaluation.
    pub fn exceeds_threshold(&self, associated: usize) -> bool {
        associated > self.association_threshold
    }

    /// Evaluate a submission by `agent` from `ip`, whose signer set currently
    /// holds `associated` distinct addresses.
    pub fn evaluate(
        &self,
        agent: &Address,
        ip: &IpAddr,
        associated: usize,
        now: DateTime<Utc>,
    ) -> Decision {
        self.evaluate_with(agent, ip, associated, now, |_| {})
    }

    /// Like [`evaluate`](Self::evaluate), calling `apply` with the decision
    /// while the record of `agent` is still locked.
    ///
    /// `apply` must not call back into this detector for the same signer.
    pub fn evaluate_with<F>(
        &self,
        agent: &Address,
        ip: &IpAddr,
        associated: usize,
        now: DateTime<Utc>,
        apply: F,
    ) -> Decision
    where
        F: FnOnce(&Decision),
    {
        if !self.exceeds_threshold(associated) {
            return Decision::BelowThreshold;
        }

        let (decision, state) = match self.records.entry(*agent) {
            Entry::Vacant(vacant) => {
                let state = AgentState::Tracked { interval_start: now };
                let _record = vacant.insert(state);
                apply(&Decision::Tracked);
                (Decision::Tracked, state)
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                let (decision, next) = self.transition(current, now);
                *occupied.get_mut() = next;
                apply(&decision);
                (decision, next)
            }
        };

        match decision {
            Decision::Managed => warn!(
                at = %now, address = %agent, %ip, associated,
                event = decision.event(), state = state.name(),
                manage_secs = self.manage_duration.num_seconds(),
                "abuse_detector: agent managed, excluded from staging"
            ),
            Decision::StillManaged { remaining } => debug!(
                at = %now, address = %agent, %ip, associated,
                event = decision.event(), state = state.name(),
                remaining_secs = remaining.num_seconds(),
                "abuse_detector: agent remains managed"
            ),
            _ => info!(
                at = %now, address = %agent, %ip, associated,
                event = decision.event(), state = state.name(),
                "abuse_detector: agent state updated"
            ),
        }

        decision
    }

    fn transition(&self, current: AgentState, now: DateTime<Utc>) -> (Decision, AgentState) {
        match current {
            AgentState::Tracked { interval_start } | AgentState::Restored { interval_start } => {
                if now - interval_start >= self.tx_interval {
                    (Decision::IntervalReset, AgentState::Tracked { interval_start: now })
                } else {
                    (Decision::Managed, AgentState::Managed { since: now })
                }
            }
            AgentState::Managed { since } => {
                let elapsed = now - since;
                if elapsed >= self.manage_duration {
                    (
                        Decision::Restored,
                        AgentState::Restored { interval_start: now - self.tx_interval },
                    )
                } else {
                    (
                        Decision::StillManaged { remaining: self.manage_duration - elapsed },
                        current,
                    )
                }
            }
        }
    }

    /// Current record of `agent`; `None` means clean.
    pub fn status(&self, agent: &Address) -> Option<AgentState> {
        self.records.get(agent).map(|r| *r)
    }

    /// Whether `agent` is currently managed.
    pub fn is_managed(&self, agent: &Address) -> bool {
        matches!(self.status(agent), Some(AgentState::Managed { .. }))
    }

    /// All managed signers with the time their management began.
    pub fn managed_agents(&self) -> Vec<(Address, DateTime<Utc>)> {
        self.records
            .iter()
            .filter_map(|r| match *r.value() {
                AgentState::Managed { since } => Some((*r.key(), since)),
                _ => None,
            })
            .collect()
    }

    /// Drop the record of `agent`, returning it to clean.
    ///
    /// Does not touch the staging ban; callers lifting a managed signer by
    /// hand must unban it as well.
    pub fn forget(&self, agent: &Address) -> Option<AgentState> {
        let removed = self.records.remove(agent).map(|(_, state)| state);
        if let Some(state) = removed {
            info!(address = %agent, previous = state.name(), "abuse_detector: record dropped");
        }
        removed
    }

    /// Number of signers with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn association_threshold(&self) -> usize {
        self.association_threshold
    }

    pub fn tx_interval(&self) -> TimeDelta {
        self.tx_interval
    }

    pub fn manage_duration(&self) -> TimeDelta {
        self.manage_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use txguard_core::traits::StagePolicy;

    use crate::stage::StagePolicyGate;

    const ABOVE: usize = 50;

    fn detector() -> AbuseDetector {
        AbuseDetector::new(&GuardConfig::default()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7))
    }

    fn agent() -> Address {
        Address::new([0xA1; 20])
    }

    fn mins(m: i64) -> TimeDelta {
        TimeDelta::minutes(m)
    }

    #[test]
    fn below_threshold_leaves_agent_clean() {
        let d = detector();
        assert_eq!(d.evaluate(&agent(), &ip(), 49, t0()), Decision::BelowThreshold);
        assert_eq!(d.status(&agent()), None);
        assert!(d.is_empty());
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let d = detector();
        assert!(!d.exceeds_threshold(49));
        assert!(d.exceeds_threshold(50));
    }

    #[test]
    fn first_trigger_tracks() {
        let d = detector();
        assert_eq!(d.evaluate(&agent(), &ip(), ABOVE, t0()), Decision::Tracked);
        assert_eq!(d.status(&agent()), Some(AgentState::Tracked { interval_start: t0() }));
    }

    #[test]
    fn retrigger_within_interval_manages() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        let at = t0() + mins(5);
        assert_eq!(d.evaluate(&agent(), &ip(), ABOVE, at), Decision::Managed);
        assert_eq!(d.status(&agent()), Some(AgentState::Managed { since: at }));
        assert!(d.is_managed(&agent()));
    }

    #[test]
    fn retrigger_after_interval_resets() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        let at = t0() + mins(10);
        assert_eq!(d.evaluate(&agent(), &ip(), ABOVE, at), Decision::IntervalReset);
        assert_eq!(d.status(&agent()), Some(AgentState::Tracked { interval_start: at }));
    }

    #[test]
    fn managed_holds_until_duration() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(5));

        let decision = d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(14));
        assert_eq!(decision, Decision::StillManaged { remaining: mins(1) });
        assert!(d.is_managed(&agent()));

        let decision = d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(15));
        assert_eq!(decision, Decision::Restored);
        assert_eq!(
            d.status(&agent()),
            Some(AgentState::Restored { interval_start: t0() + mins(5) })
        );
        assert!(!d.is_managed(&agent()));
    }

    #[test]
    fn restored_agent_is_not_rebanned_immediately() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(5));
        d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(15));

        // Next trigger right after restoration only restarts the window.
        let at = t0() + mins(15);
        assert_eq!(d.evaluate(&agent(), &ip(), ABOVE, at), Decision::IntervalReset);
        // A further re-trigger inside the new window manages again.
        assert_eq!(d.evaluate(&agent(), &ip(), ABOVE, at + mins(1)), Decision::Managed);
    }

    #[test]
    fn below_threshold_does_not_touch_existing_record() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        assert_eq!(d.evaluate(&agent(), &ip(), 3, t0() + mins(1)), Decision::BelowThreshold);
        assert_eq!(d.status(&agent()), Some(AgentState::Tracked { interval_start: t0() }));
    }

    #[test]
    fn managed_agents_lists_only_managed() {
        let d = detector();
        let other = Address::new([0xB2; 20]);
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(1));
        d.evaluate(&other, &ip(), ABOVE, t0());

        let managed = d.managed_agents();
        assert_eq!(managed, vec![(agent(), t0() + mins(1))]);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn forget_returns_agent_to_clean() {
        let d = detector();
        d.evaluate(&agent(), &ip(), ABOVE, t0());
        assert!(d.forget(&agent()).is_some());
        assert_eq!(d.status(&agent()), None);
        assert!(d.forget(&agent()).is_none());
    }

    #[test]
    fn concurrent_retriggers_manage_once() {
        let d = Arc::new(detector());
        d.evaluate(&agent(), &ip(), ABOVE, t0());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let d = Arc::clone(&d);
                std::thread::spawn(move || d.evaluate(&agent(), &ip(), ABOVE, t0() + mins(2)))
            })
            .collect();
        let decisions: Vec<Decision> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let managed = decisions.iter().filter(|d| **d == Decision::Managed).count();
        assert_eq!(managed, 1, "exactly one thread should see the manage transition");
        assert!(d.is_managed(&agent()));
    }

    #[test]
    fn gate_follows_record_under_contention() {
        let d = detector();
        let gate = StagePolicyGate::new();

        std::thread::scope(|s| {
            for worker in 0..8i64 {
                let (d, gate) = (&d, &gate);
                s.spawn(move || {
                    for step in 0..200i64 {
                        let now = t0() + mins((step * 3 + worker) % 40);
                        d.evaluate_with(&agent(), &ip(), ABOVE, now, |decision| {
                            gate.apply(&agent(), ip(), decision, now)
                        });
                    }
                });
            }
        });

        assert_eq!(d.is_managed(&agent()), gate.is_banned(&agent()));
    }

    #[test]
    fn evaluate_with_sees_every_decision() {
        let d = detector();
        let mut seen = Vec::new();
        d.evaluate_with(&agent(), &ip(), 3, t0(), |decision| seen.push(*decision));
        d.evaluate_with(&agent(), &ip(), ABOVE, t0(), |decision| seen.push(*decision));
        d.evaluate_with(&agent(), &ip(), ABOVE, t0() + mins(1), |decision| seen.push(*decision));
        // Below-threshold calls never reach the record.
        assert_eq!(seen, vec![Decision::Tracked, Decision::Managed]);
    }

    #[test]
    fn agent_state_serializes_tagged() {
        let json = serde_json::to_string(&AgentState::Managed { since: t0() }).unwrap();
        assert!(json.contains("\"state\":\"managed\""));
        assert!(json.contains("\"since\""));
    }
}
