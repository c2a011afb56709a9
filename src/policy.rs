// src/policy.rs
// Selection policies: which open alarm an annunciator should show next.
//
// All three are pure functions of (candidates, now, annunciator state). The
// set is closed, so it is an enum rather than a trait.

use crate::alarm::AlarmRecord;
use crate::annunciator::AnnunciatorState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;

/// Policy name as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Keep the displayed alarm until it closes; otherwise show the oldest
    #[default]
    #[serde(alias = "POLICY0", alias = "policy0", alias = "ARRIVAL")]
    Arrival,

    /// Always show the most severe alarm, oldest first among equals
    #[serde(alias = "SEVERITY")]
    Severity,

    /// Severity ranking with a minimum dwell time per display
    #[serde(alias = "SEVERITY_PAUSE")]
    SeverityPause,
}

/// Configured selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Arrival,
    Severity,
    SeverityPause { pause: Duration },
}

impl Policy {
    pub fn new(kind: PolicyKind, pause: Duration) -> Self {
        match kind {
            PolicyKind::Arrival => Policy::Arrival,
            PolicyKind::Severity => Policy::Severity,
            PolicyKind::SeverityPause => Policy::SeverityPause { pause },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Arrival => "arrival",
            Policy::Severity => "severity",
            Policy::SeverityPause { .. } => "severity_pause",
        }
    }

    /// True while the annunciator's current display may not be replaced or
    /// released. Only the pause policy ever holds.
    pub fn holds(&self, state: &AnnunciatorState, now: DateTime<Utc>) -> bool {
        match self {
            Policy::SeverityPause { pause } => {
                state.current_alarm_id.is_some()
                    && state.last_sent_at.is_some_and(|sent| now - sent < *pause)
            }
            _ => false,
        }
    }

    /// Pick the alarm to send next, or `None` when nothing should be sent:
    /// no candidates, the policy forbids replacement, or the best choice is
    /// already on display.
    pub fn select_next<'a>(
        &self,
        candidates: &[&'a AlarmRecord],
        now: DateTime<Utc>,
        state: &AnnunciatorState,
    ) -> Option<&'a AlarmRecord> {
        let current = state.current_alarm_id.as_deref();
        let choice = match self {
            Policy::Arrival => {
                if current.is_some() {
                    return None;
                }
                candidates.iter().copied().min_by_key(|a| a.sequence())
            }
            Policy::Severity => most_severe(candidates),
            Policy::SeverityPause { .. } => {
                if self.holds(state, now) {
                    return None;
                }
                most_severe(candidates)
            }
        };
        choice.filter(|alarm| Some(alarm.id()) != current)
    }

    /// Order alarms the way this policy ranks them, best first
    pub fn rank(&self, alarms: &mut [&AlarmRecord]) {
        match self {
            Policy::Arrival => alarms.sort_by_key(|a| a.sequence()),
            Policy::Severity | Policy::SeverityPause { .. } => {
                alarms.sort_by_key(|a| (Reverse(a.severity()), a.sequence()))
            }
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn most_severe<'a>(candidates: &[&'a AlarmRecord]) -> Option<&'a AlarmRecord> {
    candidates
        .iter()
        .copied()
        .min_by_key(|a| (Reverse(a.severity()), a.sequence()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(id: &str, severity: u8, sequence: u64) -> AlarmRecord {
        AlarmRecord::new(id.into(), severity, String::new(), Utc::now(), sequence)
    }

    fn showing(id: &str, at: DateTime<Utc>) -> AnnunciatorState {
        let mut state = AnnunciatorState::default();
        state.assign(id, at);
        state
    }

    #[test]
    fn test_arrival_keeps_current_and_picks_oldest() {
        let (a, b) = (alarm("A", 1, 1), alarm("B", 5, 2));
        let candidates = [&b, &a];
        let now = Utc::now();

        let pick = Policy::Arrival.select_next(&candidates, now, &AnnunciatorState::default());
        assert_eq!(pick.map(|a| a.id()), Some("A"));
        assert!(Policy::Arrival
            .select_next(&candidates, now, &showing("A", now))
            .is_none());
    }

    #[test]
    fn test_severity_preempts_immediately() {
        let (a, b, c) = (alarm("A", 3, 1), alarm("B", 5, 3), alarm("C", 5, 2));
        let candidates = [&a, &b, &c];
        let now = Utc::now();

        // highest severity, oldest among equals
        let pick = Policy::Severity.select_next(&candidates, now, &showing("A", now));
        assert_eq!(pick.map(|a| a.id()), Some("C"));
        // no redundant re-send
        assert!(Policy::Severity
            .select_next(&candidates, now, &showing("C", now))
            .is_none());
    }

    #[test]
    fn test_pause_blocks_until_elapsed() {
        let policy = Policy::new(PolicyKind::SeverityPause, Duration::seconds(20));
        let (x, y) = (alarm("X", 3, 1), alarm("Y", 5, 2));
        let candidates = [&x, &y];
        let t0 = Utc::now();
        let state = showing("X", t0);

        assert!(policy
            .select_next(&candidates, t0 + Duration::seconds(19), &state)
            .is_none());
        let pick = policy.select_next(&candidates, t0 + Duration::seconds(20), &state);
        assert_eq!(pick.map(|a| a.id()), Some("Y"));
    }

    #[test]
    fn test_pause_does_not_hold_idle_annunciator() {
        let policy = Policy::new(PolicyKind::SeverityPause, Duration::seconds(20));
        let x = alarm("X", 3, 1);
        let pick = policy.select_next(&[&x], Utc::now(), &AnnunciatorState::default());
        assert_eq!(pick.map(|a| a.id()), Some("X"));
    }

    #[test]
    fn test_empty_candidates_select_nothing() {
        let now = Utc::now();
        for policy in [Policy::Arrival, Policy::Severity, Policy::new(PolicyKind::SeverityPause, Duration::zero())] {
            assert!(policy.select_next(&[], now, &AnnunciatorState::default()).is_none());
        }
    }

    #[test]
    fn test_rank_orders_views() {
        let (a, b, c) = (alarm("A", 1, 1), alarm("B", 4, 2), alarm("C", 4, 3));
        let mut view = vec![&c, &a, &b];
        Policy::Severity.rank(&mut view);
        assert_eq!(view.iter().map(|a| a.id()).collect::<Vec<_>>(), vec!["B", "C", "A"]);
        Policy::Arrival.rank(&mut view);
        assert_eq!(view.iter().map(|a| a.id()).collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_policy_kind_accepts_legacy_names() {
        let kind: PolicyKind = serde_yaml::from_str("SEVERITY_PAUSE").unwrap();
        assert_eq!(kind, PolicyKind::SeverityPause);
        let kind: PolicyKind = serde_yaml::from_str("POLICY0").unwrap();
        assert_eq!(kind, PolicyKind::Arrival);
        assert!(serde_yaml::from_str::<PolicyKind>("fastest").is_err());
    }
}
