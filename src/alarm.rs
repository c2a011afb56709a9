// src/alarm.rs
// Alarm record and its lifecycle state machine.
//
//   active        --acknowledge--> acknowledged
//   acknowledged  --acknowledge--> acknowledged   (idempotent, per annunciator)
//   active/acked  --complete-->    completed      (terminal)
//   active/acked  --dismiss-->     dismissed      (terminal)
//   active/acked  --shelve-->      shelved
//   shelved       --timer-->       active         (new sequence)

use crate::error::{AdamError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ==========================================
// STATUS AND ACTIONS
// ==========================================

/// Lifecycle status of an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    Active,
    Acknowledged,
    Completed,
    Dismissed,
    Shelved,
}

impl AlarmStatus {
    /// Open alarms are the candidates for display
    pub fn is_open(self) -> bool {
        matches!(self, AlarmStatus::Active | AlarmStatus::Acknowledged)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AlarmStatus::Completed | AlarmStatus::Dismissed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlarmStatus::Active => "active",
            AlarmStatus::Acknowledged => "acknowledged",
            AlarmStatus::Completed => "completed",
            AlarmStatus::Dismissed => "dismissed",
            AlarmStatus::Shelved => "shelved",
        }
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator action carried by an operator response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorAction {
    Acknowledge,
    Complete,
    Dismiss,
    Shelve,
}

impl OperatorAction {
    /// Single-character wire code
    pub fn code(self) -> char {
        match self {
            OperatorAction::Acknowledge => 'a',
            OperatorAction::Complete => 'c',
            OperatorAction::Dismiss => 'd',
            OperatorAction::Shelve => 's',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'a' => Some(OperatorAction::Acknowledge),
            'c' => Some(OperatorAction::Complete),
            'd' => Some(OperatorAction::Dismiss),
            's' => Some(OperatorAction::Shelve),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatorAction::Acknowledge => "acknowledge",
            OperatorAction::Complete => "complete",
            OperatorAction::Dismiss => "dismiss",
            OperatorAction::Shelve => "shelve",
        }
    }
}

impl fmt::Display for OperatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// HISTORY
// ==========================================

/// What happened to an alarm, as recorded in its audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Displayed,
    Operator(OperatorAction),
    Unshelved,
}

/// One audit trail entry. `annunciator` is `None` for engine-initiated
/// changes (creation, timer expiry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub annunciator: Option<String>,
    pub action: HistoryAction,
}

/// Status change produced by an operator action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AlarmStatus,
    pub to: AlarmStatus,
}

// ==========================================
// ALARM RECORD
// ==========================================

/// One logical alarm condition. Owned exclusively by the alarm store.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmRecord {
    id: String,
    severity: u8,
    text: String,
    received_at: DateTime<Utc>,
    sequence: u64,
    status: AlarmStatus,
    shelved_until: Option<DateTime<Utc>>,
    sent_to: BTreeSet<String>,
    acked_by: BTreeSet<String>,
    history: Vec<HistoryEntry>,
}

impl AlarmRecord {
    pub(crate) fn new(
        id: String,
        severity: u8,
        text: String,
        now: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            severity,
            text,
            received_at: now,
            sequence,
            status: AlarmStatus::Active,
            shelved_until: None,
            sent_to: BTreeSet::new(),
            acked_by: BTreeSet::new(),
            history: vec![HistoryEntry {
                at: now,
                annunciator: None,
                action: HistoryAction::Created,
            }],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn severity(&self) -> u8 {
        self.severity
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn status(&self) -> AlarmStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn shelved_until(&self) -> Option<DateTime<Utc>> {
        self.shelved_until
    }

    pub fn sent_to(&self) -> &BTreeSet<String> {
        &self.sent_to
    }

    pub fn acked_by(&self) -> &BTreeSet<String> {
        &self.acked_by
    }

    /// Append-only audit trail, oldest first
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Timestamp of the most recent history entry
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.history.last().map_or(self.received_at, |entry| entry.at)
    }

    /// Whether this alarm may be offered to `annunciator`: it must be open,
    /// not acknowledged by that annunciator, and an acknowledged alarm is only
    /// kept on annunciators that already received it.
    pub fn is_candidate_for(&self, annunciator: &str) -> bool {
        match self.status {
            AlarmStatus::Active => !self.acked_by.contains(annunciator),
            AlarmStatus::Acknowledged => {
                self.sent_to.contains(annunciator) && !self.acked_by.contains(annunciator)
            }
            _ => false,
        }
    }

    /// Apply an operator action. Terminal and shelved alarms reject every
    /// action with [`AdamError::InvalidTransition`] and stay untouched.
    pub(crate) fn apply(
        &mut self,
        action: OperatorAction,
        annunciator: &str,
        now: DateTime<Utc>,
        shelve_for: Duration,
    ) -> Result<Transition> {
        let from = self.status;
        if !from.is_open() {
            return Err(AdamError::InvalidTransition {
                id: self.id.clone(),
                action: action.as_str(),
                status: from,
            });
        }

        let to = match action {
            OperatorAction::Acknowledge => {
                self.acked_by.insert(annunciator.to_string());
                AlarmStatus::Acknowledged
            }
            OperatorAction::Complete => AlarmStatus::Completed,
            OperatorAction::Dismiss => AlarmStatus::Dismissed,
            OperatorAction::Shelve => {
                self.acked_by.clear();
                self.sent_to.clear();
                self.shelved_until = Some(now + shelve_for);
                AlarmStatus::Shelved
            }
        };

        self.status = to;
        self.history.push(HistoryEntry {
            at: now,
            annunciator: Some(annunciator.to_string()),
            action: HistoryAction::Operator(action),
        });
        Ok(Transition { from, to })
    }

    /// Return a shelved alarm to the open set under a fresh sequence
    pub(crate) fn unshelve(&mut self, now: DateTime<Utc>, sequence: u64) {
        debug_assert_eq!(self.status, AlarmStatus::Shelved);
        self.status = AlarmStatus::Active;
        self.shelved_until = None;
        self.sequence = sequence;
        self.history.push(HistoryEntry {
            at: now,
            annunciator: None,
            action: HistoryAction::Unshelved,
        });
    }

    /// Record that this alarm was put on `annunciator`'s display
    pub(crate) fn mark_sent(&mut self, annunciator: &str, now: DateTime<Utc>) {
        self.sent_to.insert(annunciator.to_string());
        self.history.push(HistoryEntry {
            at: now,
            annunciator: Some(annunciator.to_string()),
            action: HistoryAction::Displayed,
        });
    }
}
