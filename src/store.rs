// src/store.rs
// Authoritative table of alarm records, keyed by identifier.

use crate::alarm::{AlarmRecord, AlarmStatus, OperatorAction, Transition};
use crate::codec::normalize_id;
use crate::error::{AdamError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

/// Length of engine-generated identifiers, in hex characters
const GENERATED_ID_LEN: usize = 8;

/// Owns every alarm record.
///
/// `live` holds the newest record per identifier. When a terminal alarm's
/// identifier is reused by a new inbound alarm the old record moves to
/// `retired`, so no record is dropped until retention evicts it.
#[derive(Debug, Default)]
pub struct AlarmStore {
    live: HashMap<String, AlarmRecord>,
    retired: Vec<AlarmRecord>,
    last_sequence: u64,
}

impl AlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new active alarm.
    ///
    /// A supplied identifier is normalised to upper-case hex; when it is
    /// absent (or has no hex digits) a fresh one is generated. Fails with
    /// [`AdamError::DuplicateId`] only if the identifier belongs to an alarm
    /// that is not yet terminal.
    pub fn create_alarm(
        &mut self,
        severity: u8,
        text: impl Into<String>,
        supplied_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<&AlarmRecord> {
        let id = match supplied_id.and_then(normalize_id) {
            Some(id) => {
                if let Some(existing) = self.live.get(&id) {
                    if !existing.status().is_terminal() {
                        return Err(AdamError::DuplicateId(id));
                    }
                }
                if let Some(old) = self.live.remove(&id) {
                    trace!("Retiring terminal alarm {} (seq {})", id, old.sequence());
                    self.retired.push(old);
                }
                id
            }
            None => self.generate_id(),
        };

        let sequence = self.next_sequence();
        let record = AlarmRecord::new(id.clone(), severity, text.into(), now, sequence);
        Ok(self.live.entry(id).or_insert(record))
    }

    /// Resolve an operator's identifier hint to exactly one live alarm.
    ///
    /// Exact match wins, then a unique prefix match. An empty hint falls back
    /// to `current`, the alarm the responding annunciator is showing. A
    /// prefix that matches several alarms only resolves if one of them is
    /// `current`.
    pub fn resolve_id(&self, hint: Option<&str>, current: Option<&str>) -> Result<String> {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());
        let Some(hint) = hint else {
            return current
                .map(str::to_string)
                .ok_or_else(|| AdamError::NotFound("no id given and nothing displayed".into()));
        };
        let hint = hint.to_ascii_uppercase();

        if self.live.contains_key(&hint) {
            return Ok(hint);
        }

        let mut matches: Vec<&str> = self
            .live
            .keys()
            .filter(|id| id.starts_with(&hint))
            .map(String::as_str)
            .collect();

        match matches.len() {
            0 => Err(AdamError::NotFound(hint)),
            1 => Ok(matches[0].to_string()),
            _ => {
                if let Some(current) = current.filter(|c| matches.contains(c)) {
                    return Ok(current.to_string());
                }
                matches.sort_unstable();
                Err(AdamError::AmbiguousId {
                    hint,
                    candidates: matches.into_iter().map(str::to_string).collect(),
                })
            }
        }
    }

    /// Apply an operator action to the live alarm `id`
    pub fn apply_operator_action(
        &mut self,
        id: &str,
        annunciator: &str,
        action: OperatorAction,
        now: DateTime<Utc>,
        shelve_for: Duration,
    ) -> Result<Transition> {
        self.live
            .get_mut(id)
            .ok_or_else(|| AdamError::NotFound(id.to_string()))?
            .apply(action, annunciator, now, shelve_for)
    }

    /// All active or acknowledged alarms, oldest sequence first
    pub fn open_alarms(&self) -> Vec<&AlarmRecord> {
        let mut open: Vec<&AlarmRecord> = self.live.values().filter(|a| a.is_open()).collect();
        open.sort_by_key(|a| a.sequence());
        open
    }

    pub fn get(&self, id: &str) -> Option<&AlarmRecord> {
        self.live.get(id)
    }

    /// Every retained record, live and retired
    pub fn all_alarms(&self) -> impl Iterator<Item = &AlarmRecord> {
        self.live.values().chain(self.retired.iter())
    }

    pub fn len(&self) -> usize {
        self.live.len() + self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest sequence issued so far
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub(crate) fn mark_sent(&mut self, id: &str, annunciator: &str, now: DateTime<Utc>) -> bool {
        match self.live.get_mut(id) {
            Some(alarm) => {
                alarm.mark_sent(annunciator, now);
                true
            }
            None => false,
        }
    }

    /// Shelved alarms whose shelve window has passed, earliest expiry first
    pub(crate) fn expired_shelves(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<&AlarmRecord> = self
            .live
            .values()
            .filter(|a| a.status() == AlarmStatus::Shelved)
            .filter(|a| a.shelved_until().is_some_and(|until| until <= now))
            .collect();
        due.sort_by_key(|a| (a.shelved_until(), a.sequence()));
        due.into_iter().map(|a| a.id().to_string()).collect()
    }

    /// Return a shelved alarm to the open set; yields its new sequence
    pub(crate) fn unshelve(&mut self, id: &str, now: DateTime<Utc>) -> Option<u64> {
        if self.live.get(id)?.status() != AlarmStatus::Shelved {
            return None;
        }
        let sequence = self.next_sequence();
        let alarm = self.live.get_mut(id)?;
        alarm.unshelve(now, sequence);
        Some(sequence)
    }

    /// Drop terminal alarms whose last activity is older than `cutoff`.
    /// Returns the number of records evicted.
    pub fn evict_terminal_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.len();
        self.retired.retain(|a| a.last_activity() >= cutoff);
        self.live
            .retain(|_, a| !a.status().is_terminal() || a.last_activity() >= cutoff);
        let evicted = before - self.len();
        if evicted > 0 {
            debug!("Evicted {} terminal alarms older than {}", evicted, cutoff);
        }
        evicted
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    fn generate_id(&self) -> String {
        loop {
            let mut id = Uuid::new_v4().simple().to_string();
            id.truncate(GENERATED_ID_LEN);
            id.make_ascii_uppercase();
            if !self.live.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(ids: &[&str]) -> AlarmStore {
        let mut store = AlarmStore::new();
        for id in ids {
            store.create_alarm(1, "test", Some(id), Utc::now()).unwrap();
        }
        store
    }

    #[test]
    fn test_sequences_strictly_increase() {
        let mut store = AlarmStore::new();
        let now = Utc::now();
        let seqs: Vec<u64> = (0..5)
            .map(|i| store.create_alarm(i, "x", None, now).unwrap().sequence())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_generated_ids_are_hex() {
        let mut store = AlarmStore::new();
        let alarm = store.create_alarm(2, "x", None, Utc::now()).unwrap();
        assert_eq!(alarm.id().len(), GENERATED_ID_LEN);
        assert!(alarm.id().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_duplicate_open_id_rejected() {
        let mut store = store_with(&["ab"]);
        let err = store.create_alarm(1, "again", Some("AB"), Utc::now()).unwrap_err();
        assert!(matches!(err, AdamError::DuplicateId(id) if id == "AB"));
    }

    #[test]
    fn test_shelved_id_still_counts_as_open_for_duplicates() {
        let mut store = store_with(&["ab"]);
        let now = Utc::now();
        store
            .apply_operator_action("AB", "A1", OperatorAction::Shelve, now, Duration::seconds(10))
            .unwrap();
        assert!(store.create_alarm(1, "again", Some("ab"), now).is_err());
    }

    #[test]
    fn test_terminal_id_can_be_reused() {
        let mut store = store_with(&["ab"]);
        let now = Utc::now();
        store
            .apply_operator_action("AB", "A1", OperatorAction::Complete, now, Duration::zero())
            .unwrap();

        let seq = store.create_alarm(4, "again", Some("AB"), now).unwrap().sequence();
        assert_eq!(seq, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("AB").unwrap().status(), AlarmStatus::Active);
    }

    #[test]
    fn test_resolve_exact_prefix_and_current() {
        let store = store_with(&["ABC1", "ABC2", "F00D"]);

        assert_eq!(store.resolve_id(Some("abc1"), None).unwrap(), "ABC1");
        assert_eq!(store.resolve_id(Some("F0"), None).unwrap(), "F00D");
        assert_eq!(store.resolve_id(None, Some("ABC2")).unwrap(), "ABC2");
        assert_eq!(store.resolve_id(Some(""), Some("F00D")).unwrap(), "F00D");
        assert!(matches!(store.resolve_id(None, None), Err(AdamError::NotFound(_))));
        assert!(matches!(store.resolve_id(Some("9"), None), Err(AdamError::NotFound(_))));
    }

    #[test]
    fn test_resolve_ambiguous_prefix() {
        let store = store_with(&["ABC1", "ABC2"]);

        match store.resolve_id(Some("AB"), None) {
            Err(AdamError::AmbiguousId { candidates, .. }) => {
                assert_eq!(candidates, vec!["ABC1".to_string(), "ABC2".to_string()]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        // the annunciator's current alarm breaks the tie
        assert_eq!(store.resolve_id(Some("AB"), Some("ABC2")).unwrap(), "ABC2");
        assert!(store.resolve_id(Some("AB"), Some("F00D")).is_err());
    }

    #[test]
    fn test_open_alarms_ordered_by_sequence() {
        let mut store = store_with(&["C", "A", "B"]);
        store
            .apply_operator_action("A", "A1", OperatorAction::Dismiss, Utc::now(), Duration::zero())
            .unwrap();
        let open: Vec<&str> = store.open_alarms().iter().map(|a| a.id()).collect();
        assert_eq!(open, vec!["C", "B"]);
    }

    #[test]
    fn test_unshelve_only_after_expiry() {
        let mut store = store_with(&["AA"]);
        let now = Utc::now();
        store
            .apply_operator_action("AA", "A1", OperatorAction::Shelve, now, Duration::seconds(30))
            .unwrap();

        assert!(store.expired_shelves(now + Duration::seconds(29)).is_empty());
        let due = store.expired_shelves(now + Duration::seconds(30));
        assert_eq!(due, vec!["AA".to_string()]);

        let seq = store.unshelve("AA", now + Duration::seconds(30)).unwrap();
        assert!(seq > 1);
        assert_eq!(seq, store.last_sequence());
        assert!(store.unshelve("AA", now).is_none());
    }

    #[test]
    fn test_evict_terminal_before() {
        let mut store = store_with(&["AA", "BB"]);
        let now = Utc::now();
        store
            .apply_operator_action("AA", "A1", OperatorAction::Complete, now, Duration::zero())
            .unwrap();

        assert_eq!(store.evict_terminal_before(now), 0);
        assert_eq!(store.evict_terminal_before(now + Duration::seconds(1)), 1);
        assert!(store.get("AA").is_none());
        assert!(store.get("BB").is_some());
    }
}
