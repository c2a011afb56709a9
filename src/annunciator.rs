// src/annunciator.rs
// Display state for each configured annunciator.

use crate::error::{AdamError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What one annunciator is currently showing.
///
/// `current_alarm_id` is a lookup key into the alarm store, never a handle;
/// the arbitration loop repairs it when the alarm leaves the open set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnunciatorState {
    pub current_alarm_id: Option<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Operator-controlled; never affects selection
    pub muted: bool,
}

impl AnnunciatorState {
    /// Forget the displayed alarm and the pause clock that came with it
    pub fn clear(&mut self) {
        self.current_alarm_id = None;
        self.last_sent_at = None;
    }

    pub fn assign(&mut self, alarm_id: &str, now: DateTime<Utc>) {
        self.current_alarm_id = Some(alarm_id.to_string());
        self.last_sent_at = Some(now);
    }
}

/// One entry per configured display target, in configuration order
#[derive(Debug, Clone)]
pub struct AnnunciatorTable {
    entries: Vec<(String, AnnunciatorState)>,
}

impl AnnunciatorTable {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: ids
                .into_iter()
                .map(|id| (id.into(), AnnunciatorState::default()))
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == id)
    }

    pub fn get(&self, id: &str) -> Option<&AnnunciatorState> {
        self.entries
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, state)| state)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AnnunciatorState> {
        self.entries
            .iter_mut()
            .find(|(name, _)| name == id)
            .map(|(_, state)| state)
    }

    /// Like [`get`](Self::get) but unknown ids are an error
    pub fn require(&self, id: &str) -> Result<&AnnunciatorState> {
        self.get(id)
            .ok_or_else(|| AdamError::UnknownAnnunciator(id.to_string()))
    }

    /// Set the mute flag; returns whether it changed
    pub fn set_muted(&mut self, id: &str, muted: bool) -> Result<bool> {
        let state = self
            .get_mut(id)
            .ok_or_else(|| AdamError::UnknownAnnunciator(id.to_string()))?;
        let changed = state.muted != muted;
        state.muted = muted;
        Ok(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnnunciatorState)> {
        self.entries.iter().map(|(name, state)| (name.as_str(), state))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut AnnunciatorState)> {
        self.entries
            .iter_mut()
            .map(|(name, state)| (name.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
