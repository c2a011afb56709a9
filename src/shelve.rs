// src/shelve.rs
// Returns shelved alarms to the open set once their shelve window passes.

use crate::store::AlarmStore;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Shelve window for operator `shelve` actions, and the expiry check the
/// arbitration loop runs at the start of every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShelveTimer {
    duration: Duration,
}

/// An alarm that came back from the shelf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unshelved {
    pub id: String,
    pub sequence: u64,
}

impl ShelveTimer {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Reactivate every shelved alarm whose `shelved_until` is at or before
    /// `now`. Each one gets a fresh sequence, in expiry order. Running it again
    /// with no further expiries does nothing.
    pub fn release_expired(&self, store: &mut AlarmStore, now: DateTime<Utc>) -> Vec<Unshelved> {
        store
            .expired_shelves(now)
            .into_iter()
            .filter_map(|id| {
                let sequence = store.unshelve(&id, now)?;
                info!("Unshelved alarm {} (new seq {})", id, sequence);
                Some(Unshelved { id, sequence })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmStatus, OperatorAction};

    #[test]
    fn test_release_is_idempotent() {
        let timer = ShelveTimer::new(Duration::seconds(60));
        let mut store = AlarmStore::new();
        let t0 = Utc::now();
        store.create_alarm(2, "fan", Some("F1"), t0).unwrap();
        store.create_alarm(2, "pump", Some("F2"), t0).unwrap();
        store
            .apply_operator_action("F1", "A1", OperatorAction::Shelve, t0, timer.duration())
            .unwrap();

        assert!(timer.release_expired(&mut store, t0 + Duration::seconds(59)).is_empty());

        let released = timer.release_expired(&mut store, t0 + Duration::seconds(60));
        assert_eq!(released, vec![Unshelved { id: "F1".into(), sequence: 3 }]);
        assert_eq!(store.get("F1").unwrap().status(), AlarmStatus::Active);

        assert!(timer.release_expired(&mut store, t0 + Duration::seconds(61)).is_empty());
        assert_eq!(store.last_sequence(), 3);
    }
}
