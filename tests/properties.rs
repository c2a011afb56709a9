use adam::*;
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Raise(u8),
    Respond { annunciator: usize, action: OperatorAction },
    Advance(i64),
}

fn op_strategy(actions: Vec<OperatorAction>) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..=5).prop_map(Op::Raise),
        (0usize..3, prop::sample::select(actions))
            .prop_map(|(annunciator, action)| Op::Respond { annunciator, action }),
        (1i64..15).prop_map(Op::Advance),
    ]
}

const ANNUNCIATORS: [&str; 3] = ["A1", "A2", "A3"];

fn engine(policy: PolicyKind, clock: Arc<ManualClock>) -> Engine {
    let config = EngineConfig {
        annunciators: ANNUNCIATORS.iter().map(|s| s.to_string()).collect(),
        policy,
        pause_secs: 20,
        shelve_secs: 30,
        ..EngineConfig::default()
    };
    let quiet = |_: &str, _: &str| -> Result<()> { Ok(()) };
    Engine::new(&config, Arc::new(quiet), clock).unwrap()
}

/// Apply one op and return the display updates it produced
fn apply(engine: &Engine, clock: &ManualClock, op: &Op) -> Vec<DisplayUpdate> {
    let report = match op {
        Op::Raise(severity) => engine.raise_alarm(*severity, "prop", None).ok(),
        Op::Respond { annunciator, action } => engine
            .apply_operator_action(ANNUNCIATORS[*annunciator], None, *action)
            .ok(),
        Op::Advance(secs) => {
            clock.advance(Duration::seconds(*secs));
            Some(engine.on_tick())
        }
    };
    report.map(|r| r.updates).unwrap_or_default()
}

proptest! {
    #[test]
    fn test_sequences_strictly_increase(
        alarms in prop::collection::vec((0u8..=5, prop::option::of("[0-9A-F]{2}")), 1..60)
    ) {
        let mut store = AlarmStore::new();
        let now = Utc::now();
        let mut last = 0;
        for (severity, id) in alarms {
            if let Ok(alarm) = store.create_alarm(severity, "x", id.as_deref(), now) {
                prop_assert!(alarm.sequence() > last);
                last = alarm.sequence();
            }
        }
        prop_assert_eq!(store.last_sequence(), last);
    }

    #[test]
    fn test_codec_round_trip(
        severity in -20i64..20,
        text in "[a-zA-Z0-9 .,:;_-]{0,120}",
        id in prop::option::of("[0-9A-F]{1,100}"),
        max_len in 3usize..100,
    ) {
        let codec = WireCodec::new(max_len);
        let encoded = codec.encode_alarm(severity, &text, id.as_deref());
        prop_assert!(encoded.len() <= max_len);

        // an id that cannot fit is left out
        let id = id.filter(|id| id.len() + 4 <= max_len);
        let decoded = codec.decode_alarm(encoded.as_bytes()).unwrap();
        prop_assert_eq!(decoded.severity as i64, severity.clamp(0, 5));
        prop_assert_eq!(decoded.id.as_deref(), id.as_deref());

        let prefix = 2 + id.as_ref().map_or(0, |id| id.len() + 2);
        let budget = max_len.saturating_sub(prefix).min(text.len());
        prop_assert_eq!(decoded.text.as_str(), &text[..budget]);
    }

    #[test]
    fn test_display_always_refers_to_open_alarm(
        policy in prop_oneof![
            Just(PolicyKind::Arrival),
            Just(PolicyKind::Severity),
            Just(PolicyKind::SeverityPause),
        ],
        ops in prop::collection::vec(
            op_strategy(vec![
                OperatorAction::Acknowledge,
                OperatorAction::Complete,
                OperatorAction::Dismiss,
                OperatorAction::Shelve,
            ]),
            1..80,
        ),
    ) {
        let clock = Arc::new(ManualClock::default());
        let engine = engine(policy, clock.clone());

        for op in &ops {
            apply(&engine, &clock, op);
            for view in engine.annunciator_view() {
                if let Some(id) = view.current_alarm_id {
                    let status = engine.alarm_status(&id);
                    prop_assert!(
                        status.is_some_and(AlarmStatus::is_open),
                        "{} shows {} in status {:?}", view.id, id, status
                    );
                }
            }
        }
    }

    #[test]
    fn test_pause_enforces_minimum_dwell(
        ops in prop::collection::vec(op_strategy(vec![OperatorAction::Acknowledge]), 1..80),
    ) {
        let clock = Arc::new(ManualClock::default());
        let engine = engine(PolicyKind::SeverityPause, clock.clone());
        let mut last_send: Vec<Option<(DateTime<Utc>, String)>> = vec![None; ANNUNCIATORS.len()];

        for op in &ops {
            for update in apply(&engine, &clock, op) {
                let idx = ANNUNCIATORS.iter().position(|a| *a == update.annunciator).unwrap();
                let now = clock.now();
                if let Some((at, previous)) = &last_send[idx] {
                    prop_assert_ne!(previous, &update.alarm_id);
                    prop_assert!(now - *at >= Duration::seconds(20));
                }
                last_send[idx] = Some((now, update.alarm_id.clone()));
            }
        }
    }

    #[test]
    fn test_severity_preempts_immediately(severities in prop::collection::vec(0u8..=5, 1..40)) {
        let clock = Arc::new(ManualClock::default());
        let engine = engine(PolicyKind::Severity, clock);

        for severity in severities {
            let shown = engine
                .annunciator("A1")
                .and_then(|state| state.current_alarm_id)
                .and_then(|id| engine.alarm(&id))
                .map(|alarm| alarm.severity());
            let report = engine.raise_alarm(severity, "prop", None).unwrap();
            let new_id = report.alarm_id.clone().unwrap();
            let sent_new = report.updates.iter().all(|u| u.alarm_id == new_id)
                && report.updates.len() == ANNUNCIATORS.len();
            prop_assert_eq!(sent_new, shown.map_or(true, |s| severity > s));
        }
    }
}
