// src/engine.rs
// Arbitration loop: owns the alarm store and the annunciator table, and on
// every trigger (new alarm, operator message, periodic tick) re-evaluates
// every annunciator against the configured policy.
//
// All state lives behind one mutex. A pass mutates state under the lock,
// releases it, and only then hands display updates to the publisher, so a
// slow transport never stalls the next inbound event.

use crate::alarm::{AlarmRecord, AlarmStatus, OperatorAction, Transition};
use crate::annunciator::{AnnunciatorState, AnnunciatorTable};
use crate::clock::{Clock, SystemClock};
use crate::codec::{normalize_id, AnnunciatorCommand, OperatorMessage, WireCodec};
use crate::config::EngineConfig;
use crate::error::{AdamError, Result};
use crate::policy::Policy;
use crate::shelve::{ShelveTimer, Unshelved};
use crate::store::AlarmStore;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

// ==========================================
// PUBLISH INTERFACE
// ==========================================

/// Outbound capability the engine uses to send display updates.
///
/// Called outside the engine lock. Calls for the same annunciator are
/// serialised, so implementations should hand the payload off without
/// blocking (queue it, don't wait for the broker).
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    fn publish(&self, annunciator: &str, payload: &str) -> Result<()>;
}

impl<F> Publisher for F
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync,
{
    fn publish(&self, annunciator: &str, payload: &str) -> Result<()> {
        self(annunciator, payload)
    }
}

// ==========================================
// PASS OUTPUT
// ==========================================

/// A display update produced by an arbitration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayUpdate {
    pub annunciator: String,
    pub alarm_id: String,
    pub severity: u8,
    /// Encoded alarm as sent on the wire
    pub payload: String,
    /// Alarm that was on display and got replaced, if any
    pub displaced: Option<String>,
    generation: u64,
}

/// Why an annunciator stopped showing an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The alarm left the open set (completed, dismissed, shelved or evicted)
    Closed,
    /// The annunciator itself acknowledged it
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayEventKind {
    /// First alarm on an idle annunciator
    Sent { alarm_id: String },
    /// A held alarm was replaced by a different one
    Override { displaced: String, alarm_id: String },
    /// The displayed alarm was cleared
    Released { alarm_id: String, reason: ReleaseReason },
}

/// Entry in the engine's display event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEvent {
    pub at: DateTime<Utc>,
    pub annunciator: String,
    #[serde(flatten)]
    pub kind: DisplayEventKind,
}

/// Everything one trigger caused
#[derive(Debug, Default)]
pub struct PassReport {
    /// Alarm created or acted on by the triggering event
    pub alarm_id: Option<String>,
    /// Status change caused by an operator action
    pub transition: Option<Transition>,
    pub unshelved: Vec<Unshelved>,
    /// Updates handed to the publisher
    pub updates: Vec<DisplayUpdate>,
    pub events: Vec<DisplayEvent>,
    /// Publishes that failed; the in-memory assignment stands regardless
    pub publish_failures: Vec<AdamError>,
}

impl PassReport {
    /// Update sent to `annunciator` in this pass, if any
    pub fn update_for(&self, annunciator: &str) -> Option<&DisplayUpdate> {
        self.updates.iter().find(|u| u.annunciator == annunciator)
    }
}

// ==========================================
// VIEWS AND STATS
// ==========================================

/// Current display of one annunciator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnunciatorView {
    pub id: String,
    pub current_alarm_id: Option<String>,
    /// Time since the last display update
    #[serde(skip)]
    pub age: Option<Duration>,
    pub muted: bool,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub passes: u64,
    pub alarms_accepted: u64,
    pub messages_dropped: u64,
    pub sends: u64,
    pub overrides: u64,
    pub publish_failures: u64,
}

#[derive(Default)]
struct Counters {
    passes: AtomicU64,
    alarms_accepted: AtomicU64,
    messages_dropped: AtomicU64,
    sends: AtomicU64,
    overrides: AtomicU64,
    publish_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            passes: self.passes.load(Ordering::Relaxed),
            alarms_accepted: self.alarms_accepted.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            overrides: self.overrides.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

// ==========================================
// ENGINE
// ==========================================

struct EngineState {
    store: AlarmStore,
    annunciators: AnnunciatorTable,
    events: VecDeque<DisplayEvent>,
    generation: u64,
}

/// The alarm arbitration engine
pub struct Engine {
    state: Mutex<EngineState>,
    /// Last generation handed to the publisher, one slot per annunciator
    delivered: HashMap<String, Mutex<u64>>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    codec: WireCodec,
    policy: Policy,
    shelve: ShelveTimer,
    retention: Option<Duration>,
    history_limit: usize,
    tick_interval: std::time::Duration,
    running: AtomicBool,
    counters: Counters,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = Self {
            state: Mutex::new(EngineState {
                store: AlarmStore::new(),
                annunciators: AnnunciatorTable::new(config.annunciators.iter().cloned()),
                events: VecDeque::new(),
                generation: 0,
            }),
            delivered: config
                .annunciators
                .iter()
                .map(|id| (id.clone(), Mutex::new(0)))
                .collect(),
            publisher,
            clock,
            codec: WireCodec::new(config.wire_max_len),
            policy: config.policy(),
            shelve: ShelveTimer::new(config.shelve_duration()),
            retention: config.retention(),
            history_limit: config.history_limit,
            tick_interval: config.tick_interval(),
            running: AtomicBool::new(false),
            counters: Counters::default(),
        };

        info!(
            "Engine ready: policy={} pause={}s shelve={}s annunciators={:?}",
            engine.policy,
            config.pause_secs,
            config.shelve_secs,
            config.annunciators
        );
        Ok(engine)
    }

    /// Engine on the wall clock
    pub fn with_system_clock(config: &EngineConfig, publisher: Arc<dyn Publisher>) -> Result<Self> {
        Self::new(config, publisher, Arc::new(SystemClock))
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    // ------------------------------------------
    // Triggers
    // ------------------------------------------

    /// Inbound alarm payload from an alarm source
    pub fn on_inbound_alarm(&self, raw: &[u8]) -> Result<PassReport> {
        let msg = self.codec.decode_alarm(raw).map_err(|e| self.dropped("alarm", e))?;
        self.raise_alarm(msg.severity, &msg.text, msg.id.as_deref())
    }

    /// Inbound payload on an annunciator's response topic
    pub fn on_operator_message(&self, raw: &[u8], annunciator: &str) -> Result<PassReport> {
        if !self.state.lock().annunciators.contains(annunciator) {
            return Err(self.dropped(
                "operator message",
                AdamError::UnknownAnnunciator(annunciator.to_string()),
            ));
        }

        match self
            .codec
            .decode_operator_message(raw)
            .map_err(|e| self.dropped("operator message", e))?
        {
            OperatorMessage::Response { action, id } => {
                self.apply_operator_action(annunciator, id.as_deref(), action)
            }
            OperatorMessage::Command(AnnunciatorCommand::Mute) => self.set_muted(annunciator, true),
            OperatorMessage::Command(AnnunciatorCommand::Unmute) => {
                self.set_muted(annunciator, false)
            }
        }
    }

    /// Periodic tick. Advances shelve and pause timers; idempotent when no
    /// timer expired.
    pub fn on_tick(&self) -> PassReport {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(retention) = self.retention {
            state.store.evict_terminal_before(now - retention);
        }

        self.run_pass(state, now, PassReport::default())
    }

    /// Create an alarm directly (already decoded) and arbitrate. A supplied
    /// id must fit the wire budget.
    pub fn raise_alarm(&self, severity: u8, text: &str, id: Option<&str>) -> Result<PassReport> {
        if let Some(id) = id.and_then(normalize_id).filter(|id| !self.codec.fits_id(id)) {
            return Err(self.dropped(
                "alarm",
                AdamError::MalformedMessage(format!(
                    "alarm id of {} characters exceeds the {} byte limit",
                    id.len(),
                    self.codec.max_len()
                )),
            ));
        }

        let now = self.clock.now();
        let mut state = self.state.lock();

        let alarm = state
            .store
            .create_alarm(severity, text, id, now)
            .map_err(|e| self.dropped("alarm", e))?;
        info!(
            "RECEIVE ALARM id={} sev={} seq={} text={:?}",
            alarm.id(),
            alarm.severity(),
            alarm.sequence(),
            alarm.text()
        );
        let report = PassReport {
            alarm_id: Some(alarm.id().to_string()),
            ..PassReport::default()
        };
        Counters::bump(&self.counters.alarms_accepted);

        Ok(self.run_pass(state, now, report))
    }

    /// Apply an operator action arriving from `annunciator`. `hint` may be
    /// empty (act on what that annunciator shows) or an id prefix.
    pub fn apply_operator_action(
        &self,
        annunciator: &str,
        hint: Option<&str>,
        action: OperatorAction,
    ) -> Result<PassReport> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let current = state
            .annunciators
            .require(annunciator)
            .map_err(|e| self.dropped("operator response", e))?
            .current_alarm_id
            .clone();

        let id = state
            .store
            .resolve_id(hint, current.as_deref())
            .map_err(|e| self.dropped("operator response", e))?;

        let transition = state
            .store
            .apply_operator_action(&id, annunciator, action, now, self.shelve.duration())
            .map_err(|e| {
                warn!("Ignoring {} from {} for alarm {}: {}", action, annunciator, id, e);
                e
            })?;
        info!(
            "OPERATOR {} id={} annunciator={} {} -> {}",
            action, id, annunciator, transition.from, transition.to
        );

        let report = PassReport {
            alarm_id: Some(id),
            transition: Some(transition),
            ..PassReport::default()
        };
        Ok(self.run_pass(state, now, report))
    }

    /// Set an annunciator's mute flag. Selection is unaffected.
    pub fn set_muted(&self, annunciator: &str, muted: bool) -> Result<PassReport> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let changed = state
            .annunciators
            .set_muted(annunciator, muted)
            .map_err(|e| self.dropped("mute command", e))?;
        if changed {
            info!(
                "Annunciator {} {}",
                annunciator,
                if muted { "muted" } else { "unmuted" }
            );
        }
        Ok(self.run_pass(state, now, PassReport::default()))
    }

    // ------------------------------------------
    // Arbitration
    // ------------------------------------------

    fn run_pass(
        &self,
        mut state: MutexGuard<'_, EngineState>,
        now: DateTime<Utc>,
        mut report: PassReport,
    ) -> PassReport {
        self.arbitrate(&mut state, now, &mut report);
        drop(state);

        self.deliver(&mut report);
        Counters::bump(&self.counters.passes);
        debug!(
            "Pass done: {} unshelved, {} updates, {} publish failures",
            report.unshelved.len(),
            report.updates.len(),
            report.publish_failures.len()
        );
        report
    }

    fn arbitrate(&self, state: &mut EngineState, now: DateTime<Utc>, report: &mut PassReport) {
        state.generation += 1;
        let generation = state.generation;
        let EngineState {
            store,
            annunciators,
            events,
            ..
        } = state;

        report.unshelved = self.shelve.release_expired(store, now);

        for (ann, display) in annunciators.iter_mut() {
            let released = self.release_reason(store, ann, display, now).map(|reason| {
                let alarm_id = display.current_alarm_id.take().unwrap_or_default();
                display.clear();
                debug!("Released {} from {} ({:?})", alarm_id, ann, reason);
                (alarm_id, reason)
            });

            let next = {
                let candidates: Vec<&AlarmRecord> = store
                    .open_alarms()
                    .into_iter()
                    .filter(|a| a.is_candidate_for(ann))
                    .collect();
                self.policy
                    .select_next(&candidates, now, display)
                    .map(|a| (a.id().to_string(), a.severity(), a.text().to_string()))
            };
            // A self-acknowledged alarm replaced in the same pass counts as
            // displaced; a closed one is only released.
            let displaced = match released {
                Some((old, ReleaseReason::Acknowledged)) if next.is_some() => Some(old),
                Some((alarm_id, reason)) => {
                    report.events.push(DisplayEvent {
                        at: now,
                        annunciator: ann.to_string(),
                        kind: DisplayEventKind::Released { alarm_id, reason },
                    });
                    None
                }
                None => display.current_alarm_id.clone(),
            };
            let Some((alarm_id, severity, text)) = next else {
                continue;
            };

            let payload = self.codec.encode_alarm(severity.into(), &text, Some(alarm_id.as_str()));
            store.mark_sent(&alarm_id, ann, now);
            display.assign(&alarm_id, now);

            let kind = match &displaced {
                Some(old) => {
                    info!(
                        "OVERRIDE annunciator={} displaced={} new={} policy={}",
                        ann, old, alarm_id, self.policy
                    );
                    Counters::bump(&self.counters.overrides);
                    DisplayEventKind::Override {
                        displaced: old.clone(),
                        alarm_id: alarm_id.clone(),
                    }
                }
                None => DisplayEventKind::Sent {
                    alarm_id: alarm_id.clone(),
                },
            };
            info!(
                "SEND ALARM annunciator={} id={} sev={} policy={}",
                ann, alarm_id, severity, self.policy
            );
            report.events.push(DisplayEvent {
                at: now,
                annunciator: ann.to_string(),
                kind,
            });
            report.updates.push(DisplayUpdate {
                annunciator: ann.to_string(),
                alarm_id,
                severity,
                payload,
                displaced,
                generation,
            });
        }

        events.extend(report.events.iter().cloned());
        while events.len() > self.history_limit {
            events.pop_front();
        }
    }

    /// Whether `display` must let go of its current alarm before selection
    fn release_reason(
        &self,
        store: &AlarmStore,
        ann: &str,
        display: &AnnunciatorState,
        now: DateTime<Utc>,
    ) -> Option<ReleaseReason> {
        let current = display.current_alarm_id.as_deref()?;
        match store.get(current) {
            Some(alarm) if alarm.is_open() => {
                let acked_here = alarm.acked_by().contains(ann);
                (acked_here && !self.policy.holds(display, now))
                    .then_some(ReleaseReason::Acknowledged)
            }
            _ => Some(ReleaseReason::Closed),
        }
    }

    /// Hand updates to the publisher. An update older than one already
    /// delivered to the same annunciator (a concurrent pass won the race) is
    /// skipped.
    fn deliver(&self, report: &mut PassReport) {
        if report.updates.is_empty() {
            return;
        }

        let mut sent = Vec::with_capacity(report.updates.len());
        for update in report.updates.drain(..) {
            // Held across the publish so one annunciator's updates stay in
            // generation order; other annunciators are not blocked.
            let mut last = self.delivered.get(&update.annunciator).map(|slot| slot.lock());
            if let Some(last) = last.as_deref_mut() {
                if *last > update.generation {
                    debug!(
                        "Skipping superseded update for {} (alarm {})",
                        update.annunciator, update.alarm_id
                    );
                    continue;
                }
                *last = update.generation;
            }

            Counters::bump(&self.counters.sends);
            if let Err(e) = self.publisher.publish(&update.annunciator, &update.payload) {
                let err = match e {
                    e @ AdamError::PublishFailure { .. } => e,
                    other => AdamError::PublishFailure {
                        annunciator: update.annunciator.clone(),
                        reason: other.to_string(),
                    },
                };
                warn!("{}", err);
                Counters::bump(&self.counters.publish_failures);
                report.publish_failures.push(err);
            }
            drop(last);
            sent.push(update);
        }
        report.updates = sent;
    }

    fn dropped(&self, what: &str, err: AdamError) -> AdamError {
        warn!("Dropping {}: {}", what, err);
        Counters::bump(&self.counters.messages_dropped);
        err
    }

    // ------------------------------------------
    // Views
    // ------------------------------------------

    /// Open alarms in the order the policy ranks them
    pub fn open_view(&self) -> Vec<AlarmRecord> {
        let state = self.state.lock();
        let mut open = state.store.open_alarms();
        self.policy.rank(&mut open);
        open.into_iter().cloned().collect()
    }

    /// Every retained alarm in policy order
    pub fn all_view(&self) -> Vec<AlarmRecord> {
        let state = self.state.lock();
        let mut all: Vec<&AlarmRecord> = state.store.all_alarms().collect();
        self.policy.rank(&mut all);
        all.into_iter().cloned().collect()
    }

    pub fn alarm(&self, id: &str) -> Option<AlarmRecord> {
        self.state.lock().store.get(id).cloned()
    }

    pub fn alarm_status(&self, id: &str) -> Option<AlarmStatus> {
        self.state.lock().store.get(id).map(AlarmRecord::status)
    }

    /// Current alarm per annunciator, in configuration order
    pub fn annunciator_view(&self) -> Vec<AnnunciatorView> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .annunciators
            .iter()
            .map(|(id, display)| AnnunciatorView {
                id: id.to_string(),
                current_alarm_id: display.current_alarm_id.clone(),
                age: display.last_sent_at.map(|sent| now - sent),
                muted: display.muted,
            })
            .collect()
    }

    pub fn annunciator(&self, id: &str) -> Option<AnnunciatorState> {
        self.state.lock().annunciators.get(id).cloned()
    }

    /// Most recent display events, oldest first
    pub fn display_events(&self, limit: usize) -> Vec<DisplayEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    // ------------------------------------------
    // Ticker
    // ------------------------------------------

    /// Call [`on_tick`](Self::on_tick) every configured interval until
    /// [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine ticker is already running");
            return;
        }
        info!("Starting arbitration ticker every {:?}", self.tick_interval);

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.on_tick();
        }
        info!("Arbitration ticker stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
