//! Per-zone control loop.
//!
//! `ZoneCoordinator` owns all per-zone state and runs the cycle body:
//! snapshot inputs, track heating sessions into the thermal model, resolve
//! the next schedule transition, compute the effective margin, drive the
//! anticipation engine, feed the feedback loop on activation edges, and
//! flag when state must be persisted. The cycle itself is synchronous and
//! takes `now` explicitly; `runtime` owns the tokio task, timers and I/O.

pub mod runtime;
pub mod session;
pub mod store;

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info};

use crate::advisor::{
    AdvisorContext, CurrentConditions, MarginAdvisor, ThermalReport, WeatherReport,
};
use crate::anticipation::{AnticipationEngine, AnticipationState, EvalInputs, SetpointCommand};
use crate::config::ZoneConfig;
use crate::error::HeatwiseError;
use crate::feedback::{FeedbackLoop, FeedbackStats};
use crate::schedule::{self, NextTransition, ScheduleSnapshot, TransitionSource, HEATING_DELTA};
use crate::thermal::ThermalModel;

use self::session::{SessionEvent, SessionTracker};
use self::store::{StoredAdvisorResponse, ZoneState, ZoneStore};

/// Fixed control-cycle cadence.
pub const SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);
/// The two fixed daily advisor slots, local hours.
pub const ADVISOR_SLOTS: [(u32, AdvisorContext); 2] = [
    (9, AdvisorContext::Morning),
    (16, AdvisorContext::Evening),
];
/// A cycle counts as having reached its target within this tolerance.
const REACHED_TOLERANCE: f64 = 0.3;
/// Schedule setpoint drops beyond this end any active anticipation.
const SCHEDULE_DROP_DELTA: f64 = 0.1;

/// Everything the cycle body needs, snapshotted from the hub up front so
/// the core never waits on I/O mid-evaluation.
#[derive(Debug, Clone, Default)]
pub struct CycleInputs {
    pub temp_indoor: Option<f64>,
    pub temp_outdoor: Option<f64>,
    pub hvac_action: Option<String>,
    /// Setpoint the actuator currently reports.
    pub reported_setpoint: Option<f64>,
    pub schedule: Option<ScheduleSnapshot>,
    pub weather: WeatherReport,
}

/// Derived zone state for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneRunState {
    Disabled,
    /// Not enough sessions collected to trust estimates yet.
    Learning,
    Ready,
    Anticipating,
}

/// Schedule context included in the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub next_transition_time: Option<String>,
    pub next_transition_temp: f64,
    pub current_schedule_temp: f64,
    pub minutes_until_transition: Option<f64>,
    pub source: TransitionSource,
}

/// Per-cycle observability snapshot. Consumed by logs and diagnostics; the
/// control loop itself never reads it back.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub zone_name: String,
    pub state: ZoneRunState,
    pub enabled: bool,
    pub temp_indoor: Option<f64>,
    pub temp_outdoor: Option<f64>,
    pub hvac_action: Option<String>,
    pub current_setpoint: Option<f64>,
    pub num_sessions: usize,
    pub avg_speed: Option<f64>,
    pub min_per_deg: Option<f64>,
    pub minutes_needed: Option<f64>,
    pub next_setpoint: Option<f64>,
    pub anticipation: AnticipationState,
    pub schedule: Option<ScheduleInfo>,
    pub safety_margin: f64,
    pub effective_margin: f64,
    pub feedback_adjustment: f64,
    pub feedback_stats: FeedbackStats,
    pub advisor_provider: String,
    pub advisor_model: String,
    pub advisor_adjustment: f64,
    pub advisor_reasoning: String,
    pub advisor_last_update: String,
    pub anti_cycle_active: bool,
}

/// Result of one cycle: the status snapshot, an actuator command to
/// deliver, and whether state changed in a way worth persisting.
#[derive(Debug)]
pub struct CycleOutcome {
    pub status: ZoneStatus,
    pub command: Option<SetpointCommand>,
    pub persist: bool,
}

/// Anticipation inputs derived from the model and resolver this cycle.
#[derive(Debug, Clone, Copy, Default)]
struct AnticipationCalc {
    minutes_needed: Option<f64>,
    next_setpoint: Option<f64>,
}

pub struct ZoneCoordinator {
    config: ZoneConfig,
    model: ThermalModel,
    engine: AnticipationEngine,
    feedback: FeedbackLoop,
    tracker: SessionTracker,
    advisor: MarginAdvisor,
    store: ZoneStore,
    enabled: bool,
    advisor_enabled: bool,
    safety_margin: f64,
    last_off_time: Option<NaiveDateTime>,
    last_advisor: Option<StoredAdvisorResponse>,
    advisor_adjustment: f64,
    was_active: bool,
    last_schedule_setpoint: Option<f64>,
}

impl ZoneCoordinator {
    /// Build a coordinator and seed it from persisted state. A corrupt
    /// state file is logged and replaced by a fresh start; the in-memory
    /// state is authoritative from then on.
    pub fn new(config: ZoneConfig, data_dir: &Path) -> Self {
        let store = ZoneStore::new(data_dir, &config.name);
        let mut model = ThermalModel::new();
        let mut feedback = FeedbackLoop::new(&config.name);
        let mut last_off_time = None;
        let mut last_advisor = None;
        let mut advisor_adjustment = 0.0;

        match store.load() {
            Ok(state) => {
                if !state.sessions.is_empty() || !state.feedback_history.is_empty() {
                    info!(
                        "[{}] loaded {} sessions, {} feedback results",
                        config.name,
                        state.sessions.len(),
                        state.feedback_history.len(),
                    );
                }
                model.load_sessions(state.sessions);
                feedback.load_history(state.feedback_history);
                last_off_time = state.last_off_time;
                if let Some(response) = state.last_advisor_response {
                    advisor_adjustment = response.margin_adjustment;
                    last_advisor = Some(response);
                }
            }
            Err(e) => {
                error!("[{}] {e}; starting with empty state", config.name);
            }
        }

        let engine = AnticipationEngine::new(&config.name);
        let tracker = SessionTracker::new(&config.name, config.warmup_ignore_min);
        let advisor = MarginAdvisor::from_config(&config.advisor);
        let safety_margin = config.safety_margin();

        Self {
            config,
            model,
            engine,
            feedback,
            tracker,
            advisor,
            store,
            enabled: true,
            advisor_enabled: true,
            safety_margin,
            last_off_time,
            last_advisor,
            advisor_adjustment,
            was_active: false,
            last_schedule_setpoint: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn model(&self) -> &ThermalModel {
        &self.model
    }

    pub fn engine_state(&self) -> &AnticipationState {
        self.engine.state()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        info!(
            "[{}] zone {}",
            self.config.name,
            if enabled { "enabled" } else { "disabled" }
        );
        self.enabled = enabled;
    }

    pub fn set_advisor_enabled(&mut self, enabled: bool) {
        info!(
            "[{}] advisor {}",
            self.config.name,
            if enabled { "enabled" } else { "disabled" }
        );
        self.advisor_enabled = enabled;
    }

    /// Adjust the base safety margin at runtime (multiplier, e.g. 1.15).
    pub fn set_base_margin(&mut self, margin: f64) {
        info!("[{}] base margin set to {:.0}%", self.config.name, margin * 100.0);
        self.safety_margin = margin;
    }

    pub fn set_warmup_ignore(&mut self, minutes: f64) {
        self.tracker.set_warmup_ignore(minutes);
    }

    /// Clear the thermal model history (operational trigger).
    pub fn reset_sessions(&mut self) {
        info!("[{}] resetting all sessions", self.config.name);
        self.model.reset();
    }

    /// Report a successfully delivered setpoint command back to the engine.
    pub fn note_command_sent(&mut self, command: SetpointCommand, now: NaiveDateTime) {
        self.engine.note_command_sent(command.temperature, now);
    }

    /// Base + advisor + feedback margin, applied to every estimate.
    pub fn effective_margin(&self) -> f64 {
        self.safety_margin + self.advisor_adjustment + self.feedback.margin_suggestion().unwrap_or(0.0)
    }

    fn anti_cycle_active(&self, now: NaiveDateTime) -> bool {
        if !self.config.anti_short_cycle {
            return false;
        }
        let Some(off_time) = self.last_off_time else {
            return false;
        };
        let elapsed = (now - off_time).num_seconds();
        elapsed >= 0 && (elapsed as u64) < self.config.min_off_time_sec
    }

    /// Run one control cycle.
    pub fn run_cycle(&mut self, inputs: &CycleInputs, now: NaiveDateTime) -> CycleOutcome {
        if !self.enabled {
            return CycleOutcome {
                status: self.disabled_status(),
                command: None,
                persist: false,
            };
        }

        let mut persist = false;

        // Session tracking: learn from every completed heating period.
        match self.tracker.observe(
            inputs.hvac_action.as_deref(),
            inputs.temp_indoor,
            inputs.temp_outdoor,
            self.was_active,
            now,
        ) {
            SessionEvent::Ended {
                session,
                mark_off_time,
            } => {
                if mark_off_time {
                    self.last_off_time = Some(now);
                }
                if let Some(session) = session {
                    info!(
                        "[{}] session recorded: {:.1}->{:.1}C in {:.0} min ({:.4}C/min)",
                        self.config.name,
                        session.temp_start,
                        session.temp_end,
                        session.duration_min,
                        session.speed_degc_per_min,
                    );
                    self.model.record(session);
                    persist = true;
                }
            }
            SessionEvent::Started | SessionEvent::None => {}
        }

        // Schedule resolution.
        let transition = inputs
            .schedule
            .as_ref()
            .and_then(|s| schedule::next_heating_transition(s, now));
        let schedule_setpoint = inputs.schedule.as_ref().and_then(|s| s.setpoint);

        // A setpoint drop between cycles means the schedule moved to a
        // lower level (eco); any anticipation towards the old target is
        // obsolete.
        if let (Some(previous), Some(current)) = (self.last_schedule_setpoint, schedule_setpoint) {
            if previous - current > SCHEDULE_DROP_DELTA && self.engine.state().active {
                info!(
                    "[{}] schedule dropped {:.1} -> {:.1}C, ending anticipation",
                    self.config.name, previous, current,
                );
                self.engine.deactivate();
            }
        }
        self.last_schedule_setpoint = schedule_setpoint;

        let calc = self.calculate_anticipation(
            inputs.temp_indoor,
            inputs.temp_outdoor,
            transition.as_ref(),
            schedule_setpoint,
        );

        let effective_margin = self.effective_margin();
        let feedback_adjustment = self.feedback.margin_suggestion().unwrap_or(0.0);
        let anti_cycle_active = self.anti_cycle_active(now);

        // Anticipation decision.
        let eval = EvalInputs {
            temp_indoor: inputs.temp_indoor,
            temp_outdoor: inputs.temp_outdoor,
            minutes_needed: calc.minutes_needed,
            next_setpoint: calc.next_setpoint,
            schedule_setpoint,
            reported_setpoint: inputs.reported_setpoint,
            anti_cycle_active,
            target_time: transition.as_ref().and_then(|t| t.target_time),
        };
        let command = self.engine.evaluate(&eval, now);

        // Feedback edges: start tracking on activation, close on
        // deactivation.
        let active = self.engine.state().active;
        if !self.was_active && active {
            if let Some(indoor) = inputs.temp_indoor {
                let state = self.engine.state();
                self.feedback.start_tracking(
                    state.target_temp.unwrap_or(0.0),
                    state.target_time.unwrap_or(now),
                    indoor,
                    effective_margin,
                    self.advisor_adjustment,
                    inputs.temp_outdoor.unwrap_or(0.0),
                );
            }
        }
        if self.was_active && !active {
            if let Some(indoor) = inputs.temp_indoor {
                let reached = calc
                    .next_setpoint
                    .is_some_and(|target| indoor >= target - REACHED_TOLERANCE);
                if self.feedback.record_result(indoor, reached, now).is_some() {
                    persist = true;
                }
            }
        }
        self.was_active = active;

        let status = self.build_status(
            inputs,
            &calc,
            transition.as_ref(),
            effective_margin,
            feedback_adjustment,
            anti_cycle_active,
            now,
        );

        CycleOutcome {
            status,
            command,
            persist,
        }
    }

    /// Determine the anticipation target and the minutes needed to reach
    /// it. Estimates are only trusted once enough sessions are collected.
    fn calculate_anticipation(
        &self,
        temp_indoor: Option<f64>,
        temp_outdoor: Option<f64>,
        transition: Option<&NextTransition>,
        schedule_setpoint: Option<f64>,
    ) -> AnticipationCalc {
        let (Some(indoor), Some(outdoor)) = (temp_indoor, temp_outdoor) else {
            return AnticipationCalc::default();
        };
        if self.model.num_sessions() < self.config.min_sessions {
            return AnticipationCalc::default();
        }

        let next_setpoint = match transition {
            Some(t) if t.is_heating_up() => Some(t.target_temp),
            _ => schedule_setpoint.filter(|&sp| sp > indoor + HEATING_DELTA),
        };

        let Some(target) = next_setpoint else {
            return AnticipationCalc::default();
        };
        if target <= indoor {
            return AnticipationCalc::default();
        }

        let minutes_needed =
            self.model
                .estimate_minutes(indoor, target, outdoor, self.effective_margin());
        let Some(minutes_needed) = minutes_needed else {
            return AnticipationCalc::default();
        };

        AnticipationCalc {
            minutes_needed: Some(minutes_needed),
            next_setpoint: Some(target),
        }
    }

    /// Call the advisor and adopt its adjustment. Returns true when a new
    /// adjustment was accepted (worth persisting and re-evaluating); on
    /// error or timeout the previous adjustment is retained.
    pub async fn refresh_advice(&mut self, context: AdvisorContext, inputs: &CycleInputs) -> bool {
        if !self.advisor_enabled {
            return false;
        }

        info!(
            "[{}] advisor call ({}) context: {}",
            self.config.name,
            self.advisor.provider_name(),
            context.as_str(),
        );

        let recent_start = self.model.sessions().len().saturating_sub(10);
        let thermal = ThermalReport {
            summary: self.model.summary().cloned(),
            recent_sessions: self.model.sessions()[recent_start..].to_vec(),
        };
        let current = CurrentConditions {
            temp_indoor: inputs.temp_indoor,
            temp_outdoor: inputs.temp_outdoor,
            setpoint: inputs.schedule.as_ref().and_then(|s| s.setpoint),
            margin_pct: (self.safety_margin * 100.0).round() as i64,
        };

        let response = self
            .advisor
            .request_adjustment(&self.config.name, &thermal, &inputs.weather, &current, context)
            .await;

        if let Some(error) = &response.error {
            error!("[{}] advisor error: {error}", self.config.name);
            return false;
        }

        self.advisor_adjustment = response.margin_adjustment;
        info!(
            "[{}] advisor [{}]: margin {:+.0}% | {}",
            self.config.name,
            context.as_str(),
            response.margin_adjustment * 100.0,
            response.reasoning,
        );
        self.last_advisor = Some(StoredAdvisorResponse {
            margin_adjustment: response.margin_adjustment,
            reasoning: response.reasoning,
            timestamp: response.timestamp,
            provider: response.provider,
        });
        true
    }

    /// Persist the current state.
    pub fn save(&self) -> Result<(), HeatwiseError> {
        let state = ZoneState {
            version: store::STATE_VERSION,
            sessions: self.model.sessions().to_vec(),
            last_off_time: self.last_off_time,
            last_advisor_response: self.last_advisor.clone(),
            feedback_history: self.feedback.history().to_vec(),
        };
        self.store.save(&state)
    }

    fn run_state(&self) -> ZoneRunState {
        if !self.enabled {
            return ZoneRunState::Disabled;
        }
        if self.model.num_sessions() < self.config.min_sessions {
            return ZoneRunState::Learning;
        }
        if self.engine.state().active {
            return ZoneRunState::Anticipating;
        }
        ZoneRunState::Ready
    }

    fn disabled_status(&self) -> ZoneStatus {
        ZoneStatus {
            zone_name: self.config.name.clone(),
            state: ZoneRunState::Disabled,
            enabled: false,
            temp_indoor: None,
            temp_outdoor: None,
            hvac_action: None,
            current_setpoint: None,
            num_sessions: self.model.num_sessions(),
            avg_speed: self.model.avg_speed(),
            min_per_deg: self.model.min_per_deg(),
            minutes_needed: None,
            next_setpoint: None,
            anticipation: self.engine.state().clone(),
            schedule: None,
            safety_margin: self.safety_margin,
            effective_margin: self.safety_margin,
            feedback_adjustment: 0.0,
            feedback_stats: self.feedback.stats(),
            advisor_provider: self.advisor.provider_name().to_string(),
            advisor_model: self.advisor.model_name(),
            advisor_adjustment: self.advisor_adjustment,
            advisor_reasoning: String::new(),
            advisor_last_update: String::new(),
            anti_cycle_active: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_status(
        &self,
        inputs: &CycleInputs,
        calc: &AnticipationCalc,
        transition: Option<&NextTransition>,
        effective_margin: f64,
        feedback_adjustment: f64,
        anti_cycle_active: bool,
        now: NaiveDateTime,
    ) -> ZoneStatus {
        let schedule = transition.map(|t| ScheduleInfo {
            next_transition_time: t.target_time.map(|at| at.format("%H:%M").to_string()),
            next_transition_temp: t.target_temp,
            current_schedule_temp: t.current_temp_schedule,
            minutes_until_transition: t.minutes_until(now).map(|m| m.round()),
            source: t.source,
        });

        ZoneStatus {
            zone_name: self.config.name.clone(),
            state: self.run_state(),
            enabled: self.enabled,
            temp_indoor: inputs.temp_indoor,
            temp_outdoor: inputs.temp_outdoor,
            hvac_action: inputs.hvac_action.clone(),
            current_setpoint: inputs.reported_setpoint,
            num_sessions: self.model.num_sessions(),
            avg_speed: self.model.avg_speed(),
            min_per_deg: self.model.min_per_deg(),
            minutes_needed: calc.minutes_needed,
            next_setpoint: calc.next_setpoint,
            anticipation: self.engine.state().clone(),
            schedule,
            safety_margin: self.safety_margin,
            effective_margin,
            feedback_adjustment,
            feedback_stats: self.feedback.stats(),
            advisor_provider: self.advisor.provider_name().to_string(),
            advisor_model: self.advisor.model_name(),
            advisor_adjustment: self.advisor_adjustment,
            advisor_reasoning: self
                .last_advisor
                .as_ref()
                .map(|r| r.reasoning.clone())
                .unwrap_or_default(),
            advisor_last_update: self
                .last_advisor
                .as_ref()
                .map(|r| r.timestamp.clone())
                .unwrap_or_default(),
            anti_cycle_active,
        }
    }
}
