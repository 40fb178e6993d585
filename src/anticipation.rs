//! Anticipation state machine.
//!
//! Decides when to issue an early setpoint command so a zone reaches a
//! scheduled target temperature on time, keeps the command in place against
//! overrides, and knows when to stop. The engine itself never performs I/O:
//! `evaluate` returns the setpoint command the coordinator must deliver,
//! and the coordinator reports a successful delivery back through
//! `note_command_sent`. A failed send is simply never reported, which makes
//! the engine retry through the normal drift/interval rules next cycle.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Start this many minutes before the computed optimal instant, matching
/// the control-cycle cadence so a transition cannot slip between two polls.
pub const START_BUFFER_MIN: f64 = 2.0;
/// The target counts as reached within this tolerance.
pub const REACH_TOLERANCE: f64 = 0.2;
/// Minimum temperature shortfall worth anticipating, and the drift beyond
/// which the actuator setpoint is considered overridden.
pub const START_DELTA: f64 = 0.3;
/// Resend the setpoint command after this long without one.
pub const RESEND_INTERVAL_SECS: i64 = 600;

/// Mutable engine state, one instance per zone.
///
/// `active` implies `target_temp` and `target_time` are set; the time may be
/// an estimate (`now + minutes_needed`) when the schedule source did not
/// provide one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnticipationState {
    pub active: bool,
    pub target_temp: Option<f64>,
    pub target_time: Option<NaiveDateTime>,
    pub minutes_needed: Option<f64>,
    pub minutes_until_target: Option<f64>,
    pub started_at: Option<NaiveDateTime>,
    pub temp_at_start: Option<f64>,
}

/// Inputs gathered by the coordinator for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvalInputs {
    pub temp_indoor: Option<f64>,
    pub temp_outdoor: Option<f64>,
    /// Estimated minutes to target from the thermal model; absent means the
    /// model has no usable data.
    pub minutes_needed: Option<f64>,
    /// Next scheduled setpoint to anticipate towards.
    pub next_setpoint: Option<f64>,
    /// The schedule source's currently resolved setpoint, used for the
    /// unknown-target-time start rule.
    pub schedule_setpoint: Option<f64>,
    /// The setpoint the actuator currently reports, for drift detection.
    pub reported_setpoint: Option<f64>,
    /// True when the actuator was recently off and must not restart.
    pub anti_cycle_active: bool,
    /// When the schedule transition happens, if known.
    pub target_time: Option<NaiveDateTime>,
}

/// An idempotent setpoint command for the coordinator to deliver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointCommand {
    pub temperature: f64,
}

pub struct AnticipationEngine {
    zone_name: String,
    state: AnticipationState,
    last_sent: Option<f64>,
    last_sent_at: Option<NaiveDateTime>,
}

impl AnticipationEngine {
    pub fn new(zone_name: &str) -> Self {
        Self {
            zone_name: zone_name.to_string(),
            state: AnticipationState::default(),
            last_sent: None,
            last_sent_at: None,
        }
    }

    pub fn state(&self) -> &AnticipationState {
        &self.state
    }

    /// The last setpoint successfully delivered, if any.
    pub fn last_sent(&self) -> Option<f64> {
        self.last_sent
    }

    /// Record a successfully delivered setpoint command.
    pub fn note_command_sent(&mut self, temperature: f64, now: NaiveDateTime) {
        self.last_sent = Some(temperature);
        self.last_sent_at = Some(now);
    }

    /// Drop back to idle, clearing all cycle state.
    pub fn deactivate(&mut self) {
        self.state = AnticipationState::default();
        self.last_sent = None;
        self.last_sent_at = None;
    }

    /// Run one evaluation of the state machine. Called once per control
    /// cycle; returns the setpoint command to deliver, if any.
    pub fn evaluate(&mut self, inputs: &EvalInputs, now: NaiveDateTime) -> Option<SetpointCommand> {
        // Lost the signal: without indoor temperature, a target or an
        // estimate there is nothing to drive towards.
        let (Some(indoor), Some(next), Some(needed)) = (
            inputs.temp_indoor,
            inputs.next_setpoint,
            inputs.minutes_needed,
        ) else {
            if self.state.active {
                debug!("[{}] anticipation input lost, deactivating", self.zone_name);
                self.deactivate();
            }
            return None;
        };

        // Target effectively reached.
        if indoor >= next - REACH_TOLERANCE {
            if self.state.active {
                if let Some(target_time) = self.state.target_time {
                    let minutes_early = minutes_between(now, target_time);
                    info!(
                        "[{}] target reached ({:.1}C >= {:.1}C), {:.0} min before schedule",
                        self.zone_name, indoor, next, minutes_early,
                    );
                } else {
                    info!(
                        "[{}] target reached ({:.1}C >= {:.1}C)",
                        self.zone_name, indoor, next,
                    );
                }
                self.deactivate();
            }
            return None;
        }

        // The anti-short-cycle gate blocks starting, never stopping.
        if inputs.anti_cycle_active && !self.state.active {
            debug!(
                "[{}] anti-short-cycle gate active, anticipation deferred",
                self.zone_name
            );
            return None;
        }

        let mut should_start = false;
        let mut estimated_target_time = inputs.target_time;

        match inputs.target_time {
            Some(target_time) if needed > 0.0 => {
                let minutes_until_transition = minutes_between(now, target_time);
                let minutes_until_start = minutes_until_transition - needed;
                if minutes_until_start <= START_BUFFER_MIN {
                    should_start = true;
                    debug!(
                        "[{}] transition in {:.0} min, {:.0} min needed, start in {:.0} min",
                        self.zone_name, minutes_until_transition, needed, minutes_until_start,
                    );
                } else if minutes_until_transition < 0.0 {
                    // Transition already passed with the target still unmet.
                    should_start = true;
                }
            }
            _ => {
                // No known transition time: start as soon as the scheduled
                // setpoint runs ahead of the currently resolved value.
                if let Some(current_schedule) = inputs.schedule_setpoint {
                    if next > current_schedule + START_DELTA {
                        should_start = true;
                        estimated_target_time = Some(now + minutes_duration(needed));
                    }
                }
            }
        }

        if should_start && !self.state.active {
            let delta = next - indoor;
            if delta > START_DELTA && needed > 0.0 {
                let target_time =
                    estimated_target_time.unwrap_or_else(|| now + minutes_duration(needed));
                info!(
                    "[{}] anticipation started: {:.1}C -> {:.1}C (delta {:.1}C, ~{:.0} min needed, target {})",
                    self.zone_name,
                    indoor,
                    next,
                    delta,
                    needed,
                    target_time.format("%H:%M"),
                );
                self.state = AnticipationState {
                    active: true,
                    target_temp: Some(next),
                    target_time: Some(target_time),
                    minutes_needed: Some(needed),
                    minutes_until_target: Some(needed),
                    started_at: Some(now),
                    temp_at_start: Some(indoor),
                };
                return Some(SetpointCommand { temperature: next });
            }
            return None;
        }

        if self.state.active {
            if should_start || indoor < next - REACH_TOLERANCE {
                // Still working towards the target: refresh the countdown
                // and keep the command in place against overrides.
                self.state.minutes_until_target = Some(
                    self.state
                        .target_time
                        .map(|t| minutes_between(now, t).max(0.0))
                        .unwrap_or(0.0),
                );

                let mut should_resend = self
                    .last_sent_at
                    .map_or(true, |t| (now - t).num_seconds() > RESEND_INTERVAL_SECS);

                if let (Some(reported), Some(target)) =
                    (inputs.reported_setpoint, self.state.target_temp)
                {
                    if (reported - target).abs() > START_DELTA {
                        warn!(
                            "[{}] actuator setpoint drifted ({:.1}C != {:.1}C), resending",
                            self.zone_name, reported, target,
                        );
                        should_resend = true;
                    }
                }

                if should_resend {
                    if let Some(target) = self.state.target_temp {
                        return Some(SetpointCommand {
                            temperature: target,
                        });
                    }
                }
            } else {
                info!(
                    "[{}] schedule transition no longer relevant, ending anticipation",
                    self.zone_name
                );
                self.deactivate();
            }
        }

        None
    }
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

fn minutes_duration(minutes: f64) -> Duration {
    Duration::seconds((minutes * 60.0) as i64)
}
