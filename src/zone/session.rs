//! Heating-session tracking.
//!
//! Watches the actuator's heating/idle action across cycles and turns each
//! continuous heating period into a `HeatingSession` learning sample, after
//! filtering out periods too short or too flat to be meaningful.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::hub::HVAC_ACTION_HEATING;
use crate::thermal::{round_to, HeatingSession};

/// Heating periods shorter than this are discarded.
pub const MIN_SESSION_DURATION_SEC: f64 = 300.0;
/// Heating periods gaining less than this are discarded.
pub const MIN_SESSION_DELTA_TEMP: f64 = 0.3;

/// An in-flight heating period.
#[derive(Debug, Clone)]
struct ActiveSession {
    started_at: NaiveDateTime,
    temp_start: f64,
    temp_ext_start: Option<f64>,
}

/// What one observation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    None,
    /// A heating period began this cycle.
    Started,
    /// A heating period ended. `session` is present only when the period
    /// passed the filters; `mark_off_time` is false when the indoor reading
    /// vanished at the end, in which case the period is dropped entirely.
    Ended {
        session: Option<HeatingSession>,
        mark_off_time: bool,
    },
}

pub struct SessionTracker {
    zone_name: String,
    warmup_ignore_min: f64,
    current: Option<ActiveSession>,
}

impl SessionTracker {
    pub fn new(zone_name: &str, warmup_ignore_min: f64) -> Self {
        Self {
            zone_name: zone_name.to_string(),
            warmup_ignore_min,
            current: None,
        }
    }

    pub fn set_warmup_ignore(&mut self, minutes: f64) {
        self.warmup_ignore_min = minutes;
    }

    pub fn is_tracking(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one cycle's actuator action and temperatures.
    pub fn observe(
        &mut self,
        hvac_action: Option<&str>,
        temp_indoor: Option<f64>,
        temp_outdoor: Option<f64>,
        anticipating: bool,
        now: NaiveDateTime,
    ) -> SessionEvent {
        let heating = hvac_action == Some(HVAC_ACTION_HEATING);

        match (self.current.is_some(), heating) {
            (false, true) => {
                let Some(indoor) = temp_indoor else {
                    return SessionEvent::None;
                };
                self.current = Some(ActiveSession {
                    started_at: now,
                    temp_start: indoor,
                    temp_ext_start: temp_outdoor,
                });
                debug!("[{}] heating session started at {:.1}C", self.zone_name, indoor);
                SessionEvent::Started
            }
            (true, true) => SessionEvent::None,
            (true, false) => self.end_session(temp_indoor, temp_outdoor, anticipating, now),
            (false, false) => SessionEvent::None,
        }
    }

    fn end_session(
        &mut self,
        temp_indoor: Option<f64>,
        temp_outdoor: Option<f64>,
        anticipating: bool,
        now: NaiveDateTime,
    ) -> SessionEvent {
        let Some(active) = self.current.take() else {
            return SessionEvent::None;
        };

        let Some(indoor) = temp_indoor else {
            // Indoor reading vanished with the heating stop; nothing usable.
            return SessionEvent::Ended {
                session: None,
                mark_off_time: false,
            };
        };

        let duration_sec = (now - active.started_at).num_milliseconds() as f64 / 1000.0;
        let delta_temp = indoor - active.temp_start;

        if duration_sec < MIN_SESSION_DURATION_SEC || delta_temp < MIN_SESSION_DELTA_TEMP {
            debug!(
                "[{}] session ignored ({:.0}s, {:.1}C)",
                self.zone_name, duration_sec, delta_temp,
            );
            return SessionEvent::Ended {
                session: None,
                mark_off_time: true,
            };
        }

        let duration_min = duration_sec / 60.0;
        // Discount the actuator's power-ramp phase.
        let effective_duration = (duration_min - self.warmup_ignore_min).max(0.0);
        if effective_duration <= 0.0 {
            return SessionEvent::Ended {
                session: None,
                mark_off_time: true,
            };
        }

        let speed = delta_temp / effective_duration;

        let mut ext_temps = Vec::new();
        if let Some(t) = active.temp_ext_start {
            ext_temps.push(t);
        }
        if let Some(t) = temp_outdoor {
            ext_temps.push(t);
        }
        let temp_ext_avg = if ext_temps.is_empty() {
            0.0
        } else {
            ext_temps.iter().sum::<f64>() / ext_temps.len() as f64
        };

        let session = HeatingSession {
            date: now.format("%Y-%m-%d %H:%M").to_string(),
            temp_start: active.temp_start,
            temp_end: indoor,
            temp_ext_avg: round_to(temp_ext_avg, 1),
            delta_temp: round_to(delta_temp, 2),
            duration_min: round_to(duration_min, 1),
            speed_degc_per_min: round_to(speed, 5),
            anticipated: anticipating,
        };

        SessionEvent::Ended {
            session: Some(session),
            mark_off_time: true,
        }
    }
}
