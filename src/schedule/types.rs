use chrono::NaiveDateTime;
use serde::Serialize;

/// Setpoint increases smaller than this are not worth anticipating.
pub const HEATING_DELTA: f64 = 0.3;

/// Which resolution strategy produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    /// Found in the schedule source's event list.
    EventSchedule,
    /// Derived from comfort/eco preset attributes (time unknown).
    PresetPair,
    /// No upcoming change known; reports the current setpoint only.
    CurrentOnly,
}

/// The next point at which the scheduled setpoint will change.
///
/// Recomputed every cycle, never persisted. `target_time` is absent when
/// the strategy knows the target value but not when it applies (preset
/// strategy, or the current-only fallback).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextTransition {
    pub target_time: Option<NaiveDateTime>,
    pub target_temp: f64,
    pub current_temp_schedule: f64,
    pub source: TransitionSource,
}

impl NextTransition {
    /// Does this transition require heating up?
    pub fn is_heating_up(&self) -> bool {
        self.target_temp > self.current_temp_schedule + HEATING_DELTA
    }

    pub fn delta(&self) -> f64 {
        self.target_temp - self.current_temp_schedule
    }

    /// Minutes until the transition, clamped at zero. Absent when the
    /// transition time is unknown.
    pub fn minutes_until(&self, now: NaiveDateTime) -> Option<f64> {
        self.target_time
            .map(|t| ((t - now).num_milliseconds() as f64 / 60_000.0).max(0.0))
    }
}

/// Inputs to schedule resolution, extracted from a schedule entity.
///
/// Field aliases accepted on extraction: the event list may live under
/// `events`, `schedule` or `entries`; presets under `comfort_temp`/`comfort`
/// and `eco_temp`/`eco`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    /// The source's current numeric setpoint, absent when unavailable.
    pub setpoint: Option<f64>,
    /// Raw event entries; individual events are parsed defensively during
    /// resolution so one malformed entry never blocks the rest.
    pub events: Vec<serde_json::Value>,
    pub comfort: Option<f64>,
    pub eco: Option<f64>,
    pub preset_mode: Option<String>,
}

impl ScheduleSnapshot {
    /// Build a snapshot from an entity's state string and attribute object.
    /// Sentinel states (`unavailable`, `unknown`) and non-numeric states
    /// yield an absent setpoint.
    pub fn from_parts(state: &str, attributes: &serde_json::Value) -> Self {
        let setpoint = match state {
            "unavailable" | "unknown" => None,
            s => s.trim().parse::<f64>().ok(),
        };

        let events = ["events", "schedule", "entries"]
            .iter()
            .find_map(|k| attributes.get(k).and_then(|v| v.as_array()))
            .cloned()
            .unwrap_or_default();

        let comfort = ["comfort_temp", "comfort"]
            .iter()
            .find_map(|k| attributes.get(k).and_then(value_as_f64));
        let eco = ["eco_temp", "eco"]
            .iter()
            .find_map(|k| attributes.get(k).and_then(value_as_f64));
        let preset_mode = attributes
            .get("preset_mode")
            .and_then(|v| v.as_str())
            .map(String::from);

        Self {
            setpoint,
            events,
            comfort,
            eco,
            preset_mode,
        }
    }
}

/// Interpret a JSON value as a temperature: either a number or a numeric
/// string ("19.5").
pub(crate) fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
