use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One completed actuator-heating period, used as a learning sample.
///
/// Sessions are created by the per-zone session tracker when heating stops
/// and the period passes the minimum-duration and minimum-delta filters.
/// All fields are stored as produced by the tracker: delta to 2 decimals,
/// duration to 1, speed to 5, outdoor average to 1.
///
/// Every field defaults on deserialization so that state files written by
/// older versions (or hand-edited ones) load without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatingSession {
    /// Local timestamp the session ended, formatted `%Y-%m-%d %H:%M`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub temp_start: f64,
    #[serde(default)]
    pub temp_end: f64,
    /// Average outdoor temperature over the session.
    #[serde(default)]
    pub temp_ext_avg: f64,
    /// `temp_end - temp_start`.
    #[serde(default)]
    pub delta_temp: f64,
    #[serde(default)]
    pub duration_min: f64,
    /// Derived heating speed in degC per minute.
    #[serde(default)]
    pub speed_degc_per_min: f64,
    /// Whether the session ran while anticipation was active.
    #[serde(default)]
    pub anticipated: bool,
}

/// Aggregate statistics recomputed on every history mutation.
///
/// Exposed for advisor context and diagnostics; the estimator itself uses
/// the raw per-session speeds, falling back to `avg_speed` when no outdoor
/// bucket matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InertiaSummary {
    /// Mean speed over valid sessions, degC/min (5 decimals).
    pub avg_speed: f64,
    pub median_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Number of sessions passing the validity filter.
    pub num_sessions: usize,
    /// Minutes to gain one degree at the mean speed (1 decimal).
    pub min_per_deg: Option<f64>,
    /// Mean speed per 5 degC outdoor-temperature bucket, keyed by the
    /// bucket midpoint (e.g. "-5", "0", "5").
    pub by_ext_temp: BTreeMap<String, f64>,
}
