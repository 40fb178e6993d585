pub mod types;

use std::collections::BTreeMap;

pub use self::types::{HeatingSession, InertiaSummary};

/// Maximum sessions kept in history; the oldest is evicted first.
pub const MAX_SESSIONS: usize = 100;
/// Sessions shorter than this do not contribute to aggregate statistics.
pub const MIN_VALID_DURATION_MIN: f64 = 5.0;
/// Width of the outdoor-temperature buckets used for speed lookup.
const EXT_TEMP_BUCKET: f64 = 5.0;

/// Learns heating speed from session history and answers time-to-target
/// queries conditioned on outdoor temperature.
pub struct ThermalModel {
    sessions: Vec<HeatingSession>,
    summary: Option<InertiaSummary>,
}

impl ThermalModel {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            summary: None,
        }
    }

    /// Replace the history with persisted sessions and recompute statistics.
    pub fn load_sessions(&mut self, sessions: Vec<HeatingSession>) {
        self.sessions = sessions;
        if self.sessions.len() > MAX_SESSIONS {
            let excess = self.sessions.len() - MAX_SESSIONS;
            self.sessions.drain(..excess);
        }
        self.recalculate();
    }

    /// Append a session, evicting the oldest past capacity, and recompute.
    pub fn record(&mut self, session: HeatingSession) {
        self.sessions.push(session);
        if self.sessions.len() > MAX_SESSIONS {
            let excess = self.sessions.len() - MAX_SESSIONS;
            self.sessions.drain(..excess);
        }
        self.recalculate();
    }

    /// Clear all history (operational reset trigger).
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.recalculate();
    }

    pub fn sessions(&self) -> &[HeatingSession] {
        &self.sessions
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Aggregate statistics, absent until at least one valid session exists.
    pub fn summary(&self) -> Option<&InertiaSummary> {
        self.summary.as_ref()
    }

    /// Mean heating speed in degC/min over valid sessions.
    pub fn avg_speed(&self) -> Option<f64> {
        self.summary.as_ref().map(|s| s.avg_speed)
    }

    /// Minutes to gain one degree at the mean speed.
    pub fn min_per_deg(&self) -> Option<f64> {
        self.summary.as_ref().and_then(|s| s.min_per_deg)
    }

    /// Estimate the minutes needed to heat from `current_temp` to
    /// `target_temp` given the outdoor temperature and a safety margin.
    ///
    /// Returns `Some(0.0)` when the target is already met, `None` when there
    /// is not enough data to produce an estimate (insufficient data is not
    /// an error), and `ceil(delta / speed * margin)` otherwise.
    pub fn estimate_minutes(
        &self,
        current_temp: f64,
        target_temp: f64,
        outdoor_temp: f64,
        margin: f64,
    ) -> Option<f64> {
        let delta = target_temp - current_temp;
        if delta <= 0.0 {
            return Some(0.0);
        }

        let speed = self.speed_for_outdoor(outdoor_temp)?;
        if speed <= 0.0 {
            return None;
        }

        Some((delta / speed * margin).ceil())
    }

    /// Representative heating speed for the given outdoor temperature.
    ///
    /// Buckets the outdoor temperature to the nearest multiple of 5 and
    /// takes the median speed of sessions within +-5 degC of that bucket
    /// (median for outlier robustness). Falls back to the global mean speed
    /// when no session is close enough.
    fn speed_for_outdoor(&self, outdoor_temp: f64) -> Option<f64> {
        if self.sessions.is_empty() {
            return None;
        }

        let bucket = (outdoor_temp / EXT_TEMP_BUCKET).round() * EXT_TEMP_BUCKET;
        let mut speeds: Vec<f64> = self
            .sessions
            .iter()
            .filter(|s| (s.temp_ext_avg - bucket).abs() <= EXT_TEMP_BUCKET)
            .map(|s| s.speed_degc_per_min)
            .filter(|&v| v > 0.0)
            .collect();

        if !speeds.is_empty() {
            return Some(median(&mut speeds));
        }

        self.avg_speed()
    }

    /// Recompute aggregate statistics over all valid sessions.
    /// A session counts when its speed is positive and it lasted at least
    /// five minutes.
    fn recalculate(&mut self) {
        let valid: Vec<&HeatingSession> = self
            .sessions
            .iter()
            .filter(|s| s.speed_degc_per_min > 0.0 && s.duration_min >= MIN_VALID_DURATION_MIN)
            .collect();

        if valid.is_empty() {
            self.summary = None;
            return;
        }

        let mut speeds: Vec<f64> = valid.iter().map(|s| s.speed_degc_per_min).collect();
        let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let min = speeds.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = speeds.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let mut by_ext: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for s in &valid {
            let bucket = (s.temp_ext_avg / EXT_TEMP_BUCKET).round() * EXT_TEMP_BUCKET;
            by_ext
                .entry(format!("{}", bucket as i64))
                .or_default()
                .push(s.speed_degc_per_min);
        }
        let by_ext_avg: BTreeMap<String, f64> = by_ext
            .into_iter()
            .map(|(k, v)| {
                let avg = v.iter().sum::<f64>() / v.len() as f64;
                (k, round_to(avg, 5))
            })
            .collect();

        self.summary = Some(InertiaSummary {
            avg_speed: round_to(mean, 5),
            median_speed: round_to(median(&mut speeds), 5),
            min_speed: round_to(min, 5),
            max_speed: round_to(max, 5),
            num_sessions: valid.len(),
            min_per_deg: if mean > 0.0 {
                Some(round_to(1.0 / mean, 1))
            } else {
                None
            },
            by_ext_temp: by_ext_avg,
        });
    }
}

impl Default for ThermalModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of a slice; sorts in place. Average of the two middle values for
/// even lengths.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Round to the given number of decimal places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(speed: f64, ext: f64) -> HeatingSession {
        HeatingSession {
            date: "2026-01-10 07:30".to_string(),
            temp_start: 17.0,
            temp_end: 19.0,
            temp_ext_avg: ext,
            delta_temp: 2.0,
            duration_min: 30.0,
            speed_degc_per_min: speed,
            anticipated: false,
        }
    }

    #[test]
    fn test_record_caps_history_and_drops_oldest() {
        let mut model = ThermalModel::new();
        for i in 0..(MAX_SESSIONS + 5) {
            let mut s = session(0.05, 5.0);
            s.date = format!("session-{}", i);
            model.record(s);
        }
        assert_eq!(model.num_sessions(), MAX_SESSIONS);
        // The five oldest entries are gone; index 0 is now session-5.
        assert_eq!(model.sessions()[0].date, "session-5");
    }

    #[test]
    fn test_estimate_zero_when_target_not_above_current() {
        let mut model = ThermalModel::new();
        model.record(session(0.05, 5.0));
        assert_eq!(model.estimate_minutes(20.0, 20.0, 5.0, 1.15), Some(0.0));
        assert_eq!(model.estimate_minutes(20.0, 18.0, 5.0, 1.15), Some(0.0));
        // Holds for any margin, even on an empty model.
        let empty = ThermalModel::new();
        assert_eq!(empty.estimate_minutes(21.0, 20.0, 5.0, 3.0), Some(0.0));
    }

    #[test]
    fn test_estimate_unknown_without_sessions() {
        let model = ThermalModel::new();
        assert_eq!(model.estimate_minutes(18.0, 20.0, 5.0, 1.15), None);
    }

    #[test]
    fn test_estimate_uses_bucket_median() {
        let mut model = ThermalModel::new();
        model.record(session(0.05, 5.0));
        model.record(session(0.06, 4.0));
        model.record(session(0.055, 6.0));
        // delta=2, median speed 0.055 -> ceil(2 / 0.055 * 1.15) = 42
        assert_eq!(model.estimate_minutes(18.0, 20.0, 5.0, 1.15), Some(42.0));
    }

    #[test]
    fn test_estimate_falls_back_to_global_mean() {
        let mut model = ThermalModel::new();
        model.record(session(0.04, -10.0));
        model.record(session(0.06, -10.0));
        // Query at +15 degC: no session within +-5 of that bucket, so the
        // global mean (0.05) applies. ceil(2 / 0.05 * 1.0) = 40.
        assert_eq!(model.estimate_minutes(18.0, 20.0, 15.0, 1.0), Some(40.0));
    }

    #[test]
    fn test_estimate_monotonic_in_delta_and_margin() {
        let mut model = ThermalModel::new();
        model.record(session(0.05, 5.0));

        let mut last = 0.0;
        for target in [19.0, 19.5, 20.0, 21.0, 23.0] {
            let m = model.estimate_minutes(18.0, target, 5.0, 1.15).unwrap();
            assert!(m >= last, "minutes decreased as delta grew");
            last = m;
        }

        let mut last = 0.0;
        for margin in [1.0, 1.1, 1.2, 1.5] {
            let m = model.estimate_minutes(18.0, 20.0, 5.0, margin).unwrap();
            assert!(m >= last, "minutes decreased as margin grew");
            last = m;
        }
    }

    #[test]
    fn test_short_or_stalled_sessions_excluded_from_summary() {
        let mut model = ThermalModel::new();
        let mut short = session(0.2, 5.0);
        short.duration_min = 3.0;
        model.record(short);
        model.record(session(0.0, 5.0));
        assert!(model.summary().is_none());

        model.record(session(0.05, 5.0));
        let summary = model.summary().unwrap();
        assert_eq!(summary.num_sessions, 1);
        assert_eq!(summary.avg_speed, 0.05);
    }

    #[test]
    fn test_summary_statistics() {
        let mut model = ThermalModel::new();
        model.record(session(0.04, 2.0));
        model.record(session(0.06, 3.0));
        model.record(session(0.05, 11.0));

        let summary = model.summary().unwrap();
        assert_eq!(summary.avg_speed, 0.05);
        assert_eq!(summary.median_speed, 0.05);
        assert_eq!(summary.min_speed, 0.04);
        assert_eq!(summary.max_speed, 0.06);
        assert_eq!(summary.num_sessions, 3);
        assert_eq!(summary.min_per_deg, Some(20.0));
        // 2 and 3 degC bucket to "0" and "5"; 11 degC buckets to "10".
        assert_eq!(summary.by_ext_temp.get("0"), Some(&0.04));
        assert_eq!(summary.by_ext_temp.get("5"), Some(&0.06));
        assert_eq!(summary.by_ext_temp.get("10"), Some(&0.05));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut model = ThermalModel::new();
        model.record(session(0.05, 5.0));
        model.reset();
        assert_eq!(model.num_sessions(), 0);
        assert!(model.summary().is_none());
    }

    #[test]
    fn test_session_serde_round_trip() {
        let s = session(0.04567, 4.5);
        let json = serde_json::to_string(&s).unwrap();
        let back: HeatingSession = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn test_session_decodes_with_missing_and_unknown_fields() {
        let json = r#"{"date": "2026-01-10 07:30", "temp_start": 17.0, "extra_field": 1}"#;
        let s: HeatingSession = serde_json::from_str(json).unwrap();
        assert_eq!(s.temp_start, 17.0);
        assert_eq!(s.temp_end, 0.0);
        assert!(!s.anticipated);
    }
}
