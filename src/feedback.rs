//! Arrival-accuracy feedback.
//!
//! Each completed anticipation cycle records whether the zone reached its
//! target on time and by how many minutes it was early or late. The recent
//! window drives a margin correction that converges on arriving 2-5 minutes
//! early: late arrivals cause discomfort, very early ones waste energy.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::thermal::round_to;

/// Margin adjustment unit: 2% per feedback step.
pub const MARGIN_ADJUST_STEP: f64 = 0.02;
/// Results kept in history; the oldest is dropped first.
pub const MAX_HISTORY: usize = 30;
/// Results considered by the suggestion policy.
const RECENT_WINDOW: usize = 10;
/// Minimum recent results before a suggestion is made.
const MIN_RESULTS: usize = 3;
/// Below this success rate the margin is always pushed up.
const SUCCESS_RATE_FLOOR: f64 = 0.7;

/// Outcome of one completed anticipation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnticipationResult {
    /// Local timestamp the result was recorded, `%Y-%m-%d %H:%M`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub target_temp: f64,
    #[serde(default)]
    pub actual_temp_at_target_time: f64,
    #[serde(default)]
    pub temp_at_start: f64,
    /// Scheduled target time, ISO formatted.
    #[serde(default)]
    pub target_time: String,
    /// When the target was actually reached; absent on failure.
    #[serde(default)]
    pub actual_arrival_time: Option<String>,
    /// Positive = early, negative = late.
    #[serde(default)]
    pub minutes_early: f64,
    /// Effective safety margin in use for this cycle.
    #[serde(default)]
    pub margin_used: f64,
    /// Advisor adjustment active at the time.
    #[serde(default)]
    pub advisor_adjustment: f64,
    #[serde(default)]
    pub ext_temp_avg: f64,
    /// Whether the target temperature was reached.
    #[serde(default)]
    pub success: bool,
}

/// An anticipation cycle currently being tracked; at most one per zone.
#[derive(Debug, Clone)]
struct PendingCycle {
    target_temp: f64,
    target_time: NaiveDateTime,
    temp_at_start: f64,
    margin_used: f64,
    advisor_adjustment: f64,
    ext_temp: f64,
}

/// Feedback statistics for observability. Only `suggested_adjustment` feeds
/// back into the control loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackStats {
    pub total_cycles: usize,
    pub recent_cycles: usize,
    /// Success percentage over the recent window.
    pub success_rate: Option<f64>,
    pub avg_minutes_early: Option<f64>,
    pub last_result: Option<AnticipationResult>,
    pub suggested_adjustment: Option<f64>,
}

/// Tracks anticipation results and proposes margin corrections.
pub struct FeedbackLoop {
    zone_name: String,
    history: Vec<AnticipationResult>,
    pending: Option<PendingCycle>,
}

impl FeedbackLoop {
    pub fn new(zone_name: &str) -> Self {
        Self {
            zone_name: zone_name.to_string(),
            history: Vec::new(),
            pending: None,
        }
    }

    /// Seed the history from persisted results.
    pub fn load_history(&mut self, mut history: Vec<AnticipationResult>) {
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
        self.history = history;
    }

    pub fn history(&self) -> &[AnticipationResult] {
        &self.history
    }

    /// Begin tracking an anticipation cycle. A new call overwrites any
    /// stale pending observation.
    #[allow(clippy::too_many_arguments)]
    pub fn start_tracking(
        &mut self,
        target_temp: f64,
        target_time: NaiveDateTime,
        temp_at_start: f64,
        margin_used: f64,
        advisor_adjustment: f64,
        ext_temp: f64,
    ) {
        self.pending = Some(PendingCycle {
            target_temp,
            target_time,
            temp_at_start,
            margin_used,
            advisor_adjustment,
            ext_temp,
        });
        debug!(
            "[{}] feedback tracking started for {:.1}C at {}",
            self.zone_name,
            target_temp,
            target_time.format("%H:%M"),
        );
    }

    /// Close the pending observation when anticipation ends and append the
    /// result. Returns `None` when nothing was being tracked.
    pub fn record_result(
        &mut self,
        current_temp: f64,
        reached_target: bool,
        now: NaiveDateTime,
    ) -> Option<AnticipationResult> {
        let pending = self.pending.take()?;

        // Positive when the target time is still ahead (early), negative
        // once it has passed (late).
        let minutes_early = round_to(
            (pending.target_time - now).num_milliseconds() as f64 / 60_000.0,
            1,
        );
        let actual_arrival_time =
            reached_target.then(|| now.format("%Y-%m-%dT%H:%M:%S").to_string());

        let result = AnticipationResult {
            date: now.format("%Y-%m-%d %H:%M").to_string(),
            target_temp: pending.target_temp,
            actual_temp_at_target_time: current_temp,
            temp_at_start: pending.temp_at_start,
            target_time: pending.target_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            actual_arrival_time,
            minutes_early,
            margin_used: pending.margin_used,
            advisor_adjustment: pending.advisor_adjustment,
            ext_temp_avg: pending.ext_temp,
            success: reached_target,
        };

        self.history.push(result.clone());
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }

        if reached_target {
            info!(
                "[{}] feedback: success | {:.1}C -> {:.1}C ({:.1} min {}) | margin {:.0}%",
                self.zone_name,
                current_temp,
                pending.target_temp,
                minutes_early.abs(),
                if minutes_early > 0.0 { "early" } else { "late" },
                pending.margin_used * 100.0,
            );
        } else {
            warn!(
                "[{}] feedback: target missed | {:.1}C -> {:.1}C ({:.1} min late) | margin {:.0}%",
                self.zone_name,
                current_temp,
                pending.target_temp,
                minutes_early.abs(),
                pending.margin_used * 100.0,
            );
        }

        Some(result)
    }

    /// Margin delta suggested by recent arrival accuracy, or `None` with
    /// fewer than three recent results.
    ///
    /// Sweet spot is 2-5 minutes early. Consistently earlier arrivals
    /// reduce the margin, late arrivals or a low success rate raise it.
    pub fn margin_suggestion(&self) -> Option<f64> {
        let recent = self.recent();
        if recent.len() < MIN_RESULTS {
            return None;
        }

        let avg_early =
            recent.iter().map(|r| r.minutes_early).sum::<f64>() / recent.len() as f64;
        let success_rate =
            recent.iter().filter(|r| r.success).count() as f64 / recent.len() as f64;

        let mut adjustment = if avg_early > 10.0 {
            info!(
                "[{}] feedback: arriving far too early ({:.0} min avg), reducing margin",
                self.zone_name, avg_early,
            );
            -MARGIN_ADJUST_STEP * 2.0
        } else if avg_early > 5.0 {
            -MARGIN_ADJUST_STEP
        } else if avg_early < 0.0 {
            warn!(
                "[{}] feedback: arriving late ({:.0} min avg), raising margin",
                self.zone_name, avg_early,
            );
            MARGIN_ADJUST_STEP * 2.0
        } else if avg_early < 2.0 {
            MARGIN_ADJUST_STEP
        } else {
            0.0
        };

        if success_rate < SUCCESS_RATE_FLOOR {
            adjustment = adjustment.max(MARGIN_ADJUST_STEP * 2.0);
            warn!(
                "[{}] feedback: low success rate ({:.0}%), raising margin",
                self.zone_name,
                success_rate * 100.0,
            );
        }

        Some(round_to(adjustment, 3))
    }

    pub fn stats(&self) -> FeedbackStats {
        if self.history.is_empty() {
            return FeedbackStats {
                total_cycles: 0,
                ..FeedbackStats::default()
            };
        }

        let recent = self.recent();
        let successes = recent.iter().filter(|r| r.success).count();
        let avg_early =
            recent.iter().map(|r| r.minutes_early).sum::<f64>() / recent.len() as f64;

        FeedbackStats {
            total_cycles: self.history.len(),
            recent_cycles: recent.len(),
            success_rate: Some(round_to(successes as f64 / recent.len() as f64 * 100.0, 0)),
            avg_minutes_early: Some(round_to(avg_early, 1)),
            last_result: recent.last().cloned(),
            suggested_adjustment: self.margin_suggestion(),
        }
    }

    fn recent(&self) -> &[AnticipationResult] {
        let start = self.history.len().saturating_sub(RECENT_WINDOW);
        &self.history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("2026-01-05 {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    fn result(minutes_early: f64, success: bool) -> AnticipationResult {
        AnticipationResult {
            date: "2026-01-05 17:00".to_string(),
            target_temp: 19.5,
            actual_temp_at_target_time: 19.4,
            temp_at_start: 18.0,
            target_time: "2026-01-05T17:00:00".to_string(),
            actual_arrival_time: success.then(|| "2026-01-05T16:57:00".to_string()),
            minutes_early,
            margin_used: 1.15,
            advisor_adjustment: 0.0,
            ext_temp_avg: 5.0,
            success,
        }
    }

    fn loop_with(results: Vec<AnticipationResult>) -> FeedbackLoop {
        let mut fb = FeedbackLoop::new("living");
        fb.load_history(results);
        fb
    }

    #[test]
    fn test_no_suggestion_below_three_results() {
        let fb = loop_with(vec![result(3.0, true), result(4.0, true)]);
        assert_eq!(fb.margin_suggestion(), None);
    }

    #[test]
    fn test_suggestion_zero_in_sweet_spot() {
        let fb = loop_with(vec![result(2.0, true), result(4.0, true), result(5.0, true)]);
        assert_eq!(fb.margin_suggestion(), Some(0.0));
    }

    #[test]
    fn test_suggestion_reduces_when_far_too_early() {
        let fb = loop_with(vec![
            result(12.0, true),
            result(15.0, true),
            result(11.0, true),
        ]);
        assert_eq!(fb.margin_suggestion(), Some(-MARGIN_ADJUST_STEP * 2.0));
    }

    #[test]
    fn test_suggestion_reduces_one_step_when_slightly_early() {
        let fb = loop_with(vec![result(6.0, true), result(7.0, true), result(8.0, true)]);
        assert_eq!(fb.margin_suggestion(), Some(-MARGIN_ADJUST_STEP));
    }

    #[test]
    fn test_suggestion_raises_when_late() {
        let fb = loop_with(vec![
            result(-2.0, true),
            result(-5.0, true),
            result(1.0, true),
        ]);
        assert_eq!(fb.margin_suggestion(), Some(MARGIN_ADJUST_STEP * 2.0));
    }

    #[test]
    fn test_suggestion_raises_one_step_when_cutting_close() {
        let fb = loop_with(vec![result(0.5, true), result(1.0, true), result(1.5, true)]);
        assert_eq!(fb.margin_suggestion(), Some(MARGIN_ADJUST_STEP));
    }

    #[test]
    fn test_low_success_rate_forces_raise() {
        // Mean lead in the sweet spot, but only 1 of 3 succeeded.
        let fb = loop_with(vec![
            result(3.0, true),
            result(3.0, false),
            result(3.0, false),
        ]);
        assert_eq!(fb.margin_suggestion(), Some(MARGIN_ADJUST_STEP * 2.0));
    }

    #[test]
    fn test_suggestion_stays_within_two_steps() {
        for results in [
            vec![result(-30.0, false); 10],
            vec![result(60.0, true); 10],
            vec![result(0.0, true); 10],
        ] {
            let fb = loop_with(results);
            let suggestion = fb.margin_suggestion().unwrap();
            assert!(suggestion >= -MARGIN_ADJUST_STEP * 2.0);
            assert!(suggestion <= MARGIN_ADJUST_STEP * 2.0);
        }
    }

    #[test]
    fn test_history_capped_with_oldest_dropped() {
        let mut fb = FeedbackLoop::new("living");
        let mut seed = Vec::new();
        for i in 0..MAX_HISTORY {
            let mut r = result(3.0, true);
            r.date = format!("r{}", i);
            seed.push(r);
        }
        fb.load_history(seed);
        assert_eq!(fb.history().len(), MAX_HISTORY);

        fb.start_tracking(19.5, at("17:00"), 18.0, 1.15, 0.0, 5.0);
        fb.record_result(19.5, true, at("16:57")).unwrap();
        assert_eq!(fb.history().len(), MAX_HISTORY);
        // r0 was evicted; r1 is now the oldest entry.
        assert_eq!(fb.history()[0].date, "r1");
    }

    #[test]
    fn test_record_result_early_and_late() {
        let mut fb = FeedbackLoop::new("living");
        fb.start_tracking(19.5, at("17:00"), 18.0, 1.15, 0.02, 5.0);
        let r = fb.record_result(19.5, true, at("16:57")).unwrap();
        assert_eq!(r.minutes_early, 3.0);
        assert!(r.success);
        assert!(r.actual_arrival_time.is_some());

        fb.start_tracking(19.5, at("17:00"), 18.0, 1.15, 0.02, 5.0);
        let r = fb.record_result(19.0, false, at("17:08")).unwrap();
        assert_eq!(r.minutes_early, -8.0);
        assert!(!r.success);
        assert!(r.actual_arrival_time.is_none());
    }

    #[test]
    fn test_record_without_pending_returns_none() {
        let mut fb = FeedbackLoop::new("living");
        assert!(fb.record_result(19.5, true, at("17:00")).is_none());
    }

    #[test]
    fn test_stats_shape() {
        let fb = loop_with(vec![result(3.0, true), result(-1.0, false)]);
        let stats = fb.stats();
        assert_eq!(stats.total_cycles, 2);
        assert_eq!(stats.recent_cycles, 2);
        assert_eq!(stats.success_rate, Some(50.0));
        assert_eq!(stats.avg_minutes_early, Some(1.0));
        assert!(stats.last_result.is_some());
        assert_eq!(stats.suggested_adjustment, None);

        let empty = FeedbackLoop::new("living");
        let stats = empty.stats();
        assert_eq!(stats.total_cycles, 0);
        assert_eq!(stats.success_rate, None);
    }

    #[test]
    fn test_result_serde_round_trip() {
        let r = result(3.5, true);
        let json = serde_json::to_string(&r).unwrap();
        let back: AnticipationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
