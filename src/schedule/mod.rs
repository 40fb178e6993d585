pub mod types;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::error::HeatwiseError;

use self::types::value_as_f64;
pub use self::types::{NextTransition, ScheduleSnapshot, TransitionSource, HEATING_DELTA};

/// Value changes smaller than this are ignored when enumerating the day's
/// transitions for observability.
const DISPLAY_DELTA: f64 = 0.1;

/// A schedule event expanded onto a concrete date.
#[derive(Debug, Clone)]
struct ExpandedEvent {
    start: NaiveDateTime,
    end: NaiveDateTime,
    /// Absent when the event carries a non-numeric value; such events still
    /// cover their time window but never qualify as transitions.
    value: Option<f64>,
}

/// Find the next transition that requires heating up.
///
/// Resolution order, first success wins:
/// 1. event-list strategy (current event's successors today, then tomorrow)
/// 2. comfort/eco preset strategy (target known, time unknown)
/// 3. fallback reporting the current setpoint with no transition
///
/// Returns `None` only when the snapshot has no numeric setpoint.
pub fn next_heating_transition(
    snapshot: &ScheduleSnapshot,
    now: NaiveDateTime,
) -> Option<NextTransition> {
    let setpoint = snapshot.setpoint?;

    if let Some(transition) = resolve_from_events(snapshot, setpoint, now) {
        return Some(transition);
    }

    if let Some(transition) = resolve_from_presets(snapshot, setpoint) {
        return Some(transition);
    }

    Some(NextTransition {
        target_time: None,
        target_temp: setpoint,
        current_temp_schedule: setpoint,
        source: TransitionSource::CurrentOnly,
    })
}

/// Event-list strategy: locate the event covering `now`, then the first
/// later same-day event whose value exceeds the current event's by more
/// than the heating delta. Failing that, the first of tomorrow's events
/// exceeding the current setpoint.
fn resolve_from_events(
    snapshot: &ScheduleSnapshot,
    setpoint: f64,
    now: NaiveDateTime,
) -> Option<NextTransition> {
    if snapshot.events.is_empty() {
        return None;
    }

    let today = now.date();
    let mut parsed: Vec<ExpandedEvent> = snapshot
        .events
        .iter()
        .filter_map(|e| expand_event(e, today))
        .collect();
    if parsed.is_empty() {
        return None;
    }
    parsed.sort_by_key(|e| e.start);

    let mut next_event: Option<ExpandedEvent> = None;
    for (i, ev) in parsed.iter().enumerate() {
        if ev.start <= now && now < ev.end {
            if let Some(current_value) = ev.value {
                next_event = parsed[i + 1..]
                    .iter()
                    .find(|c| c.value.is_some_and(|v| v > current_value + HEATING_DELTA))
                    .cloned();
            }
            break;
        }
    }

    if next_event.is_none() {
        // Nothing left today: look at tomorrow's first heating-up event,
        // compared against the current setpoint.
        let tomorrow = today.checked_add_days(Days::new(1))?;
        let mut tomorrow_events: Vec<ExpandedEvent> = snapshot
            .events
            .iter()
            .filter_map(|e| expand_event(e, tomorrow))
            .collect();
        tomorrow_events.sort_by_key(|e| e.start);
        next_event = tomorrow_events
            .into_iter()
            .find(|ev| ev.value.is_some_and(|v| v > setpoint + HEATING_DELTA));
    }

    let next_event = next_event?;
    Some(NextTransition {
        target_time: Some(next_event.start),
        target_temp: next_event.value?,
        current_temp_schedule: setpoint,
        source: TransitionSource::EventSchedule,
    })
}

/// Two-level preset strategy: when the setpoint sits at or near eco and
/// comfort is meaningfully higher, the next transition is to comfort at an
/// unknown time.
fn resolve_from_presets(snapshot: &ScheduleSnapshot, setpoint: f64) -> Option<NextTransition> {
    let comfort = snapshot.comfort?;
    let eco = snapshot.eco?;

    if setpoint <= eco + HEATING_DELTA && comfort > eco + HEATING_DELTA {
        return Some(NextTransition {
            target_time: None,
            target_temp: comfort,
            current_temp_schedule: setpoint,
            source: TransitionSource::PresetPair,
        });
    }
    None
}

/// All of today's transitions (any value change above 0.1 degC between
/// chronologically consecutive events). Observability only.
pub fn transitions_today(snapshot: &ScheduleSnapshot, now: NaiveDateTime) -> Vec<NextTransition> {
    let today = now.date();
    let mut parsed: Vec<ExpandedEvent> = snapshot
        .events
        .iter()
        .filter_map(|e| expand_event(e, today))
        .collect();
    parsed.sort_by_key(|e| e.start);

    let mut transitions = Vec::new();
    let mut prev_value: Option<f64> = None;
    for ev in &parsed {
        let Some(value) = ev.value else { continue };
        if let Some(prev) = prev_value {
            if (value - prev).abs() > DISPLAY_DELTA {
                transitions.push(NextTransition {
                    target_time: Some(ev.start),
                    target_temp: value,
                    current_temp_schedule: prev,
                    source: TransitionSource::EventSchedule,
                });
            }
        }
        prev_value = Some(value);
    }
    transitions
}

/// Expand a raw event onto `date`, honoring its optional day-of-week
/// restriction. Returns `None` for events that do not apply to this day or
/// that cannot be parsed (the malformed entry is skipped, resolution
/// continues with the rest).
fn expand_event(event: &serde_json::Value, date: NaiveDate) -> Option<ExpandedEvent> {
    let weekday = date.format("%A").to_string().to_lowercase();
    if let Some(days) = event.get("days").and_then(|d| d.as_array()) {
        let applies = days
            .iter()
            .filter_map(|d| d.as_str())
            .any(|d| d.to_lowercase() == weekday);
        if !applies {
            return None;
        }
    }

    let start_str = event_field(event, &["start", "from", "time_start"])?.as_str()?;
    let end_str = event_field(event, &["end", "to", "time_end"]).and_then(|v| v.as_str());
    let value_field = event_field(event, &["state", "value", "temperature"])?;

    let start_time = match parse_time_of_day(start_str) {
        Ok(t) => t,
        Err(e) => {
            debug!("skipping schedule event {}: {}", event, e);
            return None;
        }
    };
    let start = date.and_time(start_time);

    let end = match end_str {
        Some(s) => {
            let end_time = match parse_time_of_day(s) {
                Ok(t) => t,
                Err(e) => {
                    debug!("skipping schedule event {}: {}", event, e);
                    return None;
                }
            };
            let mut end = date.and_time(end_time);
            // An end at or before the start means the event spans midnight.
            if end <= start {
                end += chrono::Duration::days(1);
            }
            end
        }
        None => start + chrono::Duration::hours(23) + chrono::Duration::minutes(59),
    };

    Some(ExpandedEvent {
        start,
        end,
        value: value_as_f64(value_field),
    })
}

/// First present field among the accepted aliases.
fn event_field<'a>(event: &'a serde_json::Value, names: &[&str]) -> Option<&'a serde_json::Value> {
    names
        .iter()
        .find_map(|k| event.get(k))
        .filter(|v| !v.is_null())
}

/// Parse a wall-clock time in `HH:MM:SS`, `HH:MM` or 12-hour `HH:MM AM/PM`
/// form.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, HeatwiseError> {
    let trimmed = input.trim();
    for format in ["%H:%M:%S", "%H:%M", "%I:%M %p"] {
        if let Ok(t) = NaiveTime::parse_from_str(trimmed, format) {
            return Ok(t);
        }
    }
    Err(HeatwiseError::ScheduleParse(format!(
        "cannot parse time: {trimmed}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    fn snapshot_with_events(setpoint: f64, events: serde_json::Value) -> ScheduleSnapshot {
        ScheduleSnapshot::from_parts(&setpoint.to_string(), &json!({ "events": events }))
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(
            parse_time_of_day("07:30").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("17:00:30").unwrap(),
            NaiveTime::from_hms_opt(17, 0, 30).unwrap()
        );
        assert_eq!(
            parse_time_of_day("05:30 PM").unwrap(),
            NaiveTime::from_hms_opt(17, 30, 0).unwrap()
        );
        assert!(parse_time_of_day("not a time").is_err());
    }

    #[test]
    fn test_next_transition_same_day() {
        // 2026-01-05 is a Monday.
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "start": "08:00", "end": "17:00", "state": "16" },
                { "start": "17:00", "end": "21:00", "state": "19.5" },
            ]),
        );
        let t = next_heating_transition(&snapshot, at("2026-01-05", "16:50")).unwrap();
        assert_eq!(t.source, TransitionSource::EventSchedule);
        assert_eq!(t.target_temp, 19.5);
        assert_eq!(t.current_temp_schedule, 16.0);
        assert_eq!(t.target_time, Some(at("2026-01-05", "17:00")));
        assert!(t.is_heating_up());
        assert_eq!(t.minutes_until(at("2026-01-05", "16:50")), Some(10.0));
    }

    #[test]
    fn test_small_increase_is_not_a_heating_transition() {
        let snapshot = snapshot_with_events(
            19.0,
            json!([
                { "start": "08:00", "end": "17:00", "state": "19" },
                { "start": "17:00", "end": "21:00", "state": "19.2" },
            ]),
        );
        // 0.2 degC above the current event: below the threshold, so the
        // resolver falls through to the current-only report.
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.source, TransitionSource::CurrentOnly);
        assert!(!t.is_heating_up());
    }

    #[test]
    fn test_tomorrow_fallback() {
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "start": "07:00", "end": "22:00", "state": "16" },
                { "start": "06:30", "end": "08:30", "state": "20", "days": ["tuesday"] },
            ]),
        );
        // Monday evening: nothing left today, Tuesday's 06:30 event wins.
        let t = next_heating_transition(&snapshot, at("2026-01-05", "21:00")).unwrap();
        assert_eq!(t.target_temp, 20.0);
        assert_eq!(t.target_time, Some(at("2026-01-06", "06:30")));
    }

    #[test]
    fn test_day_restriction_excludes_event() {
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "start": "08:00", "end": "17:00", "state": "16" },
                { "start": "17:00", "end": "21:00", "state": "20", "days": ["saturday", "sunday"] },
            ]),
        );
        // Monday: the weekend boost does not apply today or tomorrow.
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.source, TransitionSource::CurrentOnly);
    }

    #[test]
    fn test_overnight_event_covers_past_midnight() {
        let snapshot = snapshot_with_events(
            17.0,
            json!([
                { "start": "22:00", "end": "06:00", "state": "17" },
                { "start": "06:00", "end": "22:00", "state": "20" },
            ]),
        );
        // 23:30 falls inside the 22:00-06:00 overnight event; the 06:00
        // event sorted after it is the next heating transition.
        let t = next_heating_transition(&snapshot, at("2026-01-05", "23:30")).unwrap();
        assert_eq!(t.target_temp, 20.0);
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "start": "nonsense", "state": "21" },
                { "start": "08:00", "end": "17:00", "state": "16" },
                { "start": "17:00", "end": "21:00", "state": "19.5" },
            ]),
        );
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.target_temp, 19.5);
    }

    #[test]
    fn test_event_field_aliases() {
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "from": "08:00", "to": "17:00", "value": 16 },
                { "time_start": "17:00", "time_end": "21:00", "temperature": 19.5 },
            ]),
        );
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.target_temp, 19.5);
        assert_eq!(t.target_time, Some(at("2026-01-05", "17:00")));
    }

    #[test]
    fn test_preset_strategy_when_no_events() {
        let snapshot = ScheduleSnapshot::from_parts(
            "16.5",
            &json!({ "comfort_temp": 20.0, "eco_temp": 16.5, "preset_mode": "eco" }),
        );
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.source, TransitionSource::PresetPair);
        assert_eq!(t.target_temp, 20.0);
        assert_eq!(t.target_time, None);
        assert!(t.is_heating_up());
    }

    #[test]
    fn test_preset_strategy_not_in_eco() {
        // Setpoint already at comfort: no transition to report.
        let snapshot = ScheduleSnapshot::from_parts(
            "20",
            &json!({ "comfort": 20.0, "eco": 16.5 }),
        );
        let t = next_heating_transition(&snapshot, at("2026-01-05", "12:00")).unwrap();
        assert_eq!(t.source, TransitionSource::CurrentOnly);
    }

    #[test]
    fn test_unavailable_setpoint_resolves_to_none() {
        let snapshot = ScheduleSnapshot::from_parts("unavailable", &json!({}));
        assert!(next_heating_transition(&snapshot, at("2026-01-05", "12:00")).is_none());
    }

    #[test]
    fn test_transitions_today_enumerates_changes() {
        let snapshot = snapshot_with_events(
            16.0,
            json!([
                { "start": "06:00", "end": "08:00", "state": "19" },
                { "start": "08:00", "end": "17:00", "state": "16" },
                { "start": "17:00", "end": "21:00", "state": "19.5" },
                { "start": "21:00", "end": "23:00", "state": "19.45" },
            ]),
        );
        let transitions = transitions_today(&snapshot, at("2026-01-05", "12:00"));
        // 19 -> 16, 16 -> 19.5; the final 0.05 step is below the threshold.
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].target_temp, 16.0);
        assert_eq!(transitions[0].current_temp_schedule, 19.0);
        assert_eq!(transitions[1].target_temp, 19.5);
    }
}
