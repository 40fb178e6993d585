//! Prompt construction shared by the model-backed advisors.

use super::{AdvisorContext, CurrentConditions, ThermalReport, WeatherReport};

/// Build the adjustment prompt: zone learning data, recent sessions, the
/// weather forecast and strict JSON-only output instructions with the
/// accepted adjustment bounds.
pub fn build_adjustment_prompt(
    zone_name: &str,
    thermal: &ThermalReport,
    weather: &WeatherReport,
    current: &CurrentConditions,
    context: AdvisorContext,
) -> String {
    let mut sessions_text = String::new();
    for s in thermal.recent_sessions.iter().rev().take(10).rev() {
        sessions_text.push_str(&format!(
            "  {} : {:.1}->{:.1}C ({:+.1}C in {:.0} min) outdoor {:.1}C\n",
            s.date, s.temp_start, s.temp_end, s.delta_temp, s.duration_min, s.temp_ext_avg,
        ));
    }

    let mut weather_text = String::new();
    for f in weather.forecast.iter().take(6) {
        let when = f["datetime"].as_str().unwrap_or("?");
        let when = &when[..when.len().min(16)];
        let condition = f["condition"].as_str().unwrap_or("?");
        let low = f["templow"].as_f64().map(|v| format!("{v}")).unwrap_or_else(|| "?".into());
        let high = f["temperature"].as_f64().map(|v| format!("{v}")).unwrap_or_else(|| "?".into());
        weather_text.push_str(&format!("  {when} : {condition}, {low}-{high}C\n"));
    }

    let context_text = match context {
        AdvisorContext::Morning => {
            "CONTEXT: morning analysis.\n\
             Plan for the full day ahead. Be conservative, conditions can still\n\
             change. If the forecast resembles past sessions, suggest little or\n\
             no adjustment. For unusually cold weather, raise the margin (+5 to +15%)."
        }
        AdvisorContext::Evening => {
            "CONTEXT: evening correction.\n\
             Fine-tune for TONIGHT only. Current weather is known with certainty;\n\
             adjust the margin accordingly."
        }
    };

    let (avg_speed, min_per_deg, num_sessions) = match &thermal.summary {
        Some(s) => (
            format!("{}", s.avg_speed),
            s.min_per_deg.map(|v| format!("{v}")).unwrap_or_else(|| "N/A".into()),
            s.num_sessions,
        ),
        None => ("N/A".to_string(), "N/A".to_string(), 0),
    };

    let fmt_opt = |v: Option<f64>| v.map(|x| format!("{x}")).unwrap_or_else(|| "?".into());

    format!(
        r#"You are an expert in smart heating and thermal inertia.

{context_text}

ZONE '{zone_name}' DATA:
- Average heat-up speed: {avg_speed} C/min
- Minutes per degree: {min_per_deg} min
- Sessions collected: {num_sessions}
- Indoor temperature: {indoor}C
- Outdoor temperature: {outdoor}C
- Current setpoint: {setpoint}C
- Base safety margin: {margin}%

RECENT SESSIONS:
{sessions}
WEATHER FORECAST:
{weather}
Respond ONLY with a JSON object (no markdown, no text before or after):
{{
    "margin_adjustment": <float between -0.15 and +0.20>,
    "confidence": <float 0.0-1.0>,
    "reasoning": "<short explanation, max 100 characters>"
}}

Examples:
- Cold night ahead (-5C): {{"margin_adjustment": 0.10, "confidence": 0.8, "reasoning": "Severe cold expected, margin raised"}}
- Normal conditions: {{"margin_adjustment": 0.0, "confidence": 0.9, "reasoning": "Stable conditions, no adjustment"}}
- Unusually mild: {{"margin_adjustment": -0.05, "confidence": 0.7, "reasoning": "Mild weather expected, margin reduced"}}
"#,
        context_text = context_text,
        zone_name = zone_name,
        avg_speed = avg_speed,
        min_per_deg = min_per_deg,
        num_sessions = num_sessions,
        indoor = fmt_opt(current.temp_indoor),
        outdoor = fmt_opt(current.temp_outdoor),
        setpoint = fmt_opt(current.setpoint),
        margin = current.margin_pct,
        sessions = if sessions_text.is_empty() {
            "  none yet\n".to_string()
        } else {
            sessions_text
        },
        weather = if weather_text.is_empty() {
            "  not available\n".to_string()
        } else {
            weather_text
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermal::{HeatingSession, InertiaSummary};

    #[test]
    fn test_prompt_contains_zone_data_and_bounds() {
        let thermal = ThermalReport {
            summary: Some(InertiaSummary {
                avg_speed: 0.05,
                median_speed: 0.05,
                min_speed: 0.04,
                max_speed: 0.06,
                num_sessions: 7,
                min_per_deg: Some(20.0),
                by_ext_temp: Default::default(),
            }),
            recent_sessions: vec![HeatingSession {
                date: "2026-01-10 07:30".to_string(),
                temp_start: 17.0,
                temp_end: 19.0,
                temp_ext_avg: 4.0,
                delta_temp: 2.0,
                duration_min: 40.0,
                speed_degc_per_min: 0.05,
                anticipated: false,
            }],
        };
        let current = CurrentConditions {
            temp_indoor: Some(18.2),
            temp_outdoor: Some(3.0),
            setpoint: Some(19.5),
            margin_pct: 115,
        };

        let prompt = build_adjustment_prompt(
            "living",
            &thermal,
            &WeatherReport::default(),
            &current,
            AdvisorContext::Morning,
        );

        assert!(prompt.contains("ZONE 'living' DATA"));
        assert!(prompt.contains("0.05 C/min"));
        assert!(prompt.contains("Sessions collected: 7"));
        assert!(prompt.contains("-0.15 and +0.20"));
        assert!(prompt.contains("morning analysis"));
        assert!(prompt.contains("17.0->19.0C"));
        assert!(prompt.contains("not available"));
    }

    #[test]
    fn test_prompt_evening_context_and_forecast() {
        let weather = WeatherReport {
            current: Some("cloudy".to_string()),
            temperature: Some(2.0),
            forecast: vec![serde_json::json!({
                "datetime": "2026-01-05T18:00:00+00:00",
                "condition": "snowy",
                "templow": -2.0,
                "temperature": 1.0,
            })],
        };
        let prompt = build_adjustment_prompt(
            "living",
            &ThermalReport::default(),
            &weather,
            &CurrentConditions::default(),
            AdvisorContext::Evening,
        );
        assert!(prompt.contains("evening correction"));
        assert!(prompt.contains("snowy"));
        assert!(prompt.contains("none yet"));
    }
}
