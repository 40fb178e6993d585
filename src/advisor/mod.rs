//! Margin advisors.
//!
//! An advisor proposes a bounded adjustment to the safety margin from
//! context the core cannot see (weather forecasts, unusual conditions).
//! Backends are keyed by a configuration enum; the heuristic backend is the
//! dependency-free default and needs no network access. A failed call never
//! escapes as an error: it comes back as an `AdvisorResponse` with `error`
//! set, and the coordinator keeps the previous adjustment.

mod anthropic;
mod heuristic;
mod ollama;
mod openai;
pub mod prompts;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AdvisorSettings;
use crate::thermal::{HeatingSession, InertiaSummary};

/// Bounds applied to any adjustment coming back from a backend.
pub const MIN_ADJUSTMENT: f64 = -0.15;
pub const MAX_ADJUSTMENT: f64 = 0.20;
/// Reasoning text is truncated to keep responses displayable.
const REASONING_MAX_CHARS: usize = 200;

/// Shared system prompt for the model-backed providers.
const SYSTEM_PROMPT: &str =
    "You are an expert in smart heating control and thermal inertia. Respond with JSON only.";

/// Advisor backend selector, as written in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorKind {
    /// Built-in outdoor-temperature heuristic; no network access.
    #[default]
    #[serde(rename = "none", alias = "heuristic")]
    Heuristic,
    OpenAi,
    Anthropic,
    Ollama,
}

/// Which of the two fixed daily slots triggered the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisorContext {
    Morning,
    Evening,
}

impl AdvisorContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisorContext::Morning => "morning",
            AdvisorContext::Evening => "evening",
        }
    }
}

/// Thermal learning context handed to the advisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThermalReport {
    pub summary: Option<InertiaSummary>,
    pub recent_sessions: Vec<HeatingSession>,
}

/// Weather entity snapshot handed to the advisor verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WeatherReport {
    pub current: Option<String>,
    pub temperature: Option<f64>,
    pub forecast: Vec<serde_json::Value>,
}

/// Current zone conditions at call time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentConditions {
    pub temp_indoor: Option<f64>,
    pub temp_outdoor: Option<f64>,
    pub setpoint: Option<f64>,
    /// Base safety margin as a percentage, for the prompt.
    pub margin_pct: i64,
}

/// A backend's answer. `margin_adjustment` is already clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorResponse {
    pub margin_adjustment: f64,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub raw_response: String,
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl AdvisorResponse {
    fn failure(provider: &str, model: &str, error: String) -> Self {
        Self {
            margin_adjustment: 0.0,
            confidence: 0.5,
            reasoning: String::new(),
            raw_response: String::new(),
            timestamp: chrono::Local::now().to_rfc3339(),
            provider: provider.to_string(),
            model: model.to_string(),
            error: Some(error),
        }
    }
}

/// Margin-adjustment capability, one backend per `AdvisorKind`.
pub struct MarginAdvisor {
    kind: AdvisorKind,
    api_key: String,
    model: String,
    url: String,
}

impl MarginAdvisor {
    /// Factory keyed by the configured backend kind.
    pub fn from_config(settings: &AdvisorSettings) -> Self {
        Self {
            kind: settings.provider,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            url: settings.url.clone(),
        }
    }

    pub fn kind(&self) -> AdvisorKind {
        self.kind
    }

    pub fn provider_name(&self) -> &'static str {
        match self.kind {
            AdvisorKind::Heuristic => "heuristic",
            AdvisorKind::OpenAi => "openai",
            AdvisorKind::Anthropic => "anthropic",
            AdvisorKind::Ollama => "ollama",
        }
    }

    pub fn model_name(&self) -> String {
        if !self.model.is_empty() {
            return self.model.clone();
        }
        match self.kind {
            AdvisorKind::Heuristic => "algorithm".to_string(),
            AdvisorKind::OpenAi => "gpt-4o-mini".to_string(),
            AdvisorKind::Anthropic => "claude-sonnet-4-5-20250514".to_string(),
            AdvisorKind::Ollama => "llama3".to_string(),
        }
    }

    fn base_url(&self) -> String {
        if self.url.is_empty() {
            "http://localhost:11434".to_string()
        } else {
            self.url.trim_end_matches('/').to_string()
        }
    }

    /// Ask the backend for a margin adjustment. Never fails outward;
    /// backend errors are folded into the response's `error` field.
    pub async fn request_adjustment(
        &self,
        zone_name: &str,
        thermal: &ThermalReport,
        weather: &WeatherReport,
        current: &CurrentConditions,
        context: AdvisorContext,
    ) -> AdvisorResponse {
        if self.kind == AdvisorKind::Heuristic {
            return heuristic::adjust(weather, current);
        }

        let prompt = prompts::build_adjustment_prompt(zone_name, thermal, weather, current, context);
        let model = self.model_name();

        let result = match self.kind {
            AdvisorKind::OpenAi => openai::request(&self.api_key, &model, &prompt).await,
            AdvisorKind::Anthropic => anthropic::request(&self.api_key, &model, &prompt).await,
            AdvisorKind::Ollama => ollama::request(&self.base_url(), &model, &prompt).await,
            AdvisorKind::Heuristic => unreachable!("handled above"),
        };

        match result {
            Ok(raw) => {
                debug!("advisor response for {}: {}", zone_name, raw);
                parse_response(&raw, self.provider_name(), &model)
            }
            Err(e) => AdvisorResponse::failure(self.provider_name(), &model, e.to_string()),
        }
    }
}

/// Parse a backend's raw text into a response: strip markdown fences,
/// decode the JSON object, clamp the numbers, cap the reasoning length.
/// A malformed payload yields a response with `error` set.
pub(crate) fn parse_response(raw: &str, provider: &str, model: &str) -> AdvisorResponse {
    let cleaned = strip_markdown_fences(raw);

    match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(value) => AdvisorResponse {
            margin_adjustment: value["margin_adjustment"]
                .as_f64()
                .unwrap_or(0.0)
                .clamp(MIN_ADJUSTMENT, MAX_ADJUSTMENT),
            confidence: value["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
            reasoning: value["reasoning"]
                .as_str()
                .unwrap_or("")
                .chars()
                .take(REASONING_MAX_CHARS)
                .collect(),
            raw_response: raw.to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            provider: provider.to_string(),
            model: model.to_string(),
            error: None,
        },
        Err(e) => {
            let mut response =
                AdvisorResponse::failure(provider, model, format!("parse error: {e}"));
            response.raw_response = raw.to_string();
            response
        }
    }
}

/// Strip markdown code fences some models wrap JSON in.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    // Drop the opening fence line (with optional language tag).
    let after_open = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    };
    let cleaned = after_open.trim_end();
    if let Some(stripped) = cleaned.strip_suffix("```") {
        stripped.trim().to_string()
    } else {
        cleaned.to_string()
    }
}
