//! Daemon configuration, loaded from a TOML file.
//!
//! One `[hub]` section plus one `[[zones]]` table per heating zone. Every
//! tuning knob has a default matching the engine's empirically chosen
//! constants, so a minimal zone only names its entities.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::advisor::AdvisorKind;
use crate::error::HeatwiseError;

/// Default base safety margin, percent (multiplier 1.15).
pub const DEFAULT_SAFETY_MARGIN_PCT: u32 = 115;
/// Default anti-short-cycle cooldown.
pub const DEFAULT_MIN_OFF_TIME_SEC: u64 = 1800;
/// Sessions required before the model's estimates are trusted.
pub const DEFAULT_MIN_SESSIONS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub hub: HubConfig,
    /// Directory for persisted zone state; defaults to the platform data
    /// directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    /// Indoor temperature sensor entity.
    pub indoor_sensor: String,
    /// Outdoor temperature sensor entity.
    pub outdoor_sensor: String,
    /// Climate actuator entity (setpoint command target).
    pub climate_entity: String,
    #[serde(default)]
    pub schedule_entity: Option<String>,
    #[serde(default)]
    pub weather_entity: Option<String>,
    /// Base safety margin in percent (115 = multiply estimates by 1.15).
    #[serde(default = "default_safety_margin_pct")]
    pub safety_margin_pct: u32,
    /// Minutes of the actuator's power-ramp phase to discount per session.
    #[serde(default)]
    pub warmup_ignore_min: f64,
    #[serde(default)]
    pub anti_short_cycle: bool,
    #[serde(default = "default_min_off_time_sec")]
    pub min_off_time_sec: u64,
    #[serde(default = "default_min_sessions")]
    pub min_sessions: usize,
    #[serde(default)]
    pub advisor: AdvisorSettings,
}

impl ZoneConfig {
    /// Base safety margin as a multiplier.
    pub fn safety_margin(&self) -> f64 {
        self.safety_margin_pct as f64 / 100.0
    }
}

/// Advisor backend selection and credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvisorSettings {
    #[serde(default)]
    pub provider: AdvisorKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// Base URL for self-hosted backends (Ollama).
    #[serde(default)]
    pub url: String,
}

fn default_safety_margin_pct() -> u32 {
    DEFAULT_SAFETY_MARGIN_PCT
}

fn default_min_off_time_sec() -> u64 {
    DEFAULT_MIN_OFF_TIME_SEC
}

fn default_min_sessions() -> usize {
    DEFAULT_MIN_SESSIONS
}

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<AppConfig, HeatwiseError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HeatwiseError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: AppConfig = toml::from_str(&text)
        .map_err(|e| HeatwiseError::Config(format!("cannot parse {}: {e}", path.display())))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), HeatwiseError> {
    Url::parse(&config.hub.base_url).map_err(|e| {
        HeatwiseError::Config(format!("invalid hub URL '{}': {e}", config.hub.base_url))
    })?;

    for zone in &config.zones {
        if zone.name.is_empty() {
            return Err(HeatwiseError::Config("zone with empty name".to_string()));
        }
        if !zone.advisor.url.is_empty() {
            Url::parse(&zone.advisor.url).map_err(|e| {
                HeatwiseError::Config(format!(
                    "zone '{}': invalid advisor URL '{}': {e}",
                    zone.name, zone.advisor.url
                ))
            })?;
        }
    }

    let mut names: Vec<&str> = config.zones.iter().map(|z| z.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != config.zones.len() {
        return Err(HeatwiseError::Config("duplicate zone names".to_string()));
    }

    Ok(())
}

/// Platform default data directory for persisted zone state.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("heatwise")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[hub]
base_url = "http://hub.local:8123"
token = "secret"

[[zones]]
name = "living"
indoor_sensor = "sensor.living_temperature"
outdoor_sensor = "sensor.outdoor_temperature"
climate_entity = "climate.living"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let zone = &config.zones[0];
        assert_eq!(zone.safety_margin_pct, 115);
        assert_eq!(zone.safety_margin(), 1.15);
        assert_eq!(zone.min_off_time_sec, 1800);
        assert_eq!(zone.min_sessions, 3);
        assert_eq!(zone.warmup_ignore_min, 0.0);
        assert!(!zone.anti_short_cycle);
        assert_eq!(zone.advisor.provider, AdvisorKind::Heuristic);
        assert!(zone.schedule_entity.is_none());
    }

    #[test]
    fn test_full_zone_config() {
        let text = r#"
[hub]
base_url = "http://hub.local:8123"
token = "secret"

[[zones]]
name = "office"
indoor_sensor = "sensor.office_temperature"
outdoor_sensor = "sensor.outdoor_temperature"
climate_entity = "climate.office"
schedule_entity = "sensor.office_schedule"
weather_entity = "weather.home"
safety_margin_pct = 120
warmup_ignore_min = 5.0
anti_short_cycle = true
min_off_time_sec = 900
min_sessions = 5

[zones.advisor]
provider = "anthropic"
api_key = "sk-test"
model = "claude-haiku-4-5-20251001"
"#;
        let config: AppConfig = toml::from_str(text).unwrap();
        let zone = &config.zones[0];
        assert_eq!(zone.safety_margin(), 1.2);
        assert!(zone.anti_short_cycle);
        assert_eq!(zone.advisor.provider, AdvisorKind::Anthropic);
        assert_eq!(zone.advisor.model, "claude-haiku-4-5-20251001");
        validate(&config).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_hub_url() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.hub.base_url = "nope".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_zone_names() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let dup = config.zones[0].clone();
        config.zones.push(dup);
        assert!(validate(&config).is_err());
    }
}
