//! REST client for the home-automation hub.
//!
//! The hub is the external collaborator owning sensors, actuators and
//! schedule entities. The coordinator snapshots everything it needs through
//! this client at the start of a cycle, so the core logic only ever sees
//! plain values and never waits on I/O mid-evaluation.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::HeatwiseError;

/// Sentinel states that mean "no data", not zero and not an error.
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

/// Actuator action label indicating an active heating period.
pub const HVAC_ACTION_HEATING: &str = "heating";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A hub entity's state and attributes as returned by `GET /api/states/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl EntityState {
    /// The state as a number; sentinel and non-numeric states are absent.
    pub fn numeric_state(&self) -> Option<f64> {
        match self.state.as_str() {
            STATE_UNAVAILABLE | STATE_UNKNOWN => None,
            s => s.trim().parse::<f64>().ok(),
        }
    }

    /// First attribute present among the given names.
    pub fn attr(&self, names: &[&str]) -> Option<&serde_json::Value> {
        names
            .iter()
            .find_map(|k| self.attributes.get(k))
            .filter(|v| !v.is_null())
    }

    /// Attribute as a number, accepting numeric strings.
    pub fn attr_f64(&self, names: &[&str]) -> Option<f64> {
        self.attr(names).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }

    pub fn attr_str(&self, names: &[&str]) -> Option<&str> {
        self.attr(names).and_then(|v| v.as_str())
    }
}

/// Bearer-token REST client with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HubClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, HeatwiseError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HeatwiseError::Config(format!("invalid hub URL '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HeatwiseError::Hub(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    /// Fetch one entity's current state and attributes.
    pub async fn entity_state(&self, entity_id: &str) -> Result<EntityState, HeatwiseError> {
        let url = self
            .base_url
            .join(&format!("api/states/{entity_id}"))
            .map_err(|e| HeatwiseError::Hub(format!("bad entity id '{entity_id}': {e}")))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| HeatwiseError::Hub(format!("state read for '{entity_id}': {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HeatwiseError::Hub(format!(
                "state read for '{entity_id}': HTTP {status}"
            )));
        }

        response
            .json::<EntityState>()
            .await
            .map_err(|e| HeatwiseError::Hub(format!("state decode for '{entity_id}': {e}")))
    }

    /// Read an entity's state as a number; absent for sentinel states.
    pub async fn numeric_state(&self, entity_id: &str) -> Result<Option<f64>, HeatwiseError> {
        Ok(self.entity_state(entity_id).await?.numeric_state())
    }

    /// Command the actuator to a target temperature. Idempotent on the hub
    /// side; failures map to `ActuatorCommandError`.
    pub async fn set_target_temperature(
        &self,
        entity_id: &str,
        temperature: f64,
    ) -> Result<(), HeatwiseError> {
        let url = self
            .base_url
            .join("api/services/climate/set_temperature")
            .map_err(|e| HeatwiseError::Hub(format!("bad service URL: {e}")))?;

        let body = json!({
            "entity_id": entity_id,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                HeatwiseError::ActuatorCommand(format!("send to '{entity_id}': {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HeatwiseError::ActuatorCommand(format!(
                "send to '{entity_id}': HTTP {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(state: &str, attributes: serde_json::Value) -> EntityState {
        EntityState {
            entity_id: "climate.living".to_string(),
            state: state.to_string(),
            attributes,
        }
    }

    #[test]
    fn test_numeric_state_parses_numbers() {
        assert_eq!(entity("19.5", json!({})).numeric_state(), Some(19.5));
        assert_eq!(entity(" 16 ", json!({})).numeric_state(), Some(16.0));
    }

    #[test]
    fn test_sentinel_states_are_absent_not_zero() {
        assert_eq!(entity("unavailable", json!({})).numeric_state(), None);
        assert_eq!(entity("unknown", json!({})).numeric_state(), None);
        assert_eq!(entity("heat", json!({})).numeric_state(), None);
    }

    #[test]
    fn test_attr_lookup_with_aliases() {
        let e = entity(
            "heat",
            json!({ "temperature": "19.5", "hvac_action": "heating", "comfort": 20 }),
        );
        assert_eq!(e.attr_f64(&["temperature"]), Some(19.5));
        assert_eq!(e.attr_f64(&["comfort_temp", "comfort"]), Some(20.0));
        assert_eq!(e.attr_str(&["hvac_action"]), Some("heating"));
        assert_eq!(e.attr_f64(&["missing"]), None);
    }

    #[test]
    fn test_null_attributes_are_absent() {
        let e = entity("heat", json!({ "temperature": null }));
        assert_eq!(e.attr(&["temperature"]), None);
        assert_eq!(e.attr_f64(&["temperature"]), None);
    }

    #[test]
    fn test_client_rejects_invalid_base_url() {
        assert!(HubClient::new("not a url", "token").is_err());
        assert!(HubClient::new("http://hub.local:8123/", "token").is_ok());
    }
}
