//! Ollama backend for locally hosted models.

use std::time::Duration;

use serde_json::json;
use tracing::error;

use super::SYSTEM_PROMPT;
use crate::error::HeatwiseError;

const TIMEOUT: Duration = Duration::from_secs(60);

/// Send the adjustment prompt to a local Ollama server and return the raw
/// text reply.
pub(super) async fn request(
    base_url: &str,
    model: &str,
    prompt: &str,
) -> Result<String, HeatwiseError> {
    let client = reqwest::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .map_err(|e| HeatwiseError::Advisor(format!("failed to build HTTP client: {e}")))?;

    let body = json!({
        "model": model,
        "prompt": prompt,
        "system": SYSTEM_PROMPT,
        "stream": false,
        "options": {
            "temperature": 0.3,
            "num_predict": 200,
        },
    });

    let response = client
        .post(format!("{base_url}/api/generate"))
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            let msg = if e.is_timeout() {
                "ollama: timeout after 60s".to_string()
            } else {
                format!("ollama: connection error: {e}")
            };
            error!("{}", msg);
            HeatwiseError::Advisor(msg)
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let truncated = &body[..body.len().min(1024)];
        return Err(HeatwiseError::Advisor(format!(
            "ollama: HTTP {status} - {truncated}"
        )));
    }

    let value: serde_json::Value = response
        .json()
        .await
        .map_err(|e| HeatwiseError::Advisor(format!("ollama: bad response: {e}")))?;

    value["response"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| HeatwiseError::Advisor("ollama: no response field".to_string()))
}
