//! Anthropic messages backend.

use std::time::Duration;

use serde_json::json;
use tracing::error;

use super::SYSTEM_PROMPT;
use crate::error::HeatwiseError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const TIMEOUT: Duration = Duration::from_secs(60);

/// Send the adjustment prompt and return the model's raw text reply.
pub(super) async fn request(
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<String, HeatwiseError> {
    let client = reqwest::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .map_err(|e| HeatwiseError::Advisor(format!("failed to build HTTP client: {e}")))?;

    let body = json!({
        "model": model,
        "max_tokens": 200,
        "system": SYSTEM_PROMPT,
        "messages": [
            { "role": "user", "content": prompt },
        ],
    });

    let response = client
        .post(API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            let msg = if e.is_timeout() {
                "anthropic: timeout after 60s".to_string()
            } else {
                format!("anthropic: request failed: {e}")
            };
            error!("{}", msg);
            HeatwiseError::Advisor(msg)
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let truncated = &body[..body.len().min(1024)];
        return Err(HeatwiseError::Advisor(format!(
            "anthropic: HTTP {status} - {truncated}"
        )));
    }

    let body_text = response
        .text()
        .await
        .map_err(|e| HeatwiseError::Advisor(format!("anthropic: failed to read body: {e}")))?;

    // Response wrapper: { "content": [{"type": "text", "text": "..."}] }
    let value: serde_json::Value = serde_json::from_str(&body_text)
        .map_err(|e| HeatwiseError::Advisor(format!("anthropic: bad response wrapper: {e}")))?;

    value["content"][0]["text"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| HeatwiseError::Advisor("anthropic: no text in response".to_string()))
}
