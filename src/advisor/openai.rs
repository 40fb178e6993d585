//! OpenAI chat-completions backend.

use std::time::Duration;

use serde_json::json;
use tracing::error;

use super::SYSTEM_PROMPT;
use crate::error::HeatwiseError;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
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
        "temperature": 0.3,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": prompt },
        ],
    });

    let response = client
        .post(API_URL)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            let msg = if e.is_timeout() {
                "openai: timeout after 60s".to_string()
            } else {
                format!("openai: request failed: {e}")
            };
            error!("{}", msg);
            HeatwiseError::Advisor(msg)
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let truncated = &body[..body.len().min(1024)];
        return Err(HeatwiseError::Advisor(format!(
            "openai: HTTP {status} - {truncated}"
        )));
    }

    let body_text = response
        .text()
        .await
        .map_err(|e| HeatwiseError::Advisor(format!("openai: failed to read body: {e}")))?;

    // Response wrapper: { "choices": [{"message": {"content": "..."}}] }
    let value: serde_json::Value = serde_json::from_str(&body_text)
        .map_err(|e| HeatwiseError::Advisor(format!("openai: bad response wrapper: {e}")))?;

    value["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| HeatwiseError::Advisor("openai: no content in response".to_string()))
}
