pub mod ollama;
pub mod remote;
pub mod vertex;

use crate::llm::LlmError;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

/// Sends `request` and decodes a JSON reply, mapping failures to `LlmError`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        // Try to get the error message from the response body
        let error_body = match response.text().await {
            Ok(body) => format!(" - Response body: {}", body),
            Err(_) => String::new(),
        };

        error!("{} API responded with status code: {}{}", provider, status, error_body);
        return Err(LlmError::ResponseError(format!(
            "{} API responded with status code: {}{}",
            provider, status, error_body
        )));
    }

    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

    debug!("Raw response from {}: {}", provider, response_text);

    serde_json::from_str::<T>(&response_text).map_err(|e| {
        error!("Failed to parse {} response: {} - Response was: {}", provider, e, response_text);
        LlmError::ResponseError(format!(
            "Failed to parse {} response: {} - Response was: {}",
            provider, e, response_text
        ))
    })
}
