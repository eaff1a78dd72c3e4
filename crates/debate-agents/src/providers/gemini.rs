//! Gemini backend over the REST `generateContent` endpoint.
//!
//! Uses Gemini's native structured output: `responseMimeType` is
//! `application/json` and the stage schema goes in `responseJsonSchema`.

use async_trait::async_trait;
use coordination::debate::{AgentConfig, CapabilityError};
use serde_json::{json, Value};

use super::{CompletionBackend, GEMINI_BASE_URL};

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    top_p: f64,
}

impl GeminiBackend {
    pub fn from_config(client: reqwest::Client, config: &AgentConfig, api_key: String) -> Self {
        Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn request_body(&self, system: &str, user: &str, schema: &Value) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "topP": self.top_p,
                "responseMimeType": "application/json",
                "responseJsonSchema": schema,
            }
        })
    }
}

/// Concatenated answer text of the first candidate. Thought parts are skipped.
fn reply_text(response: &Value) -> Result<String, CapabilityError> {
    let candidate = &response["candidates"][0];
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                .filter_map(|p| p["text"].as_str())
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate["finishReason"]
            .as_str()
            .or_else(|| response["promptFeedback"]["blockReason"].as_str())
            .unwrap_or("no candidates");
        return Err(CapabilityError::provider(format!("Gemini returned no text ({reason})")));
    }
    Ok(text)
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<String, CapabilityError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(system, user, schema))
            .send()
            .await
            .map_err(|e| CapabilityError::provider(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::provider(format!(
                "Gemini API error ({status}): {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::provider(format!("Gemini response unreadable: {e}")))?;
        reply_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use coordination::debate::ProviderKind;

    use super::*;

    fn backend() -> GeminiBackend {
        let config = AgentConfig::new("g", ProviderKind::Gemini, "gemini-2.5-pro")
            .with_sampling(0.4, 0.9);
        GeminiBackend::from_config(reqwest::Client::new(), &config, "k".into())
    }

    #[test]
    fn endpoint_uses_model_name() {
        assert_eq!(
            backend().endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn body_requests_json_with_schema() {
        let schema = json!({"type": "object", "properties": {"answer": {"type": "string"}}});
        let body = backend().request_body("sys", "usr", &schema);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "usr");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"], schema);
        assert_eq!(body["generationConfig"]["topP"], 0.9);
    }

    #[test]
    fn reply_text_skips_thoughts() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "{\"is_correct\":" },
                    { "text": " true}" }
                ]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(reply_text(&response).unwrap(), "{\"is_correct\": true}");
    }

    #[test]
    fn blocked_prompt_is_provider_error() {
        let response = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = reply_text(&response).unwrap_err();
        assert!(matches!(err, CapabilityError::ProviderError(ref m) if m.contains("SAFETY")));
    }
}
