use super::snippet;
use crate::error::AdapterError;
use crate::logw;
use crate::models::{AnalysisRequest, AnalysisResult};
use crate::registry::Provider;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const SYSTEM_PROMPT: &str = "You are an expert in short-form video and viral content. Answer in JSON.";
const MAX_ERROR_BODY_CHARS: usize = 400;

/// Any gateway speaking the OpenAI `chat/completions` dialect (OpenRouter,
/// LocalAI, a gpt4free server).
pub struct ChatGateway {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl ChatGateway {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Reads `choices[0].message.content`, or turns an `error` object into a
/// reason string.
pub(crate) fn extract_message(raw: &str) -> Result<String, AdapterError> {
    let root: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AdapterError::new(format!("invalid JSON response: {}", e)))?;

    if let Some(err) = root.get("error") {
        let msg = err
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| err.as_str())
            .unwrap_or("unknown error");
        return match err.get("code").and_then(|v| v.as_str()) {
            Some(code) => Err(AdapterError::new(format!("{} ({})", msg, code))),
            None => Err(AdapterError::new(msg)),
        };
    }

    let content = root
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(AdapterError::new("response has no message content"));
    }
    Ok(content.to_string())
}

#[async_trait]
impl Provider<AnalysisRequest, AnalysisResult> for ChatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AdapterError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = extract_message(&raw)
                .err()
                .map(|e| e.reason)
                .unwrap_or_else(|| snippet(&raw, MAX_ERROR_BODY_CHARS));
            logw(format!("{} HTTP {}: {}", self.name, status.as_u16(), detail));
            return Err(AdapterError::new(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let text = extract_message(&raw)?;
        Ok(AnalysisResult::from_text(text, Some(self.model.clone())).with_provider(&self.name))
    }
}
