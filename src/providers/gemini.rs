use super::snippet;
use crate::error::AdapterError;
use crate::logw;
use crate::models::{AnalysisRequest, AnalysisResult};
use crate::registry::Provider;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent`.
pub struct GeminiGateway {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiGateway {
    pub fn new(name: impl Into<String>, client: Client, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

pub(crate) fn extract_text(raw: &str) -> Result<String, AdapterError> {
    let root: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AdapterError::new(format!("invalid JSON response: {}", e)))?;

    if let Some(msg) = root.pointer("/error/message").and_then(|v| v.as_str()) {
        return Err(AdapterError::new(msg));
    }
    if let Some(reason) = root.pointer("/promptFeedback/blockReason").and_then(|v| v.as_str()) {
        return Err(AdapterError::new(format!("prompt blocked: {}", reason)));
    }

    let text = root
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AdapterError::new("response has no candidate text"));
    }
    Ok(text.trim().to_string())
}

#[async_trait]
impl Provider<AnalysisRequest, AnalysisResult> for GeminiGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AdapterError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::new("Gemini API key not configured"))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 2048,
                "candidateCount": 1,
            },
        });

        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = extract_text(&raw)
                .err()
                .map(|e| e.reason)
                .unwrap_or_else(|| snippet(&raw, 400));
            logw(format!("{} HTTP {}: {}", self.name, status.as_u16(), detail));
            return Err(AdapterError::new(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let text = extract_text(&raw)?;
        Ok(AnalysisResult::from_text(text, Some(self.model.clone())).with_provider(&self.name))
    }
}
