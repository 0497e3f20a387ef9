//! OpenAI-compatible chat completions with inline image data URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::ProviderAdapter;
use super::http::{api_key, build_client, join_url, send_json, text_at};
use super::judgment::{build_prompt, parse_judgment};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, ProviderError};
use crate::model::{AnalysisContext, AnalysisResult, ImageSet};

const MAX_TOKENS: u32 = 1024;

pub struct OpenAiProvider {
    id: String,
    model: String,
    endpoint: String,
    /// `None` with `requires_key` set means the key variable was missing
    api_key: Option<String>,
    requires_key: bool,
    cost_per_call: f64,
    timeout: Duration,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key: api_key(config),
            requires_key: config.api_key_env.is_some(),
            cost_per_call: config.cost_per_call,
            timeout,
            client: build_client(config, timeout)?,
        })
    }

    fn request_body(&self, images: &ImageSet, prompt: String) -> Value {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        content.extend(images.iter().map(|img| {
            json!({
                "type": "image_url",
                "image_url": {"url": img.data_url(), "detail": "high"},
            })
        }));
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "messages": [{"role": "user", "content": content}],
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    fn is_available(&self) -> bool {
        !self.requires_key || self.api_key.is_some()
    }

    async fn analyze(
        &self,
        images: &ImageSet,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult, ProviderError> {
        let prompt = build_prompt(context, images.diff.is_some());
        let mut request = self
            .client
            .post(join_url(&self.endpoint, "chat/completions"))
            .json(&self.request_body(images, prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body = send_json(&self.id, self.timeout, request).await?;
        let text = text_at(&self.id, &body, "/choices/0/message/content")?;
        parse_judgment(&self.id, text)
    }
}
