//! Anthropic messages API with base64 image blocks.

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

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    id: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    cost_per_call: f64,
    timeout: Duration,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key: api_key(config),
            cost_per_call: config.cost_per_call,
            timeout,
            client: build_client(config, timeout)?,
        })
    }

    fn request_body(&self, images: &ImageSet, prompt: String) -> Value {
        let mut content: Vec<Value> = images
            .iter()
            .map(|img| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": img.format.media_type(),
                        "data": img.base64,
                    },
                })
            })
            .collect();
        content.push(json!({"type": "text", "text": prompt}));
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": content}],
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
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
        self.api_key.is_some()
    }

    async fn analyze(
        &self,
        images: &ImageSet,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult, ProviderError> {
        let Some(key) = &self.api_key else {
            return Err(ProviderError::unavailable(&self.id, "API key not set"));
        };
        let prompt = build_prompt(context, images.diff.is_some());
        let request = self
            .client
            .post(join_url(&self.endpoint, "v1/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(images, prompt));

        let body = send_json(&self.id, self.timeout, request).await?;
        let text = text_at(&self.id, &body, "/content/0/text")?;
        parse_judgment(&self.id, text)
    }
}
