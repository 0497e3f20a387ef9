//! Local inference through the Ollama `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::ProviderAdapter;
use super::http::{build_client, join_url, send_json, text_at};
use super::judgment::{build_prompt, parse_judgment};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, ProviderError};
use crate::model::{AnalysisContext, AnalysisResult, ImageSet};

pub struct OllamaProvider {
    id: String,
    model: String,
    endpoint: String,
    cost_per_call: f64,
    timeout: Duration,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            cost_per_call: config.cost_per_call,
            timeout,
            client: build_client(config, timeout)?,
        })
    }

    fn request_body(&self, images: &ImageSet, prompt: String) -> Value {
        let encoded: Vec<&str> = images.iter().map(|img| img.base64.as_str()).collect();
        json!({
            "model": self.model,
            "prompt": prompt,
            "images": encoded,
            "stream": false,
            "format": "json",
        })
    }
}

#[async_trait]
impl ProviderAdapter for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    /// A local server needs no credentials; reachability shows up as
    /// `Unavailable` on the first call.
    fn is_available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    async fn analyze(
        &self,
        images: &ImageSet,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult, ProviderError> {
        let prompt = build_prompt(context, images.diff.is_some());
        let request = self
            .client
            .post(join_url(&self.endpoint, "api/generate"))
            .json(&self.request_body(images, prompt));

        let body = send_json(&self.id, self.timeout, request).await?;
        let text = text_at(&self.id, &body, "/response")?;
        parse_judgment(&self.id, text)
    }
}
