//! # Provider Adapters
//!
//! Uniform interface over vision model backends. The gateway only ever holds
//! `Arc<dyn ProviderAdapter>`; the concrete type is chosen once, from the
//! configuration's `kind`, by [`build_provider`].
//!
//! ## Contract
//!
//! - Adapters never touch the cache or the ledger
//! - Every failure is one of `Unavailable`, `Timeout`, `InvalidResponse`
//! - Images arrive already normalized; adapters only wrap them in the
//!   provider's request format

pub mod anthropic;
pub mod http;
pub mod judgment;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind, RetryConfig};
use crate::error::{GatewayError, ProviderError};
use crate::model::{AnalysisContext, AnalysisResult, ImageSet};

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// A vision model backend.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique provider id, as configured.
    fn id(&self) -> &str;

    /// Model name; part of the cache key's provider chain identity.
    fn model(&self) -> &str;

    /// USD charged per successful call. Zero marks a free provider.
    fn cost_per_call(&self) -> f64;

    /// Cheap, local readiness check (credentials present, enabled).
    /// Must not perform network I/O.
    fn is_available(&self) -> bool;

    /// Judge one normalized image set.
    ///
    /// # Arguments
    /// * `images` - Normalized baseline, current and optional diff
    /// * `context` - Request metadata folded into the prompt
    ///
    /// # Returns
    /// The provider's structured judgment
    async fn analyze(
        &self,
        images: &ImageSet,
        context: &AnalysisContext,
    ) -> Result<AnalysisResult, ProviderError>;

    fn is_free(&self) -> bool {
        self.cost_per_call() <= 0.0
    }
}

/// Build the adapter for one configured provider.
pub fn build_provider(
    config: &ProviderConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
    let timeout = retry.policy_for(config).timeout;
    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config, timeout)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config, timeout)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config, timeout)?),
    };
    log::debug!(
        "built {:?} adapter '{}' (model {}, available: {})",
        config.kind,
        adapter.id(),
        adapter.model(),
        adapter.is_available()
    );
    Ok(adapter)
}
