//! # Data Model
//!
//! Requests flowing into the gateway, the normalized images handed to
//! providers, and the structured judgment providers return.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProviderFailure;

/// Optional metadata about the screenshot pair.
///
/// Everything except `branch` participates in the cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub test_name: Option<String>,
    pub url: Option<String>,
    /// Free-form viewport label, e.g. `1280x720` or `mobile`
    pub viewport: Option<String>,
    pub branch: Option<String>,
    /// Extra caller-defined fields; canonicalized (sorted) before hashing
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// One unit of work: a baseline/current pair plus an optional diff overlay.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    baseline: Vec<u8>,
    current: Vec<u8>,
    diff: Option<Vec<u8>>,
    context: AnalysisContext,
}

impl AnalysisRequest {
    pub fn new(baseline: Vec<u8>, current: Vec<u8>) -> Self {
        Self {
            baseline,
            current,
            diff: None,
            context: AnalysisContext::default(),
        }
    }

    pub fn with_diff(mut self, diff: Vec<u8>) -> Self {
        self.diff = Some(diff);
        self
    }

    pub fn with_context(mut self, context: AnalysisContext) -> Self {
        self.context = context;
        self
    }

    pub fn baseline(&self) -> &[u8] {
        &self.baseline
    }

    pub fn current(&self) -> &[u8] {
        &self.current
    }

    pub fn diff(&self) -> Option<&[u8]> {
        self.diff.as_deref()
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.context
    }
}

/// Encoding of a normalized image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// Provider-safe, cache-stable image produced by the preprocessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub base64: String,
    /// Hex SHA-256 of `bytes`
    pub hash: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub original_size: usize,
    pub processed_size: usize,
}

impl NormalizedImage {
    /// `data:` URL form used by OpenAI-compatible APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.media_type(), self.base64)
    }

    /// processed / original; below 1.0 means the image shrank.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.processed_size as f64 / self.original_size as f64
    }
}

/// The normalized images of one request.
#[derive(Debug, Clone)]
pub struct ImageSet {
    pub baseline: NormalizedImage,
    pub current: NormalizedImage,
    pub diff: Option<NormalizedImage>,
}

impl ImageSet {
    pub fn iter(&self) -> impl Iterator<Item = &NormalizedImage> {
        [Some(&self.baseline), Some(&self.current), self.diff.as_ref()]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Minor,
    Moderate,
    Breaking,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Severity::None),
            "minor" => Some(Severity::Minor),
            "moderate" => Some(Severity::Moderate),
            "breaking" => Some(Severity::Breaking),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Breaking => "breaking",
        };
        f.write_str(s)
    }
}

/// A provider's structured judgment of one image pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub severity: Severity,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Where an outcome came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultSource {
    /// Served from cache; `provider` produced the original result
    Cache { provider: String },
    Provider { provider: String },
}

impl ResultSource {
    pub fn provider(&self) -> &str {
        match self {
            ResultSource::Cache { provider } | ResultSource::Provider { provider } => provider,
        }
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, ResultSource::Cache { .. })
    }
}

/// A result annotated with how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub source: ResultSource,
    pub fingerprint: String,
    /// USD charged for this call; zero for cache hits and free providers
    pub cost: f64,
    /// Providers that failed or were skipped before the one that served
    pub fallbacks: Vec<ProviderFailure>,
}
