//! Prompt construction and response parsing shared by every adapter.
//!
//! Providers are asked for a bare JSON object. Models like to wrap that object
//! in Markdown fences or a sentence of preamble, so the parser looks for the
//! outermost `{ ... }` before deserializing.

use serde::Deserialize;

use crate::error::ProviderError;
use crate::model::{AnalysisContext, AnalysisResult, Severity};

const INSTRUCTIONS: &str = "You are a visual regression reviewer. Compare the BASELINE screenshot \
with the CURRENT screenshot and judge whether the visual change is a regression.

Respond with a single JSON object and nothing else:
{\"severity\": \"none\" | \"minor\" | \"moderate\" | \"breaking\",
 \"confidence\": number between 0 and 1,
 \"reasoning\": short explanation,
 \"categories\": list of affected areas such as \"layout\", \"color\", \"text\", \"content\",
 \"suggestions\": list of follow-up actions}";

/// Build the text prompt. Images are attached by the adapter in the order
/// baseline, current, then diff.
///
/// Only fields that are part of the cache fingerprint may appear here, so
/// `branch` is left out: a cached judgment must answer the same prompt.
pub fn build_prompt(context: &AnalysisContext, has_diff: bool) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\nImages: 1 = BASELINE, 2 = CURRENT");
    if has_diff {
        prompt.push_str(", 3 = DIFF overlay highlighting changed pixels");
    }
    prompt.push('.');

    let mut details = Vec::new();
    if let Some(test) = &context.test_name {
        details.push(format!("Test: {}", test));
    }
    if let Some(url) = &context.url {
        details.push(format!("URL: {}", url));
    }
    if let Some(viewport) = &context.viewport {
        details.push(format!("Viewport: {}", viewport));
    }
    let mut extra: Vec<_> = context.extra.iter().collect();
    extra.sort();
    for (key, value) in extra {
        details.push(format!("{}: {}", key, value));
    }

    if !details.is_empty() {
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(&details.join("\n"));
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    severity: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Parse a model's text reply into an [`AnalysisResult`].
pub fn parse_judgment(provider: &str, text: &str) -> Result<AnalysisResult, ProviderError> {
    let body = extract_object(text).ok_or_else(|| {
        ProviderError::invalid_response(provider, "no JSON object in model output")
    })?;
    let raw: RawJudgment = serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(provider, format!("malformed judgment: {}", e))
    })?;

    let severity = Severity::parse(&raw.severity).ok_or_else(|| {
        ProviderError::invalid_response(provider, format!("unknown severity '{}'", raw.severity))
    })?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ProviderError::invalid_response(
            provider,
            format!("confidence {} outside 0..=1", raw.confidence),
        ));
    }

    Ok(AnalysisResult {
        severity,
        confidence: raw.confidence,
        reasoning: raw.reasoning.trim().to_string(),
        categories: raw.categories,
        suggestions: raw.suggestions,
    })
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
