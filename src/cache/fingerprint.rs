//! Cache keys.
//!
//! A fingerprint is the hex SHA-256 of a canonical, length-prefixed encoding
//! of every input that can change a provider's judgment: the normalized image
//! hashes, the context fields (minus `branch`) and the provider chain. Extra
//! context keys are sorted first so map iteration order never leaks in.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::model::{AnalysisContext, ImageSet};

const FINGERPRINT_VERSION: &[u8] = b"vision-gateway/fingerprint/v1";

/// Identity of an ordered provider chain, e.g. `local:llava:13b,openai:gpt-4o-mini`.
pub fn chain_identity<'a>(providers: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    providers
        .into_iter()
        .map(|(id, model)| format!("{}:{}", id, model))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn fingerprint(images: &ImageSet, context: &AnalysisContext, chain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION);

    push_field(&mut hasher, "baseline", Some(images.baseline.hash.as_str()));
    push_field(&mut hasher, "current", Some(images.current.hash.as_str()));
    push_field(&mut hasher, "diff", images.diff.as_ref().map(|d| d.hash.as_str()));
    push_field(&mut hasher, "test_name", context.test_name.as_deref());
    push_field(&mut hasher, "url", context.url.as_deref());
    push_field(&mut hasher, "viewport", context.viewport.as_deref());

    let extra: BTreeMap<&str, &str> = context
        .extra
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    hasher.update((extra.len() as u64).to_be_bytes());
    for (key, value) in extra {
        push_field(&mut hasher, "extra.key", Some(key));
        push_field(&mut hasher, "extra.value", Some(value));
    }

    push_field(&mut hasher, "providers", Some(chain));
    format!("{:x}", hasher.finalize())
}

fn push_field(hasher: &mut Sha256, name: &str, value: Option<&str>) {
    hasher.update(name.as_bytes());
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_be_bytes());
            hasher.update(v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}
