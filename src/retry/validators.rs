//! Response validators
//!
//! A validator rejects a response that arrived fine but is not acceptable,
//! which makes the retry engine try again.

use std::sync::Arc;

/// Accepts or rejects a provider response
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Phrases that mark a refusal rather than an answer
pub const REFUSAL_PHRASES: &[&str] = &[
    "i cannot help",
    "i can't help",
    "i cannot assist",
    "i can't assist",
    "i'm unable to",
    "i am unable to",
    "as an ai language model",
    "maaf, saya tidak dapat",
    "maaf, saya tidak bisa",
];

/// Rejects responses shorter than `min_len` characters (after trimming) or
/// containing a refusal phrase
pub fn quality(min_len: usize) -> Validator {
    Arc::new(move |response: &str| {
        let trimmed = response.trim();
        if trimmed.chars().count() < min_len {
            return false;
        }
        let lower = trimmed.to_lowercase();
        !REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
    })
}

/// Rejects empty or whitespace-only responses
pub fn non_empty() -> Validator {
    Arc::new(|response: &str| !response.trim().is_empty())
}
