//! Query normalisation, tokenisation and Jaccard similarity

use std::collections::HashSet;

/// Normalised queries are cut to this many characters
pub const MAX_NORMALIZED_CHARS: usize = 200;

/// Function words ignored when comparing queries (English and Indonesian)
pub const STOP_WORDS: &[&str] = &[
    // English
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "was", "our", "out",
    "with", "this", "that", "from", "have", "has", "what", "how", "into", "your", "about",
    "please", "them", "they", "then", "than", "there", "their", "will", "would", "should",
    "could", "some", "which", "who", "why", "when", "where", "its", "also", "just",
    // Indonesian
    "yang", "dan", "untuk", "dengan", "ini", "itu", "dari", "pada", "atau", "juga", "adalah",
    "akan", "saya", "tolong",
];

/// Lowercase, strip punctuation, collapse whitespace, truncate
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_NORMALIZED_CHARS).collect()
}

/// Token set of an already normalised string
///
/// Tokens of two characters or fewer and stop words are dropped.
pub fn tokenize(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// `|A ∩ B| / |A ∪ B|`, or 0 when either set is empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
