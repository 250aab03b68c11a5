//! Similarity scoring for exemplar retrieval.
//!
//! Vector similarity when embeddings exist; shared-token overlap otherwise.

use std::collections::HashSet;

/// Words too common to signal topical overlap.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "you", "your", "are", "was", "but", "not",
    "have", "has", "from", "about", "into", "how", "what", "why", "when", "our", "its", "can",
    "will", "just", "all", "out", "they", "their", "them", "who",
];

/// Lowercased alphanumeric tokens of length >= 3, minus stopwords.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Number of distinct query tokens that also appear in the document.
pub fn shared_token_count(query: &HashSet<String>, document: &HashSet<String>) -> usize {
    query.intersection(document).count()
}

/// Cosine similarity in [-1, 1]. Returns 0.0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
