//! Output relevance to the originating prompt

use super::{Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::Result;
use crate::types::ScanRequest;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into",
    "is", "it", "its", "me", "my", "of", "on", "or", "please", "so", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());
static STOP: Lazy<HashSet<&'static str>> = Lazy::new(|| STOPWORDS.iter().copied().collect());

pub(crate) fn warm_up() {
    Lazy::force(&WORD);
    Lazy::force(&STOP);
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for m in WORD.find_iter(text) {
        let word = m.as_str().to_lowercase();
        if word.chars().count() < 2 || STOP.contains(word.as_str()) {
            continue;
        }
        *counts.entry(word).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity of the content-word vectors of `a` and `b`
pub fn similarity(a: &str, b: &str) -> f32 {
    let a = term_frequencies(a);
    let b = term_frequencies(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .filter_map(|(word, n)| b.get(word).map(|m| n * m))
        .sum();
    let norm = |v: &HashMap<String, f32>| v.values().map(|n| n * n).sum::<f32>().sqrt();

    (dot / (norm(&a) * norm(&b))).clamp(0.0, 1.0)
}

/// Similarity between an output and the prompt that produced it
///
/// The score is a similarity, not a risk, so this scanner is inverted.
/// Without a usable prompt there is nothing to compare against and the
/// output is treated as fully relevant.
pub struct RelevanceScanner {
    name: String,
}

impl RelevanceScanner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Scanner for RelevanceScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Relevance
    }

    fn inverted(&self) -> bool {
        true
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let prompt = match request.prompt() {
            Some(prompt) if !term_frequencies(prompt).is_empty() => prompt,
            _ => return Ok(Detection::with_score(1.0)),
        };

        Ok(Detection::with_score(similarity(prompt, &request.text)))
    }
}
