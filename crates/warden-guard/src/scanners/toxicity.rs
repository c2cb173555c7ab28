//! Lexicon-based toxicity classifier

use super::{noisy_or, Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::Result;
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

const LEXICON: &[(&str, f32)] = &[
    // Threats and self-harm incitement
    ("kill yourself", 1.0),
    ("kys", 0.9),
    ("i will hurt you", 0.9),
    ("you should die", 0.9),
    // Hostility
    ("hate you", 0.8),
    ("i hate", 0.4),
    ("shut up", 0.4),
    ("go to hell", 0.6),
    // Insults
    ("idiot", 0.6),
    ("moron", 0.6),
    ("stupid", 0.5),
    ("dumb", 0.4),
    ("loser", 0.4),
    ("worthless", 0.5),
    ("pathetic", 0.4),
    ("disgusting", 0.4),
    ("terrible", 0.3),
    ("useless", 0.3),
    // Profanity
    ("fuck", 0.8),
    ("fucking", 0.8),
    ("shit", 0.6),
    ("bitch", 0.8),
    ("bastard", 0.7),
    ("asshole", 0.8),
    ("damn", 0.2),
];

static TERMS: Lazy<Vec<(Regex, f32)>> = Lazy::new(|| {
    LEXICON
        .iter()
        .map(|(term, weight)| (Regex::new(&super::word_alternation(&[term])).unwrap(), *weight))
        .collect()
});

pub(crate) fn warm_up() {
    Lazy::force(&TERMS);
}

/// Toxicity scanner
///
/// Each lexicon hit contributes its weight once; weights combine with a
/// noisy-or so the score saturates toward 1.
pub struct ToxicityScanner {
    name: String,
}

impl ToxicityScanner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Scanner for ToxicityScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Toxicity
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let mut weights = vec![];
        let mut spans = vec![];

        for (regex, weight) in TERMS.iter() {
            let mut hit = false;
            for m in regex.find_iter(&request.text) {
                spans.push(Span::new(m.start(), m.end()));
                hit = true;
            }
            if hit {
                weights.push(*weight);
            }
        }

        if weights.is_empty() {
            return Ok(Detection::clean());
        }

        spans.sort();
        Ok(Detection::with_score(noisy_or(weights))
            .reason("toxic language")
            .spans(spans))
    }
}
