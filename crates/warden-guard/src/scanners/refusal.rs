//! Detects model refusals in generated output

use super::{Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::{Result, WardenError};
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

const CUSTOM_PHRASE_WEIGHT: f32 = 0.8;

const PHRASES: &[(&str, f32)] = &[
    ("I'm sorry, but I can't", 0.95),
    ("I'm sorry, but I cannot", 0.95),
    ("I cannot fulfill", 0.9),
    ("I can't assist with", 0.9),
    ("I cannot assist with", 0.9),
    ("I can't help with", 0.85),
    ("I cannot help with", 0.85),
    ("I am unable to", 0.7),
    ("I'm unable to", 0.7),
    ("I'm not able to", 0.7),
    ("I won't be able to", 0.7),
    ("As an AI language model", 0.6),
    ("As an AI", 0.4),
    ("against my programming", 0.8),
    ("I must decline", 0.9),
    ("not appropriate for me to", 0.7),
    ("I apologize, but", 0.6),
];

struct Phrase {
    regex: Regex,
    weight: f32,
}

fn phrase_regex(phrase: &str) -> std::result::Result<Regex, regex::Error> {
    // Treat straight and curly apostrophes alike
    let body = phrase
        .split_whitespace()
        .map(|word| regex::escape(word).replace('\'', "['’]"))
        .collect::<Vec<_>>()
        .join(r"\s+");
    Regex::new(&format!("(?i){body}"))
}

static BUILTIN: Lazy<Vec<Phrase>> = Lazy::new(|| {
    PHRASES
        .iter()
        .map(|(phrase, weight)| Phrase {
            regex: phrase_regex(phrase).unwrap(),
            weight: *weight,
        })
        .collect()
});

pub(crate) fn warm_up() {
    Lazy::force(&BUILTIN);
}

/// Flags output in which the model declined to answer
///
/// The score is the weight of the strongest refusal phrase found.
pub struct NoRefusalScanner {
    name: String,
    custom: Vec<Phrase>,
}

impl NoRefusalScanner {
    pub fn new(name: impl Into<String>, custom_phrases: &[String]) -> Result<Self> {
        let custom = custom_phrases
            .iter()
            .map(|p| {
                phrase_regex(p)
                    .map(|regex| Phrase {
                        regex,
                        weight: CUSTOM_PHRASE_WEIGHT,
                    })
                    .map_err(|e| WardenError::ConfigError(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            custom,
        })
    }
}

#[async_trait]
impl Scanner for NoRefusalScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::NoRefusal
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let mut score = 0.0_f32;
        let mut spans = vec![];

        for phrase in BUILTIN.iter().chain(self.custom.iter()) {
            if let Some(m) = phrase.regex.find(&request.text) {
                score = score.max(phrase.weight);
                spans.push(Span::new(m.start(), m.end()));
            }
        }

        if spans.is_empty() {
            return Ok(Detection::clean());
        }

        spans.sort();
        Ok(Detection::with_score(score).reason("refusal").spans(spans))
    }
}
