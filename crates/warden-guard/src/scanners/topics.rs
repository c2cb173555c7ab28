//! Banned topic detection by keyword lexicon

use super::{noisy_or, word_alternation, Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::{Result, WardenError};
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Contribution of each distinct keyword hit
const HIT_WEIGHT: f32 = 0.6;

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "violence",
        &[
            "kill", "killing", "murder", "weapon", "weapons", "explosive", "explosives", "bomb",
            "bombs", "shoot", "shooting", "stab", "assault", "attack", "gun", "guns", "torture",
        ],
    ),
    (
        "illegal_activities",
        &[
            "hack", "hacking", "steal", "stealing", "drugs", "launder", "laundering", "fraud",
            "counterfeit", "smuggle", "smuggling", "pirate", "piracy", "break into", "ransomware",
        ],
    ),
    (
        "self_harm",
        &["suicide", "self harm", "self-harm", "cut myself", "overdose", "end my life"],
    ),
    (
        "hate_speech",
        &["inferior race", "ethnic cleansing", "subhuman", "go back to your country"],
    ),
    (
        "weapons",
        &["firearm", "rifle", "ammunition", "grenade", "silencer", "nerve agent"],
    ),
];

static BUILTIN: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    TOPIC_KEYWORDS
        .iter()
        .map(|(topic, words)| (*topic, Regex::new(&word_alternation(words)).unwrap()))
        .collect()
});

pub(crate) fn warm_up() {
    Lazy::force(&BUILTIN);
}

/// Scores each configured topic by the number of distinct keywords present
///
/// Topics without a built-in lexicon match their own name as a phrase.
pub struct BanTopicsScanner {
    name: String,
    topics: Vec<(String, Regex)>,
}

impl BanTopicsScanner {
    pub fn new(name: impl Into<String>, topics: &[String]) -> Result<Self> {
        let topics = topics
            .iter()
            .map(|topic| -> Result<(String, Regex)> {
                let key = topic.to_lowercase().replace([' ', '-'], "_");
                let regex = match BUILTIN.get(key.as_str()) {
                    Some(regex) => regex.clone(),
                    None => Regex::new(&word_alternation(&[topic.replace('_', " ").as_str()]))
                        .map_err(|e| WardenError::ConfigError(e.to_string()))?,
                };
                Ok((key, regex))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            topics,
        })
    }
}

#[async_trait]
impl Scanner for BanTopicsScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::BanTopics
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let mut best: Option<(f32, &str, Vec<Span>)> = None;

        for (topic, regex) in &self.topics {
            let mut distinct = BTreeSet::new();
            let mut spans = vec![];
            for m in regex.find_iter(&request.text) {
                distinct.insert(m.as_str().to_lowercase());
                spans.push(Span::new(m.start(), m.end()));
            }
            if distinct.is_empty() {
                continue;
            }

            let score = noisy_or(std::iter::repeat(HIT_WEIGHT).take(distinct.len()));
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, topic.as_str(), spans));
            }
        }

        Ok(match best {
            Some((score, topic, spans)) => Detection::with_score(score)
                .reason(format!("banned topic: {topic}"))
                .spans(spans),
            None => Detection::clean(),
        })
    }
}
