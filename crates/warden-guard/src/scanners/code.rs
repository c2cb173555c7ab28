//! Source code detection

use super::{noisy_or, Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::{Result, WardenError};
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

/// Weight of a single language signal
const SIGNAL_WEIGHT: f32 = 0.5;

const LANGUAGE_SIGNALS: &[(&str, &[&str])] = &[
    (
        "python",
        &[
            r"\bdef\s+\w+\s*\(",
            r"(?m)^\s*import\s+\w+",
            r"\bimport\s+os\b",
            r"\bfrom\s+[\w.]+\s+import\b",
            r"\bprint\(",
            r"\bos\.system\(",
            r"\bsubprocess\.\w+\(",
            r#"if\s+__name__\s*==\s*["']__main__["']"#,
        ],
    ),
    (
        "javascript",
        &[
            r"\bfunction\s*\w*\s*\([^)]*\)\s*\{",
            r"\b(?:const|let|var)\s+\w+\s*=",
            r"\bconsole\.log\(",
            r"\brequire\(['\x22]",
            r"=>\s*\{",
            r"\bdocument\.\w+",
        ],
    ),
    (
        "php",
        &[r"<\?php", r"\$\w+\s*=", r"\becho\s+", r"\$_(?:GET|POST|REQUEST)\b"],
    ),
    (
        "shell",
        &[r"(?m)^#!/bin/(?:ba)?sh", r"\brm\s+-rf\b", r"\bsudo\s+\w+", r"\|\s*(?:grep|awk|sed)\b"],
    ),
    (
        "sql",
        &[
            r"(?i)\bselect\s+[\w*,\s]+\s+from\s+\w+",
            r"(?i)\binsert\s+into\s+\w+",
            r"(?i)\bdrop\s+table\b",
        ],
    ),
];

struct Language {
    name: &'static str,
    signals: Vec<Regex>,
    fence: Regex,
}

static LANGUAGES: Lazy<Vec<Language>> = Lazy::new(|| {
    LANGUAGE_SIGNALS
        .iter()
        .map(|&(name, signals)| Language {
            name,
            signals: signals.iter().map(|s| Regex::new(s).unwrap()).collect(),
            fence: Regex::new(&format!(r"(?im)^```\s*{name}\b")).unwrap(),
        })
        .collect()
});

pub(crate) fn warm_up() {
    Lazy::force(&LANGUAGES);
}

/// Scores text by how strongly it looks like code in a configured language
///
/// A fenced block tagged with the language is conclusive; otherwise
/// distinct syntax signals combine with a noisy-or.
pub struct CodeScanner {
    name: String,
    languages: Vec<&'static Language>,
}

impl CodeScanner {
    /// An empty `languages` list watches every known language
    pub fn new(name: impl Into<String>, languages: &[String]) -> Result<Self> {
        let languages = if languages.is_empty() {
            LANGUAGES.iter().collect()
        } else {
            languages
                .iter()
                .map(|wanted| {
                    let wanted = wanted.to_lowercase();
                    let wanted = match wanted.as_str() {
                        "js" | "node" => "javascript".to_string(),
                        "py" => "python".to_string(),
                        "bash" | "sh" => "shell".to_string(),
                        _ => wanted,
                    };
                    LANGUAGES
                        .iter()
                        .find(|l| l.name == wanted)
                        .ok_or_else(|| {
                            WardenError::ConfigError(format!("unsupported language '{wanted}'"))
                        })
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            name: name.into(),
            languages,
        })
    }
}

#[async_trait]
impl Scanner for CodeScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Code
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let text = &request.text;
        let mut best: Option<(f32, &str, Vec<Span>)> = None;

        for language in &self.languages {
            let mut spans = vec![];
            let score = if let Some(m) = language.fence.find(text) {
                spans.push(Span::new(m.start(), text.len()));
                1.0
            } else {
                let mut hits = 0;
                for signal in &language.signals {
                    if let Some(m) = signal.find(text) {
                        spans.push(Span::new(m.start(), m.end()));
                        hits += 1;
                    }
                }
                noisy_or(std::iter::repeat(SIGNAL_WEIGHT).take(hits))
            };

            if score > 0.0 && best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                spans.sort();
                best = Some((score, language.name, spans));
            }
        }

        Ok(match best {
            Some((score, language, spans)) => Detection::with_score(score)
                .reason(format!("{language} code"))
                .spans(spans),
            None => Detection::clean(),
        })
    }
}
