//! Banned substring matching

use super::{Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::{Result, WardenError};
use crate::pii::replace_spans;
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use regex::Regex;

const REDACTION: &str = "[REDACTED]";

/// Flags (and optionally redacts) any occurrence of the configured strings
pub struct BanSubstringsScanner {
    name: String,
    matcher: Option<Regex>,
    redact: bool,
}

impl BanSubstringsScanner {
    pub fn new(
        name: impl Into<String>,
        substrings: &[String],
        case_sensitive: bool,
        redact: bool,
    ) -> Result<Self> {
        let alternatives: Vec<String> = substrings
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| regex::escape(s))
            .collect();

        let matcher = if alternatives.is_empty() {
            None
        } else {
            let flags = if case_sensitive { "" } else { "(?i)" };
            let pattern = format!("{flags}(?:{})", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| WardenError::ConfigError(e.to_string()))?)
        };

        Ok(Self {
            name: name.into(),
            matcher,
            redact,
        })
    }
}

#[async_trait]
impl Scanner for BanSubstringsScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::BanSubstrings
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let Some(matcher) = &self.matcher else {
            return Ok(Detection::clean());
        };

        let spans: Vec<Span> = matcher
            .find_iter(&request.text)
            .map(|m| Span::new(m.start(), m.end()))
            .collect();

        if spans.is_empty() {
            return Ok(Detection::clean());
        }

        let mut detection = Detection::with_score(1.0).reason("banned substring");
        if self.redact {
            let text = replace_spans(
                &request.text,
                spans.iter().map(|s| (*s, REDACTION.to_string())),
            );
            detection = detection.sanitized(text);
        }
        Ok(detection.spans(spans))
    }
}
