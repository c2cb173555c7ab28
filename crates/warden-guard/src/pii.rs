//! PII (Personally Identifiable Information) detection and redaction
//!
//! Shared by the anonymizer (reversible placeholders) and the `sensitive`
//! output scanner (irreversible redaction).

use crate::config::PiiConfig;
use crate::types::Span;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Entity categories the detector recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// Social Security Number
    Ssn,
    /// Credit Card Number
    CreditCard,
    /// Email Address
    EmailAddress,
    /// Phone Number
    PhoneNumber,
    /// IP Address
    IpAddress,
    /// API Key or Secret
    ApiKey,
}

impl EntityType {
    /// Upper-case label used in placeholders and redaction markers
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Ssn => "SSN",
            EntityType::CreditCard => "CREDIT_CARD",
            EntityType::EmailAddress => "EMAIL_ADDRESS",
            EntityType::PhoneNumber => "PHONE_NUMBER",
            EntityType::IpAddress => "IP_ADDRESS",
            EntityType::ApiKey => "API_KEY",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A detected sensitive span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub entity: EntityType,
    pub start: usize,
    pub end: usize,
}

impl PiiMatch {
    /// The matched slice of `text`
    pub fn value<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

struct PiiPatterns {
    ssn: Regex,
    credit_card: Regex,
    email: Regex,
    phone: Regex,
    ip_v4: Regex,
    ip_v6: Regex,
    api_key: Regex,
}

// Compiled once per process; read-only afterwards.
static PATTERNS: Lazy<PiiPatterns> = Lazy::new(|| PiiPatterns {
    // SSN: 123-45-6789, optionally tagged as SSN-123-45-6789
    ssn: Regex::new(r"\b(?:SSN[-:#\s]*)?\d{3}-\d{2}-\d{4}\b").unwrap(),
    // Credit cards: 16 digits with optional separators
    credit_card: Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b|\b\d{15,16}\b").unwrap(),
    email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
    phone: Regex::new(r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b")
        .unwrap(),
    ip_v4: Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .unwrap(),
    ip_v6: Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b").unwrap(),
    api_key: Regex::new(
        r#"\b(?:sk-[a-zA-Z0-9]{20,}|api[_-]?key[=:\s]+['"]?[a-zA-Z0-9_-]{20,}['"]?)"#,
    )
    .unwrap(),
});

/// Force pattern compilation
pub fn warm_up() {
    Lazy::force(&PATTERNS);
}

/// PII detector for identifying and redacting sensitive information
#[derive(Debug, Clone)]
pub struct PiiDetector {
    config: PiiConfig,
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new(PiiConfig::default())
    }
}

impl PiiDetector {
    /// Create a new PII detector with the given configuration
    pub fn new(config: PiiConfig) -> Self {
        Self { config }
    }

    /// Detect all PII in the given text, sorted and non-overlapping
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let patterns = &*PATTERNS;
        let mut matches = vec![];

        let mut collect = |regex: &Regex, entity: EntityType| {
            for m in regex.find_iter(text) {
                matches.push(PiiMatch {
                    entity,
                    start: m.start(),
                    end: m.end(),
                });
            }
        };

        if self.config.detect_ssn {
            collect(&patterns.ssn, EntityType::Ssn);
        }
        if self.config.detect_email {
            collect(&patterns.email, EntityType::EmailAddress);
        }
        if self.config.detect_phone {
            collect(&patterns.phone, EntityType::PhoneNumber);
        }
        if self.config.detect_ip {
            collect(&patterns.ip_v4, EntityType::IpAddress);
            collect(&patterns.ip_v6, EntityType::IpAddress);
        }
        if self.config.detect_api_keys {
            collect(&patterns.api_key, EntityType::ApiKey);
        }

        // Credit cards need a Luhn check on top of the pattern
        if self.config.detect_credit_card {
            for m in patterns.credit_card.find_iter(text) {
                let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
                if luhn_check(&digits) {
                    matches.push(PiiMatch {
                        entity: EntityType::CreditCard,
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        }

        // Earliest first; longest wins at equal start
        matches.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        remove_overlaps(&mut matches);

        matches
    }

    /// Replace every match with the configured redaction marker
    pub fn redact(&self, text: &str, matches: &[PiiMatch]) -> String {
        replace_spans(text, matches.iter().map(|m| {
            (m.span(), self.format_redaction(m.entity))
        }))
    }

    /// Format redaction placeholder
    fn format_redaction(&self, entity: EntityType) -> String {
        self.config.redaction_format.replace("{TYPE}", entity.label())
    }
}

/// Rebuild `text` with each span swapped for its replacement
///
/// Spans must be sorted and non-overlapping.
pub(crate) fn replace_spans<I>(text: &str, replacements: I) -> String
where
    I: IntoIterator<Item = (Span, String)>,
{
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for (span, replacement) in replacements {
        if span.start > last_end {
            result.push_str(&text[last_end..span.start]);
        }
        result.push_str(&replacement);
        last_end = span.end;
    }

    if last_end < text.len() {
        result.push_str(&text[last_end..]);
    }

    result
}

/// Luhn algorithm for credit card validation
fn luhn_check(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() < 13 {
        return false;
    }

    let mut sum = 0;
    let mut double = false;

    for &digit in digits.iter().rev() {
        let mut d = digit;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }

    sum % 10 == 0
}

/// Remove overlapping matches (keep the first one)
fn remove_overlaps(matches: &mut Vec<PiiMatch>) {
    if matches.len() < 2 {
        return;
    }

    let mut i = 0;
    while i < matches.len() - 1 {
        if matches[i].end > matches[i + 1].start {
            matches.remove(i + 1);
        } else {
            i += 1;
        }
    }
}
