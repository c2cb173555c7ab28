//! Reversible placeholder substitution
//!
//! Sensitive values become `<CATEGORY_n>` placeholders before the text
//! reaches the generator, and are restored in the generator's output for
//! the same session only.

use crate::config::PiiConfig;
use crate::pii::{replace_spans, PiiDetector};
use crate::vault::{AnonymizationMapping, Vault};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::sync::Arc;
use tracing::debug;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[A-Z][A-Z_]*_\d+>").unwrap());

/// Rewritten text and the placeholders it uses
#[derive(Debug, Clone, PartialEq)]
pub struct Anonymized {
    pub text: String,
    pub mapping: AnonymizationMapping,
}

impl Anonymized {
    pub fn is_modified(&self) -> bool {
        !self.mapping.is_empty()
    }
}

/// Anonymizer and deanonymizer over a shared [`Vault`]
#[derive(Debug, Clone)]
pub struct Anonymizer {
    detector: PiiDetector,
    vault: Arc<Vault>,
}

impl Anonymizer {
    pub fn new(config: PiiConfig, vault: Arc<Vault>) -> Self {
        Self {
            detector: PiiDetector::new(config),
            vault,
        }
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Replace every sensitive value in `text` with its session placeholder
    pub async fn anonymize(&self, text: &str, session_id: &str) -> Anonymized {
        let matches = self.detector.detect(text);
        let mut mapping = AnonymizationMapping::new(session_id);
        if matches.is_empty() {
            return Anonymized {
                text: text.to_string(),
                mapping,
            };
        }

        let values: Vec<(&str, &str)> = matches
            .iter()
            .map(|m| (m.entity.label(), m.value(text)))
            .collect();
        let placeholders = self.vault.placeholders(session_id, &values, text).await;

        for ((_, value), placeholder) in values.iter().zip(&placeholders) {
            mapping
                .entries
                .insert(placeholder.clone(), value.to_string());
        }

        let rewritten = replace_spans(
            text,
            matches.iter().map(|m| m.span()).zip(placeholders),
        );
        debug!(
            session_id,
            placeholders = mapping.len(),
            "anonymized text"
        );

        Anonymized {
            text: rewritten,
            mapping,
        }
    }

    /// Restore placeholders recorded for `session_id`
    ///
    /// Unknown placeholders stay as they are. A session without a vault
    /// entry returns `text` unchanged.
    pub async fn deanonymize(&self, text: &str, session_id: &str) -> String {
        if !PLACEHOLDER.is_match(text) {
            return text.to_string();
        }

        let mapping = match self.vault.mapping(session_id).await {
            Ok(mapping) => mapping,
            Err(err) => {
                debug!(session_id, error = %err, "nothing to deanonymize");
                return text.to_string();
            }
        };

        PLACEHOLDER
            .replace_all(text, |caps: &Captures| {
                let placeholder = &caps[0];
                mapping.get(placeholder).unwrap_or(placeholder).to_string()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymizer() -> Anonymizer {
        Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new()))
    }

    #[tokio::test]
    async fn test_tagged_ssn_round_trip() {
        let anonymizer = anonymizer();
        let original = "My id is SSN-123-45-6789, remember it";

        let anonymized = anonymizer.anonymize(original, "s1").await;
        assert_eq!(anonymized.text, "My id is <SSN_1>, remember it");
        assert_eq!(anonymized.mapping.get("<SSN_1>"), Some("SSN-123-45-6789"));

        let echoed = "You said your id is <SSN_1>.";
        assert_eq!(
            anonymizer.deanonymize(echoed, "s1").await,
            "You said your id is SSN-123-45-6789."
        );
    }

    #[tokio::test]
    async fn test_repeated_value_reuses_placeholder() {
        let anonymizer = anonymizer();
        let text = "mail a@b.io, again a@b.io, or c@d.io";
        let anonymized = anonymizer.anonymize(text, "s1").await;

        assert_eq!(
            anonymized.text,
            "mail <EMAIL_ADDRESS_1>, again <EMAIL_ADDRESS_1>, or <EMAIL_ADDRESS_2>"
        );
        let later = anonymizer.anonymize("c@d.io", "s1").await;
        assert_eq!(later.text, "<EMAIL_ADDRESS_2>");
    }

    #[tokio::test]
    async fn test_other_session_cannot_restore() {
        let anonymizer = anonymizer();
        anonymizer.anonymize("SSN-123-45-6789", "owner").await;
        anonymizer.anonymize("a@b.io", "intruder").await;

        assert_eq!(anonymizer.deanonymize("<SSN_1>", "intruder").await, "<SSN_1>");
        assert_eq!(
            anonymizer.deanonymize("<SSN_1>", "owner").await,
            "SSN-123-45-6789"
        );
    }

    #[tokio::test]
    async fn test_missing_session_is_noop() {
        let anonymizer = anonymizer();
        assert_eq!(
            anonymizer.deanonymize("hello <SSN_4>", "nobody").await,
            "hello <SSN_4>"
        );
        assert_eq!(anonymizer.vault().session_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_text_creates_no_session() {
        let anonymizer = anonymizer();
        let anonymized = anonymizer.anonymize("What is the capital of France?", "s1").await;
        assert!(!anonymized.is_modified());
        assert_eq!(anonymizer.vault().session_count(), 0);
    }

    #[tokio::test]
    async fn test_typed_placeholder_survives_round_trip() {
        let anonymizer = anonymizer();
        let original = "the form field <SSN_1> holds SSN-123-45-6789";

        let anonymized = anonymizer.anonymize(original, "s1").await;
        assert_eq!(anonymized.text, "the form field <SSN_1> holds <SSN_2>");
        assert_eq!(
            anonymizer.deanonymize(&anonymized.text, "s1").await,
            original
        );
    }
}
