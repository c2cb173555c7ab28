//! Personal data leaking into generated output

use super::{Detection, Scanner};
use crate::config::{PiiConfig, ScannerKind};
use crate::error::Result;
use crate::pii::PiiDetector;
use crate::types::ScanRequest;
use async_trait::async_trait;

/// Redacts PII irreversibly; unlike the anonymizer nothing is kept in a vault
pub struct SensitiveScanner {
    name: String,
    detector: PiiDetector,
}

impl SensitiveScanner {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, PiiConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: PiiConfig) -> Self {
        Self {
            name: name.into(),
            detector: PiiDetector::new(config),
        }
    }
}

#[async_trait]
impl Scanner for SensitiveScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Sensitive
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let matches = self.detector.detect(&request.text);
        if matches.is_empty() {
            return Ok(Detection::clean());
        }

        let mut labels: Vec<&str> = matches.iter().map(|m| m.entity.label()).collect();
        labels.dedup();

        Ok(Detection::with_score(1.0)
            .reason(format!("sensitive data: {}", labels.join(", ")))
            .sanitized(self.detector.redact(&request.text, &matches))
            .spans(matches.iter().map(|m| m.span()).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Span};

    #[tokio::test]
    async fn test_redacts_email_in_output() {
        let scanner = SensitiveScanner::new("sensitive");
        let request = ScanRequest::new("Write to ann@corp.io today", Direction::Output, "s1");
        let detection = scanner.scan(&request).await.unwrap();

        assert_eq!(detection.score, 1.0);
        assert_eq!(detection.spans, vec![Span::new(9, 20)]);
        assert_eq!(
            detection.sanitized_text.as_deref(),
            Some("Write to [REDACTED:EMAIL_ADDRESS] today")
        );
    }

    #[tokio::test]
    async fn test_placeholders_are_not_sensitive() {
        let scanner = SensitiveScanner::new("sensitive");
        let request = ScanRequest::new("Your number <SSN_1> is on file", Direction::Output, "s1");
        assert_eq!(scanner.scan(&request).await.unwrap(), Detection::clean());
    }
}
