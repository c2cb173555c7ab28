//! Content scanners
//!
//! Each scanner implements one detection concern and reports a raw
//! [`Detection`]. Thresholds, timeouts and fail-safe substitution are
//! applied by [`crate::runner`], so scanners stay free of policy.

use crate::config::{ScannerConfig, ScannerKind};
use crate::error::Result;
use crate::types::{Direction, ScanRequest, Span};
use async_trait::async_trait;
use std::sync::Arc;

pub mod code;
pub mod injection;
pub mod refusal;
pub mod relevance;
pub mod secrets;
pub mod sensitive;
pub mod substrings;
pub mod token_limit;
pub mod topics;
pub mod toxicity;

pub use code::CodeScanner;
pub use injection::PromptInjectionScanner;
pub use refusal::NoRefusalScanner;
pub use relevance::RelevanceScanner;
pub use secrets::SecretsScanner;
pub use sensitive::SensitiveScanner;
pub use substrings::BanSubstringsScanner;
pub use token_limit::TokenLimitScanner;
pub use topics::BanTopicsScanner;
pub use toxicity::ToxicityScanner;

/// Raw finding of a scanner, before its threshold is applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Score in [0, 1]; a risk unless the scanner is inverted
    pub score: f32,
    pub sanitized_text: Option<String>,
    pub reason: Option<String>,
    pub spans: Vec<Span>,
}

impl Detection {
    /// Nothing found
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn with_score(score: f32) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn sanitized(mut self, text: impl Into<String>) -> Self {
        self.sanitized_text = Some(text.into());
        self
    }

    pub fn spans(mut self, spans: Vec<Span>) -> Self {
        self.spans = spans;
        self
    }
}

/// A single-purpose content check
///
/// Implementations must be pure with respect to the request: the same
/// scanner instance is shared by every concurrent pipeline run.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Configured name, used as the key in results
    fn name(&self) -> &str;

    /// Scanner variant
    fn kind(&self) -> ScannerKind;

    /// Directions this scanner may be configured for
    fn directions(&self) -> &'static [Direction] {
        self.kind().directions()
    }

    /// When true, `score` is a similarity: the scan passes when the score
    /// is at or above the threshold and the reported risk is `1 - score`.
    fn inverted(&self) -> bool {
        false
    }

    /// Inspect the request text
    async fn scan(&self, request: &ScanRequest) -> Result<Detection>;
}

/// Resolve a configured scanner to its implementation
pub fn build_scanner(config: &ScannerConfig) -> Result<Arc<dyn Scanner>> {
    let name = config.name.clone();
    let params = &config.params;

    let scanner: Arc<dyn Scanner> = match config.kind()? {
        ScannerKind::PromptInjection => Arc::new(PromptInjectionScanner::new(
            name,
            &params.custom_patterns,
        )?),
        ScannerKind::Toxicity => Arc::new(ToxicityScanner::new(name)),
        ScannerKind::TokenLimit => Arc::new(TokenLimitScanner::new(
            name,
            params.limit.unwrap_or(token_limit::DEFAULT_TOKEN_LIMIT),
        )),
        ScannerKind::BanSubstrings => Arc::new(BanSubstringsScanner::new(
            name,
            &params.substrings,
            params.case_sensitive,
            params.redact,
        )?),
        ScannerKind::BanTopics => Arc::new(BanTopicsScanner::new(name, &params.topics)?),
        ScannerKind::Secrets => Arc::new(SecretsScanner::new(name)),
        ScannerKind::Code => Arc::new(CodeScanner::new(name, &params.languages)?),
        ScannerKind::NoRefusal => {
            Arc::new(NoRefusalScanner::new(name, &params.custom_patterns)?)
        }
        ScannerKind::Relevance => Arc::new(RelevanceScanner::new(name)),
        ScannerKind::Sensitive => Arc::new(SensitiveScanner::new(name)),
    };

    Ok(scanner)
}

/// Initialise every process-wide lexicon and pattern table
pub fn warm_up() {
    crate::pii::warm_up();
    injection::warm_up();
    toxicity::warm_up();
    token_limit::warm_up();
    topics::warm_up();
    secrets::warm_up();
    code::warm_up();
    refusal::warm_up();
    relevance::warm_up();
}

/// Regex matching any of `words` as whole words, case-insensitively
pub(crate) fn word_alternation(words: &[&str]) -> String {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| {
            w.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    format!(r"(?i)\b(?:{})\b", alternatives.join("|"))
}

/// Combine independent hit weights so that the score saturates below 1
pub(crate) fn noisy_or(weights: impl IntoIterator<Item = f32>) -> f32 {
    1.0 - weights
        .into_iter()
        .fold(1.0_f32, |acc, w| acc * (1.0 - w.clamp(0.0, 1.0)))
}
