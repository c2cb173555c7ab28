//! Input length guard

use super::{Detection, Scanner};
use crate::config::ScannerKind;
use crate::error::Result;
use crate::types::{ScanRequest, Span};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_TOKEN_LIMIT: usize = 2048;

// Word runs and individual punctuation marks each count as one token.
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|[^\w\s]").unwrap());

pub(crate) fn warm_up() {
    Lazy::force(&TOKEN);
}

/// Number of tokens in `text`
pub fn count_tokens(text: &str) -> usize {
    TOKEN.find_iter(text).count()
}

/// Rejects inputs longer than `limit` tokens; offers the truncated prefix
/// as the sanitized text.
pub struct TokenLimitScanner {
    name: String,
    limit: usize,
}

impl TokenLimitScanner {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit,
        }
    }
}

#[async_trait]
impl Scanner for TokenLimitScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::TokenLimit
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Detection> {
        let text = &request.text;
        // The (limit + 1)-th token marks where the overflow starts
        let Some(overflow) = TOKEN.find_iter(text).nth(self.limit) else {
            return Ok(Detection::clean());
        };

        let cut = text[..overflow.start()].trim_end().len();
        Ok(Detection::with_score(1.0)
            .reason(format!("input exceeds {} tokens", self.limit))
            .sanitized(&text[..cut])
            .spans(vec![Span::new(cut, text.len())]))
    }
}
