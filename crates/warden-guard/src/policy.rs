//! Verdict aggregation
//!
//! Pure: the same results always yield the same verdict, and nothing here
//! logs or touches shared state.

use crate::config::PipelineConfig;
use crate::pii::replace_spans;
use crate::types::{AggregateVerdict, Decision, Direction, FailAction, ScanResult, Span};
use std::collections::BTreeMap;

/// Marker substituted for offending spans when no scanner offers a rewrite
pub const SPAN_REDACTION: &str = "[REDACTED]";

/// A scanner result paired with the fail action of the scanner that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub fail_action: FailAction,
    pub result: ScanResult,
}

impl TaggedResult {
    pub fn new(fail_action: FailAction, result: ScanResult) -> Self {
        Self {
            fail_action,
            result,
        }
    }

    fn failed_with(&self, action: FailAction) -> bool {
        !self.result.passed && self.fail_action == action
    }
}

/// Combines per-scanner results into one decision
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    input_refusal: String,
    output_refusal: String,
    sanitize_fallback: String,
}

impl ScanPolicy {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            input_refusal: config.input_refusal.clone(),
            output_refusal: config.output_refusal.clone(),
            sanitize_fallback: config.sanitize_fallback.clone(),
        }
    }

    /// Fixed refusal returned when `direction` is blocked
    pub fn refusal(&self, direction: Direction) -> &str {
        match direction {
            Direction::Input => &self.input_refusal,
            Direction::Output => &self.output_refusal,
        }
    }

    /// Decide what happens to `text` given the results of every scanner
    ///
    /// Any failing Block scanner blocks. Otherwise any failing Sanitize
    /// scanner sanitizes: the highest-risk rewrite wins (first in order on
    /// ties), then span redaction, then the generic fallback. Warn
    /// failures never change the decision.
    pub fn evaluate(
        &self,
        text: &str,
        results: &[TaggedResult],
        direction: Direction,
    ) -> AggregateVerdict {
        let results_by_scanner: BTreeMap<String, ScanResult> = results
            .iter()
            .map(|r| (r.result.scanner_name.clone(), r.result.clone()))
            .collect();

        if results.iter().any(|r| r.failed_with(FailAction::Block)) {
            return AggregateVerdict {
                decision: Decision::Block,
                results_by_scanner,
                final_text: self.refusal(direction).to_string(),
            };
        }

        let sanitizers: Vec<&ScanResult> = results
            .iter()
            .filter(|r| r.failed_with(FailAction::Sanitize))
            .map(|r| &r.result)
            .collect();

        if sanitizers.is_empty() {
            return AggregateVerdict {
                decision: Decision::Allow,
                results_by_scanner,
                final_text: text.to_string(),
            };
        }

        AggregateVerdict {
            decision: Decision::Sanitize,
            results_by_scanner,
            final_text: self.sanitize(text, &sanitizers),
        }
    }

    fn sanitize(&self, text: &str, sanitizers: &[&ScanResult]) -> String {
        let mut best: Option<(f32, &str)> = None;
        for result in sanitizers {
            if let Some(rewrite) = result.sanitized_text.as_deref() {
                if best.map_or(true, |(risk, _)| result.risk_score > risk) {
                    best = Some((result.risk_score, rewrite));
                }
            }
        }
        if let Some((_, rewrite)) = best {
            return rewrite.to_string();
        }

        let spans = merge_spans(text, sanitizers.iter().flat_map(|r| r.spans.iter().copied()));
        if spans.is_empty() {
            return self.sanitize_fallback.clone();
        }

        replace_spans(
            text,
            spans.into_iter().map(|span| (span, SPAN_REDACTION.to_string())),
        )
    }
}

/// Sort and coalesce spans, dropping any that do not fit `text`
fn merge_spans(text: &str, spans: impl Iterator<Item = Span>) -> Vec<Span> {
    let mut spans: Vec<Span> = spans
        .filter(|s| {
            s.start < s.end
                && s.end <= text.len()
                && text.is_char_boundary(s.start)
                && text.is_char_boundary(s.end)
        })
        .collect();
    spans.sort();

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}
