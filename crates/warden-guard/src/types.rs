//! Core types for Warden Guard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Reason attached to every fail-safe result
pub const SCANNER_ERROR_REASON: &str = "scanner_error";

/// Metadata key carrying the prompt that produced an output
pub const PROMPT_METADATA_KEY: &str = "prompt";

/// Direction of content flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Input to LLM
    Input,
    /// Output from LLM
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Text submitted to a scanner set
///
/// Shared by reference across every scanner of one direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub text: String,
    pub direction: Direction,
    pub session_id: String,
    pub metadata: HashMap<String, String>,
}

impl ScanRequest {
    pub fn new(text: impl Into<String>, direction: Direction, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            direction,
            session_id: session_id.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Prompt that produced this text (output direction only)
    pub fn prompt(&self) -> Option<&str> {
        self.metadata.get(PROMPT_METADATA_KEY).map(String::as_str)
    }
}

/// Byte range of offending text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Verdict of a single scanner for a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scanner_name: String,
    pub passed: bool,
    /// Risk score in [0, 1]
    pub risk_score: f32,
    pub sanitized_text: Option<String>,
    pub reason: Option<String>,
    /// Offending spans, empty when unknown
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl ScanResult {
    /// Result substituted when a scanner cannot complete
    pub fn fail_safe(scanner_name: impl Into<String>) -> Self {
        Self {
            scanner_name: scanner_name.into(),
            passed: false,
            risk_score: 1.0,
            sanitized_text: None,
            reason: Some(SCANNER_ERROR_REASON.to_string()),
            spans: vec![],
        }
    }

    /// Whether this result is a fail-safe substitute
    pub fn is_fail_safe(&self) -> bool {
        self.reason.as_deref() == Some(SCANNER_ERROR_REASON)
    }
}

/// What to do when a scanner fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailAction {
    Block,
    Sanitize,
    Warn,
}

/// Aggregate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
    Sanitize,
}

/// Combined verdict of all scanners for one direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateVerdict {
    pub decision: Decision,
    pub results_by_scanner: BTreeMap<String, ScanResult>,
    pub final_text: String,
}

impl AggregateVerdict {
    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }

    pub fn is_sanitized(&self) -> bool {
        self.decision == Decision::Sanitize
    }

    /// Names of scanners that did not pass
    pub fn failed_scanners(&self) -> Vec<&str> {
        self.results_by_scanner
            .values()
            .filter(|r| !r.passed)
            .map(|r| r.scanner_name.as_str())
            .collect()
    }
}

/// States of the per-request orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ScanningInput,
    Blocked,
    SanitizingInput,
    ClearedInput,
    Generating,
    ScanningOutput,
    SanitizingOutput,
    Done,
    Error,
}

/// A chat turn submitted to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
        }
    }
}

/// Per-direction verdicts of one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerReport {
    pub input: Option<AggregateVerdict>,
    pub output: Option<AggregateVerdict>,
}

/// Final mediated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub text: String,
    pub was_blocked: bool,
    pub was_sanitized: bool,
    pub report: ScannerReport,
    /// State-machine trace, in visiting order
    pub states: Vec<PipelineState>,
}

impl ChatOutcome {
    /// Whether the generator was invoked during this run
    pub fn reached_generation(&self) -> bool {
        self.states.contains(&PipelineState::Generating)
    }
}

/// Request context for audit records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request ID
    pub request_id: Uuid,
    /// Session identifier
    pub session_id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    /// Create a new context with a fresh request ID
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Request context
    pub context: RequestContext,
    /// Direction (input/output)
    pub direction: Direction,
    /// Original content hash
    pub content_hash: String,
    /// Aggregate decision
    pub decision: Decision,
    /// Every scanner result, including thresholds-relevant scores
    pub results: Vec<ScanResult>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}
