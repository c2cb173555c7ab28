//! Audit logging for scan verdicts
//!
//! Audit records carry every scanner's score and reason. They go to the
//! log and optionally to a JSON-lines file, never to the chat client.

use crate::config::AuditConfig;
use crate::types::{AggregateVerdict, AuditEntry, Decision, Direction, RequestContext};

use std::collections::hash_map::DefaultHasher;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Mutex;
use tracing::{info, warn};

/// Audit logger
#[derive(Debug)]
pub struct AuditLogger {
    config: AuditConfig,
    file_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            file_lock: Mutex::new(()),
        }
    }

    /// Record the verdict of one scan direction
    pub fn log(
        &self,
        context: &RequestContext,
        direction: Direction,
        content: &str,
        verdict: &AggregateVerdict,
        duration_ms: u64,
    ) {
        if !self.config.enabled {
            return;
        }

        let entry = AuditEntry {
            context: context.clone(),
            direction,
            content_hash: hash_content(content),
            decision: verdict.decision,
            results: verdict.results_by_scanner.values().cloned().collect(),
            processing_time_ms: duration_ms,
        };

        self.emit(&entry, content);
    }

    fn emit(&self, entry: &AuditEntry, content: &str) {
        let content_field = self
            .config
            .log_content
            .then(|| truncate(content, 500));
        let failed: Vec<&str> = entry
            .results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.scanner_name.as_str())
            .collect();

        if entry.decision == Decision::Block {
            warn!(
                request_id = %entry.context.request_id,
                session_id = %entry.context.session_id,
                direction = %entry.direction,
                failed = ?failed,
                content_hash = %entry.content_hash,
                processing_time_ms = entry.processing_time_ms,
                content = ?content_field,
                "scan blocked"
            );
        } else {
            info!(
                request_id = %entry.context.request_id,
                session_id = %entry.context.session_id,
                direction = %entry.direction,
                decision = ?entry.decision,
                failed = ?failed,
                content_hash = %entry.content_hash,
                processing_time_ms = entry.processing_time_ms,
                content = ?content_field,
                "scan audit"
            );
        }

        if let Some(ref path) = self.config.log_file {
            let line = match serde_json::to_string(entry) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "failed to serialize audit entry");
                    return;
                }
            };

            // Serialize appends so concurrent requests never interleave lines
            let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
            let written = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| writeln!(f, "{line}"));
            if let Err(err) = written {
                warn!(path = %path, error = %err, "failed to write audit file");
            }
        }
    }
}

/// Hash content for audit (privacy-preserving)
fn hash_content(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Truncate on a char boundary at or below `max_len` bytes
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
