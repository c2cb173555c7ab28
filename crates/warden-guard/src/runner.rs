//! Guarded scanner execution
//!
//! Every scanner call goes through [`GuardedScanner::run`], which bounds it
//! with a timeout, retries a timed-out call once with a shorter budget, and
//! turns errors and panics into the fail-safe [`ScanResult`]. A
//! [`ScannerSet`] fans one request out to all scanners of a direction and
//! waits for every result before returning.

use crate::config::{PipelineConfig, WardenConfig};
use crate::error::{Result, WardenError};
use crate::policy::TaggedResult;
use crate::scanners::{self, build_scanner, Detection, Scanner};
use crate::types::{Direction, FailAction, ScanRequest, ScanResult};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Time budgets for scanner attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimeouts {
    pub first: Duration,
    pub retry: Duration,
}

impl ScanTimeouts {
    pub fn new(first: Duration, retry: Duration) -> Self {
        Self { first, retry }
    }
}

impl From<&PipelineConfig> for ScanTimeouts {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.scanner_timeout_ms),
            Duration::from_millis(config.retry_timeout_ms),
        )
    }
}

/// A scanner bound to its threshold and fail action
#[derive(Clone)]
pub struct GuardedScanner {
    scanner: Arc<dyn Scanner>,
    threshold: f32,
    fail_action: FailAction,
}

impl std::fmt::Debug for GuardedScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedScanner")
            .field("name", &self.scanner.name())
            .field("kind", &self.scanner.kind())
            .field("threshold", &self.threshold)
            .field("fail_action", &self.fail_action)
            .finish()
    }
}

impl GuardedScanner {
    pub fn new(scanner: Arc<dyn Scanner>, threshold: f32, fail_action: FailAction) -> Self {
        Self {
            scanner,
            threshold,
            fail_action,
        }
    }

    pub fn name(&self) -> &str {
        self.scanner.name()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn fail_action(&self) -> FailAction {
        self.fail_action
    }

    /// Apply the threshold to a raw detection
    ///
    /// A failing detection without its own reason gets one naming the
    /// configured threshold.
    pub fn verdict(&self, detection: Detection) -> ScanResult {
        let score = detection.score.clamp(0.0, 1.0);
        let inverted = self.scanner.inverted();
        let (passed, risk_score) = if inverted {
            (score >= self.threshold, 1.0 - score)
        } else {
            (score <= self.threshold, score)
        };

        let reason = match detection.reason {
            None if !passed => Some(format!(
                "score {:.2} {} threshold {:.2}",
                score,
                if inverted { "below" } else { "above" },
                self.threshold
            )),
            reason => reason,
        };

        ScanResult {
            scanner_name: self.name().to_string(),
            passed,
            risk_score,
            sanitized_text: detection.sanitized_text,
            reason,
            spans: detection.spans,
        }
    }

    /// Run the scanner; never fails and never exceeds `first + retry`
    pub async fn run(&self, request: &ScanRequest, timeouts: ScanTimeouts) -> ScanResult {
        let outcome = match self.attempt(request, timeouts.first).await {
            Err(err @ WardenError::ScannerTimeout { .. }) => {
                debug!(scanner = self.name(), error = %err, "retrying scanner");
                self.attempt(request, timeouts.retry).await
            }
            other => other,
        };

        match outcome {
            Ok(detection) => {
                let result = self.verdict(detection);
                debug!(
                    scanner = %result.scanner_name,
                    passed = result.passed,
                    risk_score = result.risk_score,
                    "scanner finished"
                );
                result
            }
            Err(err) => {
                warn!(
                    scanner = self.name(),
                    direction = %request.direction,
                    error = %err,
                    "scanner failed, substituting fail-safe result"
                );
                ScanResult::fail_safe(self.name())
            }
        }
    }

    async fn attempt(&self, request: &ScanRequest, budget: Duration) -> Result<Detection> {
        let scan = AssertUnwindSafe(self.scanner.scan(request)).catch_unwind();

        match tokio::time::timeout(budget, scan).await {
            Err(_) => Err(WardenError::ScannerTimeout {
                scanner: self.name().to_string(),
                timeout_ms: budget.as_millis() as u64,
            }),
            Ok(Err(panic)) => Err(WardenError::ScannerCrash {
                scanner: self.name().to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(Err(err @ WardenError::ScannerCrash { .. }))) => Err(err),
            Ok(Ok(Err(err))) => Err(WardenError::ScannerCrash {
                scanner: self.name().to_string(),
                message: err.to_string(),
            }),
            Ok(Ok(Ok(detection))) => Ok(detection),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// The ordered scanners of one direction
#[derive(Debug, Clone, Default)]
pub struct ScannerSet {
    scanners: Vec<GuardedScanner>,
}

impl ScannerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scanner: GuardedScanner) {
        self.scanners.push(scanner);
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scanners.iter().map(|s| s.name()).collect()
    }

    /// Run every scanner against `request` concurrently
    ///
    /// Results come back in configured order. Dropping the returned future
    /// cancels every scanner still running.
    pub async fn scan(&self, request: &ScanRequest, timeouts: ScanTimeouts) -> Vec<TaggedResult> {
        let runs = self.scanners.iter().map(|scanner| async move {
            TaggedResult {
                fail_action: scanner.fail_action(),
                result: scanner.run(request, timeouts).await,
            }
        });
        join_all(runs).await
    }
}

/// Scanners resolved from configuration, one set per direction
#[derive(Debug, Clone)]
pub struct ScannerRegistry {
    input: ScannerSet,
    output: ScannerSet,
    timeouts: ScanTimeouts,
}

impl ScannerRegistry {
    /// Validate `config` and build every enabled scanner
    pub fn from_config(config: &WardenConfig) -> Result<Self> {
        config.validate()?;

        let build = |direction: Direction| -> Result<ScannerSet> {
            let mut set = ScannerSet::new();
            for scanner_config in config.scanners(direction) {
                if !scanner_config.enabled {
                    debug!(scanner = %scanner_config.name, %direction, "scanner disabled");
                    continue;
                }
                let scanner = build_scanner(scanner_config)?;
                set.push(GuardedScanner::new(
                    scanner,
                    scanner_config.threshold,
                    scanner_config.fail_action,
                ));
            }
            Ok(set)
        };

        Ok(Self {
            input: build(Direction::Input)?,
            output: build(Direction::Output)?,
            timeouts: ScanTimeouts::from(&config.pipeline),
        })
    }

    /// Assemble a registry from prebuilt sets
    pub fn from_sets(input: ScannerSet, output: ScannerSet, timeouts: ScanTimeouts) -> Self {
        Self {
            input,
            output,
            timeouts,
        }
    }

    /// Initialise the shared detector tables before serving traffic
    pub fn warm_up() {
        scanners::warm_up();
    }

    pub fn set(&self, direction: Direction) -> &ScannerSet {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn timeouts(&self) -> ScanTimeouts {
        self.timeouts
    }

    pub async fn scan(&self, request: &ScanRequest) -> Vec<TaggedResult> {
        self.set(request.direction).scan(request, self.timeouts).await
    }
}
