//! Per-request orchestration
//!
//! ```text
//! Idle -> ScanningInput -> Blocked
//!                       -> SanitizingInput -> Generating
//!                       -> ClearedInput    -> Generating
//! Generating -> Error
//!            -> ScanningOutput -> Blocked
//!                              -> SanitizingOutput -> Done
//!                              -> Done
//! ```
//!
//! A blocked input never reaches the generator, and a blocked output is
//! never returned.

use crate::anonymize::Anonymizer;
use crate::audit::AuditLogger;
use crate::config::{GenerationParams, PipelineConfig, WardenConfig};
use crate::error::{Result, WardenError};
use crate::generator::Generator;
use crate::policy::{ScanPolicy, TaggedResult};
use crate::runner::ScannerRegistry;
use crate::types::{
    AggregateVerdict, ChatOutcome, ChatRequest, Decision, Direction, FailAction, PipelineState,
    RequestContext, ScanRequest, ScannerReport, PROMPT_METADATA_KEY,
};
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Everything a request needs from configuration, swapped as a unit
struct Snapshot {
    registry: ScannerRegistry,
    policy: ScanPolicy,
    anonymizer: Option<Anonymizer>,
    audit: AuditLogger,
    generation: GenerationParams,
    pipeline: PipelineConfig,
}

impl Snapshot {
    fn build(config: &WardenConfig, registry: ScannerRegistry, vault: &Arc<Vault>) -> Self {
        Self {
            registry,
            policy: ScanPolicy::new(&config.pipeline),
            anonymizer: config
                .anonymize
                .enabled
                .then(|| Anonymizer::new(config.anonymize.entities.clone(), Arc::clone(vault))),
            audit: AuditLogger::new(config.audit.clone()),
            generation: config.generation.clone(),
            pipeline: config.pipeline.clone(),
        }
    }
}

/// Readiness of the pipeline and its generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub input_scanners: usize,
    pub output_scanners: usize,
    pub generator_ready: bool,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.generator_ready
    }
}

/// State trace of one run
struct Trace {
    session_id: String,
    states: Vec<PipelineState>,
}

impl Trace {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            states: vec![PipelineState::Idle],
        }
    }

    fn enter(&mut self, state: PipelineState) {
        debug!(session_id = %self.session_id, ?state, "pipeline transition");
        self.states.push(state);
    }
}

/// Mediates every chat turn between the user and the generator
pub struct Pipeline {
    snapshot: RwLock<Arc<Snapshot>>,
    generator: Arc<dyn Generator>,
    vault: Arc<Vault>,
}

impl Pipeline {
    /// Build every configured scanner and wrap `generator`
    pub fn new(config: WardenConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        let registry = ScannerRegistry::from_config(&config)?;
        Ok(Self::with_registry(config, registry, generator))
    }

    /// Use a prebuilt registry, e.g. with scanners not resolvable by name
    pub fn with_registry(
        config: WardenConfig,
        registry: ScannerRegistry,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let vault = Arc::new(Vault::with_limits(
            Duration::from_secs(config.anonymize.session_ttl_secs),
            config.anonymize.max_sessions,
        ));
        let snapshot = Snapshot::build(&config, registry, &vault);
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            generator,
            vault,
        }
    }

    /// Replace the whole configuration
    ///
    /// The new scanner set is built before anything is swapped, so a bad
    /// config leaves the running one untouched. Requests already in flight
    /// finish on the configuration they started with. Vault contents
    /// survive a reload.
    pub async fn reload(&self, config: WardenConfig) -> Result<()> {
        let registry = ScannerRegistry::from_config(&config)?;
        let snapshot = Arc::new(Snapshot::build(&config, registry, &self.vault));
        *self.snapshot.write().await = snapshot;
        info!(
            input_scanners = config.input_scanners.len(),
            output_scanners = config.output_scanners.len(),
            "pipeline configuration reloaded"
        );
        Ok(())
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Scanner counts and generator readiness; no side effects
    pub async fn health(&self) -> HealthReport {
        let snapshot = self.current().await;
        HealthReport {
            input_scanners: snapshot.registry.set(Direction::Input).len(),
            output_scanners: snapshot.registry.set(Direction::Output).len(),
            generator_ready: self.generator.is_ready().await,
        }
    }

    async fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Run one chat turn under the configured request deadline
    ///
    /// Dropping the returned future cancels in-flight scanners and the
    /// generator call. Placeholders already written to the vault are kept.
    pub async fn process(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let snapshot = self.current().await;
        let deadline = Duration::from_millis(snapshot.pipeline.request_timeout_ms);

        match tokio::time::timeout(deadline, self.run(&snapshot, request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(timeout_ms = snapshot.pipeline.request_timeout_ms, "request timed out");
                Err(WardenError::RequestTimeout(snapshot.pipeline.request_timeout_ms))
            }
        }
    }

    async fn run(&self, snapshot: &Snapshot, request: ChatRequest) -> Result<ChatOutcome> {
        let mut trace = Trace::new(&request.session_id);
        let mut report = ScannerReport::default();

        if request.message.trim().is_empty() {
            trace.enter(PipelineState::Done);
            return Ok(ChatOutcome {
                text: snapshot.pipeline.empty_message_reply.clone(),
                was_blocked: false,
                was_sanitized: false,
                report,
                states: trace.states,
            });
        }

        let context = RequestContext::new(&request.session_id);
        let session_id = request.session_id.as_str();

        trace.enter(PipelineState::ScanningInput);
        let input = ScanRequest::new(request.message.clone(), Direction::Input, session_id);
        let verdict = self.scan(snapshot, &context, &input).await;

        let mut was_sanitized = false;
        let prompt = match verdict.decision {
            Decision::Block => {
                trace.enter(PipelineState::Blocked);
                let text = verdict.final_text.clone();
                report.input = Some(verdict);
                return Ok(ChatOutcome {
                    text,
                    was_blocked: true,
                    was_sanitized: false,
                    report,
                    states: trace.states,
                });
            }
            Decision::Sanitize => {
                trace.enter(PipelineState::SanitizingInput);
                was_sanitized = true;
                verdict.final_text.clone()
            }
            Decision::Allow => {
                trace.enter(PipelineState::ClearedInput);
                request.message.clone()
            }
        };
        report.input = Some(verdict);

        let prompt = match &snapshot.anonymizer {
            Some(anonymizer) => anonymizer.anonymize(&prompt, session_id).await.text,
            None => prompt,
        };

        trace.enter(PipelineState::Generating);
        let generated = match self.generator.generate(&prompt, &snapshot.generation).await {
            Ok(text) => text,
            Err(err) => {
                trace.enter(PipelineState::Error);
                error!(
                    request_id = %context.request_id,
                    session_id,
                    error = %err,
                    "generation failed"
                );
                return Err(match err {
                    WardenError::GenerationFailure(_) => err,
                    other => WardenError::GenerationFailure(other.to_string()),
                });
            }
        };

        trace.enter(PipelineState::ScanningOutput);
        let output = ScanRequest::new(generated.clone(), Direction::Output, session_id)
            .with_metadata(PROMPT_METADATA_KEY, prompt);
        let verdict = self.scan(snapshot, &context, &output).await;

        let (text, was_blocked) = match verdict.decision {
            Decision::Block => {
                trace.enter(PipelineState::Blocked);
                (verdict.final_text.clone(), true)
            }
            Decision::Sanitize => {
                trace.enter(PipelineState::SanitizingOutput);
                was_sanitized = true;
                (verdict.final_text.clone(), false)
            }
            Decision::Allow => (generated, false),
        };
        report.output = Some(verdict);

        let text = match (&snapshot.anonymizer, was_blocked) {
            (Some(anonymizer), false) => anonymizer.deanonymize(&text, session_id).await,
            _ => text,
        };
        if !was_blocked {
            trace.enter(PipelineState::Done);
        }

        Ok(ChatOutcome {
            text,
            was_blocked,
            was_sanitized,
            report,
            states: trace.states,
        })
    }

    /// Scan one direction, apply the policy and record the audit entry
    async fn scan(
        &self,
        snapshot: &Snapshot,
        context: &RequestContext,
        request: &ScanRequest,
    ) -> AggregateVerdict {
        let started = Instant::now();
        let results: Vec<TaggedResult> = snapshot.registry.scan(request).await;

        for tagged in results
            .iter()
            .filter(|r| !r.result.passed && r.fail_action == FailAction::Warn)
        {
            warn!(
                request_id = %context.request_id,
                direction = %request.direction,
                scanner = %tagged.result.scanner_name,
                risk_score = tagged.result.risk_score,
                reason = ?tagged.result.reason,
                "scanner flagged content"
            );
        }

        let verdict = snapshot
            .policy
            .evaluate(&request.text, &results, request.direction);
        snapshot.audit.log(
            context,
            request.direction,
            &request.text,
            &verdict,
            started.elapsed().as_millis() as u64,
        );
        verdict
    }
}
