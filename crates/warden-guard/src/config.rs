//! Configuration for Warden Guard
//!
//! Loaded once at startup from TOML. A reload builds a complete new
//! [`WardenConfig`] and swaps it in; nothing is patched in place.

use crate::error::{Result, WardenError};
use crate::types::{Direction, FailAction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Main configuration for Warden
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Orchestrator settings
    pub pipeline: PipelineConfig,
    /// Sampling parameters passed to the generator
    pub generation: GenerationParams,
    /// Anonymization settings
    pub anonymize: AnonymizeConfig,
    /// Audit configuration
    pub audit: AuditConfig,
    /// Rate limiting configuration (enforced by the HTTP front-end)
    pub rate_limit: RateLimitConfig,
    /// Ordered input scanner set; empty when the file omits it
    #[serde(default)]
    pub input_scanners: Vec<ScannerConfig>,
    /// Ordered output scanner set; empty when the file omits it
    #[serde(default)]
    pub output_scanners: Vec<ScannerConfig>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        let blocked_terms = vec![
            "password".to_string(),
            "admin".to_string(),
            "root".to_string(),
            "sudo".to_string(),
        ];

        Self {
            pipeline: PipelineConfig::default(),
            generation: GenerationParams::default(),
            anonymize: AnonymizeConfig::default(),
            audit: AuditConfig::default(),
            rate_limit: RateLimitConfig::default(),
            input_scanners: vec![
                ScannerConfig::new("prompt_injection", 0.5, FailAction::Block),
                ScannerConfig::new("token_limit", 0.5, FailAction::Block).with_params(
                    ScannerParams {
                        limit: Some(2048),
                        ..Default::default()
                    },
                ),
                ScannerConfig::new("toxicity", 0.5, FailAction::Block),
                ScannerConfig::new("ban_substrings", 0.5, FailAction::Warn).with_params(
                    ScannerParams {
                        substrings: blocked_terms.clone(),
                        ..Default::default()
                    },
                ),
                ScannerConfig::new("ban_topics", 0.8, FailAction::Block).with_params(
                    ScannerParams {
                        topics: vec!["violence".to_string(), "illegal_activities".to_string()],
                        ..Default::default()
                    },
                ),
                ScannerConfig::new("secrets", 0.5, FailAction::Sanitize),
            ],
            output_scanners: vec![
                ScannerConfig::new("no_refusal", 0.5, FailAction::Warn),
                ScannerConfig::new("relevance", 0.5, FailAction::Warn),
                ScannerConfig::new("sensitive", 0.5, FailAction::Sanitize),
                ScannerConfig::new("code", 0.5, FailAction::Warn).with_params(ScannerParams {
                    languages: vec![
                        "python".to_string(),
                        "javascript".to_string(),
                        "php".to_string(),
                    ],
                    ..Default::default()
                }),
                ScannerConfig::new("ban_substrings", 0.5, FailAction::Warn).with_params(
                    ScannerParams {
                        substrings: blocked_terms,
                        ..Default::default()
                    },
                ),
            ],
        }
    }
}

impl WardenConfig {
    /// Load and validate config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate config from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// A config with no scanners at all
    pub fn empty() -> Self {
        Self {
            input_scanners: vec![],
            output_scanners: vec![],
            ..Default::default()
        }
    }

    /// Scanner set for one direction
    pub fn scanners(&self, direction: Direction) -> &[ScannerConfig] {
        match direction {
            Direction::Input => &self.input_scanners,
            Direction::Output => &self.output_scanners,
        }
    }

    /// Check thresholds, names and scanner placement
    pub fn validate(&self) -> Result<()> {
        for direction in [Direction::Input, Direction::Output] {
            let mut seen = HashSet::new();
            for scanner in self.scanners(direction) {
                if !(0.0..=1.0).contains(&scanner.threshold) {
                    return Err(WardenError::ConfigError(format!(
                        "threshold for '{}' must be within [0, 1], got {}",
                        scanner.name, scanner.threshold
                    )));
                }
                if !seen.insert(scanner.name.as_str()) {
                    return Err(WardenError::ConfigError(format!(
                        "duplicate {} scanner name '{}'",
                        direction, scanner.name
                    )));
                }
                let kind = scanner.kind()?;
                if !kind.directions().contains(&direction) {
                    return Err(WardenError::ConfigError(format!(
                        "scanner '{}' cannot run on {}",
                        scanner.name, direction
                    )));
                }
                scanner.params.validate(&scanner.name)?;
            }
        }

        if self.pipeline.retry_timeout_ms > self.pipeline.scanner_timeout_ms {
            return Err(WardenError::ConfigError(
                "retry_timeout_ms must not exceed scanner_timeout_ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time budget for a single scanner attempt
    pub scanner_timeout_ms: u64,
    /// Shortened budget for the single retry after a timeout
    pub retry_timeout_ms: u64,
    /// Deadline for a whole chat turn
    pub request_timeout_ms: u64,
    /// Returned when input is blocked
    pub input_refusal: String,
    /// Returned in place of blocked model output
    pub output_refusal: String,
    /// Returned when sanitization has nothing safe to offer
    pub sanitize_fallback: String,
    /// Returned for empty messages
    pub empty_message_reply: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scanner_timeout_ms: 2_000,
            retry_timeout_ms: 1_000,
            request_timeout_ms: 120_000,
            input_refusal: "Input blocked for security reasons.".to_string(),
            output_refusal: "Response blocked for security reasons.".to_string(),
            sanitize_fallback: "I'm unable to share that content.".to_string(),
            empty_message_reply: "Please provide a message.".to_string(),
        }
    }
}

/// Sampling parameters for the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 20,
            repeat_penalty: 1.05,
        }
    }
}

/// Scanner variants resolvable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerKind {
    PromptInjection,
    Toxicity,
    TokenLimit,
    BanSubstrings,
    BanTopics,
    Secrets,
    Code,
    NoRefusal,
    Relevance,
    Sensitive,
}

impl ScannerKind {
    /// Directions this scanner can be placed in
    pub fn directions(&self) -> &'static [Direction] {
        match self {
            ScannerKind::PromptInjection | ScannerKind::TokenLimit => &[Direction::Input],
            ScannerKind::NoRefusal | ScannerKind::Relevance | ScannerKind::Sensitive => {
                &[Direction::Output]
            }
            ScannerKind::Toxicity
            | ScannerKind::BanSubstrings
            | ScannerKind::BanTopics
            | ScannerKind::Secrets
            | ScannerKind::Code => &[Direction::Input, Direction::Output],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerKind::PromptInjection => "prompt_injection",
            ScannerKind::Toxicity => "toxicity",
            ScannerKind::TokenLimit => "token_limit",
            ScannerKind::BanSubstrings => "ban_substrings",
            ScannerKind::BanTopics => "ban_topics",
            ScannerKind::Secrets => "secrets",
            ScannerKind::Code => "code",
            ScannerKind::NoRefusal => "no_refusal",
            ScannerKind::Relevance => "relevance",
            ScannerKind::Sensitive => "sensitive",
        }
    }
}

impl std::str::FromStr for ScannerKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "prompt_injection" | "injection" => Ok(ScannerKind::PromptInjection),
            "toxicity" => Ok(ScannerKind::Toxicity),
            "token_limit" => Ok(ScannerKind::TokenLimit),
            "ban_substrings" => Ok(ScannerKind::BanSubstrings),
            "ban_topics" => Ok(ScannerKind::BanTopics),
            "secrets" => Ok(ScannerKind::Secrets),
            "code" => Ok(ScannerKind::Code),
            "no_refusal" => Ok(ScannerKind::NoRefusal),
            "relevance" => Ok(ScannerKind::Relevance),
            "sensitive" => Ok(ScannerKind::Sensitive),
            _ => Err(WardenError::UnknownScanner(s.to_string())),
        }
    }
}

impl std::fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Unique name within a direction, reported in results
    pub name: String,
    /// Scanner variant; inferred from `name` when absent
    #[serde(default)]
    pub kind: Option<ScannerKind>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub threshold: f32,
    pub fail_action: FailAction,
    /// Scanner-specific parameters
    #[serde(default)]
    pub params: ScannerParams,
}

fn default_enabled() -> bool {
    true
}

impl ScannerConfig {
    pub fn new(name: impl Into<String>, threshold: f32, fail_action: FailAction) -> Self {
        Self {
            name: name.into(),
            kind: None,
            enabled: true,
            threshold,
            fail_action,
            params: ScannerParams::default(),
        }
    }

    /// Set an explicit kind, allowing several scanners of one kind
    pub fn with_kind(mut self, kind: ScannerKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_params(mut self, params: ScannerParams) -> Self {
        self.params = params;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Resolve the scanner variant
    pub fn kind(&self) -> Result<ScannerKind> {
        match self.kind {
            Some(kind) => Ok(kind),
            None => self.name.parse(),
        }
    }
}

/// Scanner-specific parameters; each scanner reads only its own fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerParams {
    /// Token limit (`token_limit`)
    pub limit: Option<usize>,
    /// Banned substrings (`ban_substrings`)
    pub substrings: Vec<String>,
    /// Case-sensitive matching (`ban_substrings`)
    pub case_sensitive: bool,
    /// Replace hits instead of only flagging them (`ban_substrings`)
    pub redact: bool,
    /// Topics to ban (`ban_topics`)
    pub topics: Vec<String>,
    /// Languages to detect (`code`)
    pub languages: Vec<String>,
    /// Extra phrases (`prompt_injection`, `no_refusal`)
    pub custom_patterns: Vec<String>,
}

impl ScannerParams {
    /// Blank entries would compile to patterns matching every text
    fn validate(&self, scanner: &str) -> Result<()> {
        let lists = [
            ("substrings", &self.substrings),
            ("topics", &self.topics),
            ("languages", &self.languages),
            ("custom_patterns", &self.custom_patterns),
        ];
        for (field, entries) in lists {
            if entries.iter().any(|entry| entry.trim().is_empty()) {
                return Err(WardenError::ConfigError(format!(
                    "scanner '{scanner}' has an empty entry in {field}"
                )));
            }
        }
        Ok(())
    }
}

/// Anonymization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizeConfig {
    /// Rewrite sensitive spans before generation
    pub enabled: bool,
    /// Entities the detection sub-scanner looks for
    pub entities: PiiConfig,
    /// Idle seconds before a session's placeholders are forgotten
    pub session_ttl_secs: u64,
    /// Sessions held before the least recently used is dropped
    pub max_sessions: usize,
}

impl Default for AnonymizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entities: PiiConfig::default(),
            session_ttl_secs: 3600,
            max_sessions: 10_000,
        }
    }
}

/// PII detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    /// Detect SSNs
    pub detect_ssn: bool,
    /// Detect credit cards
    pub detect_credit_card: bool,
    /// Detect emails
    pub detect_email: bool,
    /// Detect phone numbers
    pub detect_phone: bool,
    /// Detect IP addresses
    pub detect_ip: bool,
    /// Detect API keys/secrets
    pub detect_api_keys: bool,
    /// Redaction placeholder format (use {TYPE} for type name)
    pub redaction_format: String,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            detect_ssn: true,
            detect_credit_card: true,
            detect_email: true,
            detect_phone: true,
            detect_ip: true,
            detect_api_keys: true,
            redaction_format: "[REDACTED:{TYPE}]".to_string(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests per minute per session
    pub requests_per_minute: u32,
    /// Burst allowance
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable audit logging
    pub enabled: bool,
    /// Log full content (vs. just hashes)
    pub log_content: bool,
    /// Log file path (JSON lines)
    pub log_file: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_content: false, // Privacy by default
            log_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_scanners.len(), 6);
        assert_eq!(config.output_scanners.len(), 5);
        assert_eq!(config.generation.top_k, 20);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [pipeline]
            scanner_timeout_ms = 500
            retry_timeout_ms = 200

            [[input_scanners]]
            name = "prompt_injection"
            threshold = 0.5
            fail_action = "block"

            [[input_scanners]]
            name = "staff_terms"
            kind = "ban_substrings"
            threshold = 0.5
            fail_action = "sanitize"
            params = { substrings = ["hunter2"], redact = true }

            [[output_scanners]]
            name = "relevance"
            threshold = 0.3
            fail_action = "warn"
        "#;

        let config = WardenConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.pipeline.scanner_timeout_ms, 500);
        assert_eq!(config.input_scanners.len(), 2);
        assert_eq!(
            config.input_scanners[1].kind().unwrap(),
            ScannerKind::BanSubstrings
        );
        assert!(config.input_scanners[1].params.redact);
        assert_eq!(config.output_scanners[0].fail_action, FailAction::Warn);
        // Untouched sections keep their defaults
        assert_eq!(config.generation.max_tokens, 256);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = WardenConfig::empty();
        config
            .input_scanners
            .push(ScannerConfig::new("toxicity", 1.5, FailAction::Block));
        assert!(matches!(config.validate(), Err(WardenError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_blank_list_entries() {
        let topics = ScannerConfig::new("ban_topics", 0.8, FailAction::Block).with_params(
            ScannerParams {
                topics: vec!["violence".to_string(), String::new()],
                ..Default::default()
            },
        );
        let mut config = WardenConfig::empty();
        config.input_scanners.push(topics);
        assert!(matches!(config.validate(), Err(WardenError::ConfigError(_))));

        let substrings = ScannerConfig::new("ban_substrings", 0.5, FailAction::Warn).with_params(
            ScannerParams {
                substrings: vec!["  ".to_string()],
                ..Default::default()
            },
        );
        let mut config = WardenConfig::empty();
        config.output_scanners.push(substrings);
        assert!(matches!(config.validate(), Err(WardenError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = WardenConfig::empty();
        config
            .input_scanners
            .push(ScannerConfig::new("toxicity", 0.5, FailAction::Block));
        config
            .input_scanners
            .push(ScannerConfig::new("toxicity", 0.7, FailAction::Warn));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wrong_direction() {
        let mut config = WardenConfig::empty();
        config
            .input_scanners
            .push(ScannerConfig::new("relevance", 0.5, FailAction::Warn));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_scanner() {
        let mut config = WardenConfig::empty();
        config
            .output_scanners
            .push(ScannerConfig::new("telepathy", 0.5, FailAction::Warn));
        assert!(matches!(
            config.validate(),
            Err(WardenError::UnknownScanner(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[input_scanners]]
            name = "toxicity"
            threshold = 0.6
            fail_action = "block"
            "#
        )
        .unwrap();

        let config = WardenConfig::load(file.path()).unwrap();
        assert_eq!(config.input_scanners.len(), 1);
        assert!(config.output_scanners.is_empty());
        assert_eq!(config.input_scanners[0].threshold, 0.6);
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!(
            "prompt-injection".parse::<ScannerKind>().unwrap(),
            ScannerKind::PromptInjection
        );
        assert_eq!(
            "NoRefusal".parse::<ScannerKind>().ok(),
            None,
            "camel case is not an accepted alias"
        );
    }
}
